use byteorder::{BigEndian, ByteOrder};

use crate::{
    backend::{Dem, DemError, NvmStatus},
    config::NvmStatusFn,
    context::{MsgContext, OpStatus},
    services::{Handled, ServiceResult},
    NegativeResponseCode,
};

/// ClearDiagnosticInformation (0x14).
///
/// The initial pass selects and clears the 24-bit DTC group in DEM. When an
/// NVM manager is configured the handler stays pending until the cleared
/// fault memory has drained to persistent storage.
pub(crate) fn handle(
    dem: &mut dyn Dem,
    nvm_status: Option<&mut NvmStatusFn>,
    op_status: OpStatus,
    msg: &mut MsgContext<'_>,
) -> ServiceResult {
    if msg.request.len() != 3 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    let group = BigEndian::read_u24(msg.request);

    match op_status {
        OpStatus::Initial => {
            let cleared = dem.select_dtc(group).and_then(|()| dem.clear_dtc());
            match cleared {
                Ok(()) => {
                    if nvm_status.is_some() {
                        Ok(Handled::Pending)
                    } else {
                        msg.response_len = 0;
                        Ok(Handled::Done)
                    }
                }
                Err(DemError::Busy) => Ok(Handled::Pending),
                Err(_) => Err(NegativeResponseCode::RequestOutOfRange),
            }
        }
        // the clear ran on the initial pass; from here on only the NVM
        // drain is outstanding
        OpStatus::Pending | OpStatus::ForceRcrrpOk => {
            if let Some(nvm) = nvm_status {
                if nvm() != NvmStatus::Idle {
                    return Ok(Handled::Pending);
                }
            }
            msg.response_len = 0;
            Ok(Handled::Done)
        }
        // nothing held; the dispatcher discards the response
        OpStatus::Cancel => Ok(Handled::Done),
    }
}
