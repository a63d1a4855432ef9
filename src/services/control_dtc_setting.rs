use crate::{
    backend::Dem,
    context::MsgContext,
    services::{Handled, ServiceResult},
    NegativeResponseCode,
};

/// ControlDTCSetting (0x85). Forwards enable/disable to DEM and echoes the
/// sub-function.
pub(crate) fn handle(dem: &mut dyn Dem, msg: &mut MsgContext<'_>) -> ServiceResult {
    if msg.request.len() != 1 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    match msg.request[0] {
        0x01 => dem.enable_dtc_setting(),
        0x02 => dem.disable_dtc_setting(),
        _ => return Err(NegativeResponseCode::SubFunctionNotSupported),
    }
    msg.response[0] = msg.request[0];
    msg.response_len = 1;
    Ok(Handled::Done)
}
