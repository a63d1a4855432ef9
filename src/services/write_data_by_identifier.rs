use byteorder::{BigEndian, ByteOrder};

use crate::{
    config::WriteDidConfig,
    context::{DiagnosticContext, MsgContext},
    services::{Handled, ServiceResult},
    NegativeResponseCode,
};

/// WriteDataByIdentifier (0x2E). Exactly one DID per request; the data must
/// match the configured DID length.
pub(crate) fn handle(
    cfg: &mut WriteDidConfig,
    ctx: &DiagnosticContext,
    msg: &mut MsgContext<'_>,
) -> ServiceResult {
    if msg.request.len() < 3 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    let id = BigEndian::read_u16(&msg.request[..2]);
    let Some(did) = cfg.dids.iter_mut().find(|d| d.id == id) else {
        return Err(NegativeResponseCode::RequestOutOfRange);
    };
    did.gating.check(ctx, msg.addressing)?;
    let data = &msg.request[2..];
    if data.len() != did.length {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }

    (did.write)(ctx.op_status(), data)?;
    BigEndian::write_u16(&mut msg.response[..2], id);
    msg.response_len = 2;
    Ok(Handled::Done)
}
