use byteorder::{BigEndian, ByteOrder};

use crate::{
    config::{IoControlAction, IoControlConfig},
    context::{DiagnosticContext, MsgContext},
    services::{Handled, ServiceResult},
    NegativeResponseCode,
};

/// InputOutputControlByIdentifier (0x2F). Looks up the per-DID callback for
/// the requested action; an unknown action or an unconfigured slot answers
/// requestOutOfRange.
pub(crate) fn handle(
    cfg: &mut IoControlConfig,
    ctx: &DiagnosticContext,
    msg: &mut MsgContext<'_>,
) -> ServiceResult {
    if msg.request.len() < 3 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    let id = BigEndian::read_u16(&msg.request[..2]);
    let action_byte = msg.request[2];
    let Some(did) = cfg.dids.iter_mut().find(|d| d.id == id) else {
        return Err(NegativeResponseCode::RequestOutOfRange);
    };
    did.gating.check(ctx, msg.addressing)?;

    let Some(action) = IoControlAction::from_byte(action_byte) else {
        return Err(NegativeResponseCode::RequestOutOfRange);
    };
    let Some(execute) = did.actions[action as usize].as_mut() else {
        return Err(NegativeResponseCode::RequestOutOfRange);
    };

    let (head, payload) = msg.response.split_at_mut(3);
    let written = execute(&msg.request[3..], payload)?;
    BigEndian::write_u16(&mut head[..2], id);
    head[2] = action_byte;
    msg.response_len = 3 + written;
    Ok(Handled::Done)
}
