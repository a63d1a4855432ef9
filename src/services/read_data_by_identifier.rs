use byteorder::{BigEndian, ByteOrder};

use crate::{
    config::ReadDidConfig,
    context::{DiagnosticContext, MsgContext},
    services::{Handled, ServiceResult},
    NegativeResponseCode,
};

/// ReadDataByIdentifier (0x22).
///
/// Two passes over the requested identifiers: first validate every DID
/// (existence, gating, total response size), then run the read callbacks.
/// The first failing callback aborts the request.
pub(crate) fn handle(
    cfg: &mut ReadDidConfig,
    ctx: &DiagnosticContext,
    msg: &mut MsgContext<'_>,
) -> ServiceResult {
    if msg.request.len() < 2 || msg.request.len() % 2 != 0 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }

    let mut total = 0usize;
    for pair in msg.request.chunks_exact(2) {
        let id = BigEndian::read_u16(pair);
        let Some(did) = cfg.dids.iter().find(|d| d.id == id) else {
            return Err(NegativeResponseCode::RequestOutOfRange);
        };
        did.gating.check(ctx, msg.addressing)?;
        total += 2 + did.length;
    }
    if total > msg.capacity() {
        return Err(NegativeResponseCode::ResponseTooLong);
    }

    let mut at = 0usize;
    for pair in msg.request.chunks_exact(2) {
        let id = BigEndian::read_u16(pair);
        let Some(did) = cfg.dids.iter_mut().find(|d| d.id == id) else {
            return Err(NegativeResponseCode::RequestOutOfRange);
        };
        BigEndian::write_u16(&mut msg.response[at..at + 2], id);
        (did.read)(&mut msg.response[at + 2..at + 2 + did.length])?;
        at += 2 + did.length;
    }
    msg.response_len = at;
    Ok(Handled::Done)
}
