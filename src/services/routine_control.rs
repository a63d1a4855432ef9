use byteorder::{BigEndian, ByteOrder};

use crate::{
    config::RoutineControlConfig,
    context::{DiagnosticContext, MsgContext},
    services::{Handled, ServiceResult},
    NegativeResponseCode,
};

const START: u8 = 0x01;
const STOP: u8 = 0x02;
const REQUEST_RESULTS: u8 = 0x03;

/// RoutineControl (0x31). The routine callback writes its payload at offset
/// 3; the `sub-function, idHi, idLo` prefix goes in afterwards.
pub(crate) fn handle(
    cfg: &mut RoutineControlConfig,
    ctx: &DiagnosticContext,
    msg: &mut MsgContext<'_>,
) -> ServiceResult {
    if msg.request.len() < 3 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    let sub = msg.request[0];
    let id = BigEndian::read_u16(&msg.request[1..3]);
    let Some(routine) = cfg.routines.iter_mut().find(|r| r.id == id) else {
        return Err(NegativeResponseCode::RequestOutOfRange);
    };
    routine.gating.check(ctx, msg.addressing)?;

    let operation = match sub {
        START => Some(&mut routine.start),
        STOP => routine.stop.as_mut(),
        REQUEST_RESULTS => routine.results.as_mut(),
        _ => None,
    };
    let Some(operation) = operation else {
        return Err(NegativeResponseCode::SubFunctionNotSupported);
    };

    let (head, payload) = msg.response.split_at_mut(3);
    let written = operation(ctx.op_status(), &msg.request[3..], payload)?;
    head[0] = sub;
    BigEndian::write_u16(&mut head[1..3], id);
    msg.response_len = 3 + written;
    Ok(Handled::Done)
}
