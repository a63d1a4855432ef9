use byteorder::{BigEndian, ByteOrder};

use crate::{
    config::{SessionChangeFn, SessionControlConfig, TimingConfig},
    context::{DiagnosticContext, MsgContext},
    services::{Handled, ServiceResult},
    NegativeResponseCode,
};

/// DiagnosticSessionControl (0x10).
///
/// A granted change resets the dispatcher state (transfer idle, security
/// locked) before the new session takes effect. The response reports the
/// session timeout in milliseconds and P2* in 10 ms units.
pub(crate) fn handle(
    cfg: &mut SessionControlConfig,
    timing: &TimingConfig,
    ctx: &mut DiagnosticContext,
    msg: &mut MsgContext<'_>,
    session_change: Option<&mut SessionChangeFn>,
) -> ServiceResult {
    if msg.request.len() != 1 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    let requested = msg.request[0];
    if !cfg.sessions.contains(&requested) {
        return Err(NegativeResponseCode::SubFunctionNotSupported);
    }
    if let Some(permission) = cfg.permission.as_mut() {
        permission(ctx.session, requested)?;
    }

    let old = ctx.session;
    ctx.enter_session(requested);
    if let Some(indication) = session_change {
        indication(old, requested);
    }

    let s3_ms = u32::from(timing.s3_server) * u32::from(timing.period_ms);
    let p2_star = u32::from(timing.p2_server_max) * u32::from(timing.period_ms) / 10;
    msg.response[0] = requested;
    BigEndian::write_u16(&mut msg.response[1..3], s3_ms.min(u32::from(u16::MAX)) as u16);
    BigEndian::write_u16(&mut msg.response[3..5], p2_star.min(u32::from(u16::MAX)) as u16);
    msg.response_len = 5;

    ctx.timer_s3 = timing.s3_server;
    Ok(Handled::Done)
}
