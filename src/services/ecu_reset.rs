use crate::{
    config::EcuResetConfig,
    context::{DiagnosticContext, MsgContext, ResetKind},
    services::{Handled, ServiceResult},
    NegativeResponseCode,
};

/// EcuReset (0x11). Records the reset kind and arms the reset timer; the
/// integrator performs the actual reset when the timer event fires, after
/// the positive response has left the ECU.
pub(crate) fn handle(
    cfg: &EcuResetConfig,
    ctx: &mut DiagnosticContext,
    msg: &mut MsgContext<'_>,
) -> ServiceResult {
    if msg.request.len() != 1 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    let Some(kind) = ResetKind::from_sub_function(msg.request[0]) else {
        return Err(NegativeResponseCode::SubFunctionNotSupported);
    };

    ctx.reset_pending = Some(kind);
    ctx.timer_reset = cfg.delay.max(1);
    tracing::debug!(kind = ?kind, delay = ctx.timer_reset, "ECU reset armed");

    msg.response[0] = kind.sub_function();
    msg.response_len = 1;
    Ok(Handled::Done)
}
