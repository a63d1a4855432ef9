use crate::{
    config::SecurityAccessConfig,
    context::{DiagnosticContext, MsgContext},
    services::{Handled, ServiceResult},
    NegativeResponseCode,
};

/// SecurityAccess (0x27).
///
/// The sub-function encodes a (requestSeed, sendKey) pair per level:
/// requestSeed is odd, sendKey is the even value one above, and the level is
/// `(sub + 1) / 2`. A key only unlocks the level whose seed was handed out
/// last; a failed key leaves the level untouched and counts against the
/// attempt limit.
pub(crate) fn handle(
    cfg: &mut SecurityAccessConfig,
    ctx: &mut DiagnosticContext,
    msg: &mut MsgContext<'_>,
) -> ServiceResult {
    if msg.request.is_empty() {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    let sub = msg.request[0];
    // (0xFF + 1) / 2 still fits a u8
    let level = ((u16::from(sub) + 1) / 2) as u8;
    let Some(level_cfg) = cfg.levels.iter_mut().find(|l| l.level == level) else {
        return Err(NegativeResponseCode::SubFunctionNotSupported);
    };
    if !level_cfg.sessions.allows(ctx.session) {
        return Err(NegativeResponseCode::SubFunctionNotSupportedInActiveSession);
    }
    if ctx.security.delay_timer > 0 {
        return Err(NegativeResponseCode::RequiredTimeDelayNotExpired);
    }

    if sub & 0x01 != 0 {
        // requestSeed
        if msg.request.len() != 1 {
            return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
        }
        msg.response[0] = sub;
        let seed = &mut msg.response[1..1 + level_cfg.seed_size];
        if ctx.security_level == level {
            // already unlocked: an all-zero seed tells the client to skip the key
            seed.fill(0);
        } else {
            (level_cfg.generate_seed)(seed)?;
            ctx.security.pending_seed_level = Some(level);
        }
        msg.response_len = 1 + level_cfg.seed_size;
        return Ok(Handled::Done);
    }

    // sendKey
    if msg.request.len() != 1 + level_cfg.key_size {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    if ctx.security.pending_seed_level != Some(level) {
        return Err(NegativeResponseCode::RequestSequenceError);
    }
    ctx.security.pending_seed_level = None;

    if (level_cfg.compare_key)(&msg.request[1..]) {
        ctx.security_level = level;
        ctx.security.attempts[usize::from(level - 1)] = 0;
        msg.response[0] = sub;
        msg.response_len = 1;
        return Ok(Handled::Done);
    }

    let attempts = &mut ctx.security.attempts[usize::from(level - 1)];
    *attempts += 1;
    if *attempts >= level_cfg.attempt_limit {
        *attempts = 0;
        ctx.security.delay_timer = level_cfg.delay_on_limit;
        tracing::warn!(level, delay = level_cfg.delay_on_limit, "security access locked out");
        return Err(NegativeResponseCode::ExceededNumberOfAttempts);
    }
    Err(NegativeResponseCode::InvalidKey)
}
