use crate::{
    context::MsgContext,
    services::{Handled, ServiceResult},
    NegativeResponseCode,
};

/// TesterPresent (0x3E). The S3 reload itself happens in the dispatcher on
/// every request; this handler only validates the zeroSubFunction form.
pub(crate) fn handle(msg: &mut MsgContext<'_>) -> ServiceResult {
    if msg.request.len() != 1 {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
    }
    if msg.request[0] != 0x00 {
        return Err(NegativeResponseCode::SubFunctionNotSupported);
    }
    msg.response[0] = 0x00;
    msg.response_len = 1;
    Ok(Handled::Done)
}
