/// Negative Response Code: the single byte a UDS server attaches to a
/// rejected request (`0x7F <SID> <NRC>` on the wire).
///
/// Only the subset of ISO 14229-1 codes this server emits gets a named
/// variant; anything else round-trips through [`Other`](Self::Other) so
/// integrator callbacks may surface vendor-specific codes unchanged.
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum NegativeResponseCode {
    /// Fallback when a handler rejects a request without selecting a code.
    GeneralReject = 0x10,
    /// The requested SID is unknown to this server.
    ServiceNotSupported = 0x11,
    /// Known service, unknown or unsupported sub-function.
    SubFunctionNotSupported = 0x12,
    /// Request length or parameter format does not match the service.
    IncorrectMessageLengthOrInvalidFormat = 0x13,
    /// The response would exceed the available response buffer.
    ResponseTooLong = 0x14,
    /// Server prerequisite conditions are not met.
    ConditionsNotCorrect = 0x22,
    /// The server expected a different sequence of requests, e.g. a
    /// TransferData without a preceding RequestDownload.
    RequestSequenceError = 0x24,
    /// A parameter (DID, routine identifier, memory window, ...) is outside
    /// the server's range of authority.
    RequestOutOfRange = 0x31,
    /// The service requires an unlocked security level.
    SecurityAccessDenied = 0x33,
    /// The key sent by the client did not match. The server stays locked and
    /// counts the attempt.
    InvalidKey = 0x35,
    /// Too many failed key attempts; the lockout delay starts.
    ExceededNumberOfAttempts = 0x36,
    /// A security access attempt arrived while the lockout delay was still
    /// running.
    RequiredTimeDelayNotExpired = 0x37,
    /// An upload/download request cannot be accepted due to a fault
    /// condition.
    UploadDownloadNotAccepted = 0x70,
    /// The server failed to erase or program a permanent memory location.
    GeneralProgrammingFailure = 0x72,
    /// TransferData arrived with an unexpected block sequence counter.
    WrongBlockSequenceCounter = 0x73,
    /// Request correctly received, response pending (RCRRP). Emitted while a
    /// handler keeps reporting `Pending`; it does not close the conversation.
    RequestCorrectlyReceivedResponsePending = 0x78,
    /// The sub-function is supported, but not in the active session.
    SubFunctionNotSupportedInActiveSession = 0x7E,
    /// The service is supported, but not in the active session.
    ServiceNotSupportedInActiveSession = 0x7F,
    /// Any other ISO-reserved or vendor-specific code.
    Other(u8),
}

impl From<NegativeResponseCode> for u8 {
    fn from(value: NegativeResponseCode) -> Self {
        match value {
            NegativeResponseCode::GeneralReject => 0x10,
            NegativeResponseCode::ServiceNotSupported => 0x11,
            NegativeResponseCode::SubFunctionNotSupported => 0x12,
            NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat => 0x13,
            NegativeResponseCode::ResponseTooLong => 0x14,
            NegativeResponseCode::ConditionsNotCorrect => 0x22,
            NegativeResponseCode::RequestSequenceError => 0x24,
            NegativeResponseCode::RequestOutOfRange => 0x31,
            NegativeResponseCode::SecurityAccessDenied => 0x33,
            NegativeResponseCode::InvalidKey => 0x35,
            NegativeResponseCode::ExceededNumberOfAttempts => 0x36,
            NegativeResponseCode::RequiredTimeDelayNotExpired => 0x37,
            NegativeResponseCode::UploadDownloadNotAccepted => 0x70,
            NegativeResponseCode::GeneralProgrammingFailure => 0x72,
            NegativeResponseCode::WrongBlockSequenceCounter => 0x73,
            NegativeResponseCode::RequestCorrectlyReceivedResponsePending => 0x78,
            NegativeResponseCode::SubFunctionNotSupportedInActiveSession => 0x7E,
            NegativeResponseCode::ServiceNotSupportedInActiveSession => 0x7F,
            NegativeResponseCode::Other(value) => value,
        }
    }
}

impl From<u8> for NegativeResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0x10 => Self::GeneralReject,
            0x11 => Self::ServiceNotSupported,
            0x12 => Self::SubFunctionNotSupported,
            0x13 => Self::IncorrectMessageLengthOrInvalidFormat,
            0x14 => Self::ResponseTooLong,
            0x22 => Self::ConditionsNotCorrect,
            0x24 => Self::RequestSequenceError,
            0x31 => Self::RequestOutOfRange,
            0x33 => Self::SecurityAccessDenied,
            0x35 => Self::InvalidKey,
            0x36 => Self::ExceededNumberOfAttempts,
            0x37 => Self::RequiredTimeDelayNotExpired,
            0x70 => Self::UploadDownloadNotAccepted,
            0x72 => Self::GeneralProgrammingFailure,
            0x73 => Self::WrongBlockSequenceCounter,
            0x78 => Self::RequestCorrectlyReceivedResponsePending,
            0x7E => Self::SubFunctionNotSupportedInActiveSession,
            0x7F => Self::ServiceNotSupportedInActiveSession,
            _ => Self::Other(value),
        }
    }
}

impl std::fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?} ({:#04X})", u8::from(*self))
    }
}
