use thiserror::Error;

use crate::ServiceId;

/// Configuration errors reported when assembling a [`UdsServer`](crate::UdsServer).
///
/// Protocol-level rejections are never `Error` values; they travel as
/// [`NegativeResponseCode`](crate::NegativeResponseCode)s inside the dispatch
/// results.
#[derive(Error, Debug)]
pub enum Error {
    #[error("service {0} registered more than once")]
    DuplicateService(ServiceId),
    #[error("service {0} requires a DEM backend")]
    MissingDem(ServiceId),
    #[error("security level {0} configured more than once")]
    DuplicateSecurityLevel(u8),
    #[error("security level {0} out of range (valid levels are 1..=8)")]
    InvalidSecurityLevel(u8),
    #[error("security level {0} has a zero seed or key size")]
    InvalidSecuritySize(u8),
    #[error("session identifier {0:#04X} out of range (valid sessions are 0x01..=0x10)")]
    InvalidSession(u8),
    #[error("P2ServerMin ({min}) exceeds P2ServerMax ({max})")]
    InvalidTiming { min: u16, max: u16 },
    #[error("transmit buffer of {0} bytes is too small")]
    TransmitBufferTooSmall(usize),
    #[error("receive buffer of {0} bytes is too small")]
    ReceiveBufferTooSmall(usize),
}
