/// Identifier of a diagnostic service this dispatcher can serve.
///
/// The first byte of every UDS request names a service; positive responses
/// echo it with [`POSITIVE_RESPONSE_OFFSET`](Self::POSITIVE_RESPONSE_OFFSET)
/// added, negative responses carry it after the
/// [`NEGATIVE_RESPONSE`](Self::NEGATIVE_RESPONSE) marker byte.
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
#[repr(u8)]
pub enum ServiceId {
    DiagnosticSessionControl = 0x10,
    EcuReset = 0x11,
    ClearDiagnosticInformation = 0x14,
    ReadDtcInformation = 0x19,
    ReadDataByIdentifier = 0x22,
    SecurityAccess = 0x27,
    WriteDataByIdentifier = 0x2E,
    InputOutputControlByIdentifier = 0x2F,
    RoutineControl = 0x31,
    RequestDownload = 0x34,
    RequestUpload = 0x35,
    TransferData = 0x36,
    RequestTransferExit = 0x37,
    TesterPresent = 0x3E,
    ControlDtcSetting = 0x85,
}

impl ServiceId {
    /// Added to the request SID to form the positive response SID.
    pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
    /// Marker byte opening every negative response message.
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;

    #[must_use]
    pub fn from_sid(sid: u8) -> Option<Self> {
        match sid {
            0x10 => Some(Self::DiagnosticSessionControl),
            0x11 => Some(Self::EcuReset),
            0x14 => Some(Self::ClearDiagnosticInformation),
            0x19 => Some(Self::ReadDtcInformation),
            0x22 => Some(Self::ReadDataByIdentifier),
            0x27 => Some(Self::SecurityAccess),
            0x2E => Some(Self::WriteDataByIdentifier),
            0x2F => Some(Self::InputOutputControlByIdentifier),
            0x31 => Some(Self::RoutineControl),
            0x34 => Some(Self::RequestDownload),
            0x35 => Some(Self::RequestUpload),
            0x36 => Some(Self::TransferData),
            0x37 => Some(Self::RequestTransferExit),
            0x3E => Some(Self::TesterPresent),
            0x85 => Some(Self::ControlDtcSetting),
            _ => None,
        }
    }

    #[must_use]
    pub fn sid(self) -> u8 {
        self as u8
    }

    /// SID of the positive response to this service.
    #[must_use]
    pub fn response_sid(self) -> u8 {
        self.sid().wrapping_add(Self::POSITIVE_RESPONSE_OFFSET)
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
