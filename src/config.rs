use static_assertions::const_assert;

use crate::{
    backend::{NvmStatus, TransferResult},
    context::{Addressing, DiagnosticContext, OpStatus},
    session::{AddressingMask, SecurityMask, SessionMask},
    NegativeResponseCode, ServiceId,
};

/// Decision callback for a requested session change:
/// `(current_session, requested_session)`.
pub type SessionPermissionFn =
    Box<dyn FnMut(u8, u8) -> Result<(), NegativeResponseCode> + Send>;
/// Notification after a session change took effect: `(old, new)`.
pub type SessionChangeFn = Box<dyn FnMut(u8, u8) + Send>;
/// Fills the seed buffer for one security level.
pub type GenerateSeedFn = Box<dyn FnMut(&mut [u8]) -> Result<(), NegativeResponseCode> + Send>;
/// Verdict on a client key for one security level.
pub type CompareKeyFn = Box<dyn FnMut(&[u8]) -> bool + Send>;
/// Validates a requested memory window:
/// `(op_status, data_format_identifier, address, size, block_len)`. The block
/// length starts at the server's receive buffer size and may be lowered.
pub type MemoryWindowFn =
    Box<dyn FnMut(OpStatus, u8, u32, u32, &mut u32) -> Result<(), NegativeResponseCode> + Send>;
/// Writes one TransferData chunk at `(address)`.
pub type WriteMemoryFn = Box<dyn FnMut(OpStatus, u32, &[u8]) -> TransferResult + Send>;
/// Reads one TransferData chunk from `(address)` into the buffer.
pub type ReadMemoryFn = Box<dyn FnMut(OpStatus, u32, &mut [u8]) -> TransferResult + Send>;
/// Finalizes a transfer window on RequestTransferExit.
pub type TransferExitFn = Box<dyn FnMut(OpStatus) -> Result<(), NegativeResponseCode> + Send>;
/// Reads one DID into the buffer (sized to the configured DID length).
pub type ReadDidFn = Box<dyn FnMut(&mut [u8]) -> Result<(), NegativeResponseCode> + Send>;
/// Writes one DID from the request payload.
pub type WriteDidFn =
    Box<dyn FnMut(OpStatus, &[u8]) -> Result<(), NegativeResponseCode> + Send>;
/// Routine operation: `(op_status, request_data, response_buf)`, returning
/// the response byte count.
pub type RoutineFn = Box<
    dyn FnMut(OpStatus, &[u8], &mut [u8]) -> Result<usize, NegativeResponseCode> + Send,
>;
/// One I/O control action: `(control_data, response_buf)`, returning the
/// response byte count.
pub type IoControlFn =
    Box<dyn FnMut(&[u8], &mut [u8]) -> Result<usize, NegativeResponseCode> + Send>;
/// Probes the NVM manager state.
pub type NvmStatusFn = Box<dyn FnMut() -> NvmStatus + Send>;

/// S3/P2 timing in main-function ticks plus the tick period itself.
#[derive(Clone, Copy, Debug)]
pub struct TimingConfig {
    /// Session idle timeout; reloaded on every request.
    pub s3_server: u16,
    /// Deadline for the first response pass; the first RCRRP goes out when
    /// it expires with the handler still pending.
    pub p2_server_min: u16,
    /// Deadline between subsequent RCRRPs once one has gone out.
    pub p2_server_max: u16,
    /// Main-function period in milliseconds.
    pub period_ms: u16,
}

const DEFAULT_S3_SERVER: u16 = 500;
const DEFAULT_P2_SERVER_MIN: u16 = 2;
const DEFAULT_P2_SERVER_MAX: u16 = 5;
const DEFAULT_PERIOD_MS: u16 = 10;
const_assert!(DEFAULT_P2_SERVER_MIN <= DEFAULT_P2_SERVER_MAX);
const_assert!(DEFAULT_S3_SERVER > DEFAULT_P2_SERVER_MAX);

impl Default for TimingConfig {
    /// 10 ms tick, 5000 ms S3, 50 ms P2ServerMax.
    fn default() -> Self {
        Self {
            s3_server: DEFAULT_S3_SERVER,
            p2_server_min: DEFAULT_P2_SERVER_MIN,
            p2_server_max: DEFAULT_P2_SERVER_MAX,
            period_ms: DEFAULT_PERIOD_MS,
        }
    }
}

/// Session/security/addressing requirements of a single DID or routine,
/// checked on top of the per-service gate.
#[derive(Clone, Copy, Debug)]
pub struct Gating {
    pub sessions: SessionMask,
    pub security: SecurityMask,
    pub addressing: AddressingMask,
}

impl Default for Gating {
    fn default() -> Self {
        Self {
            sessions: SessionMask::any(),
            security: SecurityMask::open(),
            addressing: AddressingMask::any(),
        }
    }
}

impl Gating {
    #[must_use]
    pub fn new(sessions: SessionMask, security: SecurityMask) -> Self {
        Self { sessions, security, addressing: AddressingMask::any() }
    }

    pub(crate) fn check(
        &self,
        ctx: &DiagnosticContext,
        addressing: Addressing,
    ) -> Result<(), NegativeResponseCode> {
        if !self.addressing.allows(addressing) || !self.sessions.allows(ctx.session) {
            return Err(NegativeResponseCode::RequestOutOfRange);
        }
        if !self.security.allows(ctx.security_level) {
            return Err(NegativeResponseCode::SecurityAccessDenied);
        }
        Ok(())
    }
}

/// DiagnosticSessionControl (0x10) configuration.
pub struct SessionControlConfig {
    /// Session identifiers this server supports.
    pub sessions: Vec<u8>,
    /// Veto callback for session changes; `None` accepts every supported
    /// target session.
    pub permission: Option<SessionPermissionFn>,
}

/// EcuReset (0x11) configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct EcuResetConfig {
    /// Ticks between the positive response and the integrator reset event.
    /// Clamped to at least one tick so the response leaves first.
    pub delay: u16,
}

/// One unlockable security level of SecurityAccess (0x27).
///
/// The requestSeed sub-function is `2 * level - 1`, sendKey is one above.
pub struct SecurityLevel {
    /// Level identifier, 1..=8.
    pub level: u8,
    pub seed_size: usize,
    pub key_size: usize,
    /// Sessions the handshake for this level may run in.
    pub sessions: SessionMask,
    /// Failed attempts tolerated before the lockout delay starts.
    pub attempt_limit: u8,
    /// Lockout duration in ticks once the limit is hit.
    pub delay_on_limit: u16,
    pub generate_seed: GenerateSeedFn,
    pub compare_key: CompareKeyFn,
}

pub struct SecurityAccessConfig {
    pub levels: Vec<SecurityLevel>,
}

/// One routine reachable through RoutineControl (0x31). Start is mandatory;
/// stop and requestResults answer subFunctionNotSupported when absent.
pub struct Routine {
    pub id: u16,
    pub gating: Gating,
    pub start: RoutineFn,
    pub stop: Option<RoutineFn>,
    pub results: Option<RoutineFn>,
}

pub struct RoutineControlConfig {
    pub routines: Vec<Routine>,
}

/// RequestDownload (0x34) configuration.
pub struct RequestDownloadConfig {
    pub process: MemoryWindowFn,
}

/// RequestUpload (0x35) configuration.
pub struct RequestUploadConfig {
    pub process: MemoryWindowFn,
}

/// TransferData (0x36) configuration. A transfer in a direction with no
/// callback answers conditionsNotCorrect.
#[derive(Default)]
pub struct TransferDataConfig {
    pub write: Option<WriteMemoryFn>,
    pub read: Option<ReadMemoryFn>,
}

/// RequestTransferExit (0x37) configuration. Without a callback the exit
/// just resets the transfer state.
#[derive(Default)]
pub struct RequestTransferExitConfig {
    pub exit: Option<TransferExitFn>,
}

/// One readable DID.
pub struct ReadDid {
    pub id: u16,
    /// Fixed payload length of this DID.
    pub length: usize,
    pub gating: Gating,
    pub read: ReadDidFn,
}

pub struct ReadDidConfig {
    pub dids: Vec<ReadDid>,
}

/// One writable DID.
pub struct WriteDid {
    pub id: u16,
    /// Expected data length; a mismatching request is rejected before the
    /// callback runs.
    pub length: usize,
    pub gating: Gating,
    pub write: WriteDidFn,
}

pub struct WriteDidConfig {
    pub dids: Vec<WriteDid>,
}

/// Action byte of InputOutputControlByIdentifier (0x2F).
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum IoControlAction {
    ReturnControlToEcu = 0x00,
    ResetToDefault = 0x01,
    FreezeCurrentState = 0x02,
    ShortTermAdjustment = 0x03,
    LongTermAdjustment = 0x04,
}

impl IoControlAction {
    /// Number of defined action codes.
    pub const COUNT: usize = 5;

    #[must_use]
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::ReturnControlToEcu),
            0x01 => Some(Self::ResetToDefault),
            0x02 => Some(Self::FreezeCurrentState),
            0x03 => Some(Self::ShortTermAdjustment),
            0x04 => Some(Self::LongTermAdjustment),
            _ => None,
        }
    }
}

/// One I/O-controllable DID with its per-action callbacks, indexed by
/// [`IoControlAction`]. A `None` slot answers requestOutOfRange.
pub struct IoControlDid {
    pub id: u16,
    pub gating: Gating,
    pub actions: [Option<IoControlFn>; IoControlAction::COUNT],
}

pub struct IoControlConfig {
    pub dids: Vec<IoControlDid>,
}

/// ReadDTCInformation (0x19) report types this server implements.
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum DtcReport {
    NumberOfDtcByStatusMask = 0x01,
    DtcByStatusMask = 0x02,
    DtcSnapshotIdentification = 0x03,
    DtcSnapshotRecordByDtcNumber = 0x04,
    DtcExtendedDataRecordByDtcNumber = 0x06,
}

impl DtcReport {
    #[must_use]
    pub fn from_sub_function(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::NumberOfDtcByStatusMask),
            0x02 => Some(Self::DtcByStatusMask),
            0x03 => Some(Self::DtcSnapshotIdentification),
            0x04 => Some(Self::DtcSnapshotRecordByDtcNumber),
            0x06 => Some(Self::DtcExtendedDataRecordByDtcNumber),
            _ => None,
        }
    }
}

/// ReadDTCInformation (0x19) configuration: the enabled report types.
pub struct ReadDtcConfig {
    pub reports: Vec<DtcReport>,
}

impl Default for ReadDtcConfig {
    fn default() -> Self {
        Self {
            reports: vec![
                DtcReport::NumberOfDtcByStatusMask,
                DtcReport::DtcByStatusMask,
                DtcReport::DtcSnapshotIdentification,
                DtcReport::DtcSnapshotRecordByDtcNumber,
                DtcReport::DtcExtendedDataRecordByDtcNumber,
            ],
        }
    }
}

/// Handler of one service, tagged by SID, carrying its service-specific
/// configuration.
pub enum ServiceHandler {
    SessionControl(SessionControlConfig),
    EcuReset(EcuResetConfig),
    ClearDiagnosticInformation,
    ReadDtcInformation(ReadDtcConfig),
    ReadDataByIdentifier(ReadDidConfig),
    SecurityAccess(SecurityAccessConfig),
    WriteDataByIdentifier(WriteDidConfig),
    IoControlByIdentifier(IoControlConfig),
    RoutineControl(RoutineControlConfig),
    RequestDownload(RequestDownloadConfig),
    RequestUpload(RequestUploadConfig),
    TransferData(TransferDataConfig),
    RequestTransferExit(RequestTransferExitConfig),
    TesterPresent,
    ControlDtcSetting,
}

impl ServiceHandler {
    #[must_use]
    pub fn service_id(&self) -> ServiceId {
        match self {
            Self::SessionControl(_) => ServiceId::DiagnosticSessionControl,
            Self::EcuReset(_) => ServiceId::EcuReset,
            Self::ClearDiagnosticInformation => ServiceId::ClearDiagnosticInformation,
            Self::ReadDtcInformation(_) => ServiceId::ReadDtcInformation,
            Self::ReadDataByIdentifier(_) => ServiceId::ReadDataByIdentifier,
            Self::SecurityAccess(_) => ServiceId::SecurityAccess,
            Self::WriteDataByIdentifier(_) => ServiceId::WriteDataByIdentifier,
            Self::IoControlByIdentifier(_) => ServiceId::InputOutputControlByIdentifier,
            Self::RoutineControl(_) => ServiceId::RoutineControl,
            Self::RequestDownload(_) => ServiceId::RequestDownload,
            Self::RequestUpload(_) => ServiceId::RequestUpload,
            Self::TransferData(_) => ServiceId::TransferData,
            Self::RequestTransferExit(_) => ServiceId::RequestTransferExit,
            Self::TesterPresent => ServiceId::TesterPresent,
            Self::ControlDtcSetting => ServiceId::ControlDtcSetting,
        }
    }

    pub(crate) fn needs_dem(&self) -> bool {
        matches!(
            self,
            Self::ClearDiagnosticInformation | Self::ReadDtcInformation(_) | Self::ControlDtcSetting
        )
    }
}

/// One dispatch table row: the per-service gate plus the handler.
pub struct ServiceEntry {
    pub sessions: SessionMask,
    pub security: SecurityMask,
    pub addressing: AddressingMask,
    pub handler: ServiceHandler,
}

impl ServiceEntry {
    /// Entry reachable from every session and addressing mode without
    /// security.
    #[must_use]
    pub fn new(handler: ServiceHandler) -> Self {
        Self {
            sessions: SessionMask::any(),
            security: SecurityMask::open(),
            addressing: AddressingMask::any(),
            handler,
        }
    }

    #[must_use]
    pub fn sessions(mut self, sessions: SessionMask) -> Self {
        self.sessions = sessions;
        self
    }

    #[must_use]
    pub fn security(mut self, security: SecurityMask) -> Self {
        self.security = security;
        self
    }

    #[must_use]
    pub fn addressing(mut self, addressing: AddressingMask) -> Self {
        self.addressing = addressing;
        self
    }

    /// Restrict the service to physically addressed requests; functionally
    /// addressed ones are silently discarded.
    #[must_use]
    pub fn physical_only(self) -> Self {
        self.addressing(AddressingMask::Physical)
    }
}
