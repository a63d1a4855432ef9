use crate::session::DEFAULT_SESSION;

/// Addressing mode the transport received the request under.
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Addressing {
    /// One-to-one request to this ECU.
    Physical,
    /// One-to-many request broadcast to every ECU on the segment.
    Functional,
}

/// Transport protocol the request arrived over. Informational; dispatch does
/// not branch on it.
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Protocol {
    Can,
    CanFd,
    DoIp,
    Lin,
}

/// Origin of one request as reported by the transport layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RequestSource {
    pub addressing: Addressing,
    pub protocol: Protocol,
}

impl RequestSource {
    /// Physically addressed request on classic CAN.
    #[must_use]
    pub fn physical() -> Self {
        Self { addressing: Addressing::Physical, protocol: Protocol::Can }
    }

    /// Functionally addressed request on classic CAN.
    #[must_use]
    pub fn functional() -> Self {
        Self { addressing: Addressing::Functional, protocol: Protocol::Can }
    }
}

/// Progress marker a handler (and its callbacks) sees across re-invocations
/// of the same request.
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpStatus {
    /// First invocation for this request.
    Initial,
    /// Re-invocation after the handler reported pending.
    Pending,
    /// The request was cancelled; release resources, the response is
    /// discarded.
    Cancel,
    /// Re-invocation after a forced RCRRP was put on the wire.
    ForceRcrrpOk,
}

/// Reset form requested through ECU Reset (SID 0x11).
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResetKind {
    /// 0x01: behaves like a power cycle.
    Hard,
    /// 0x03: re-initializes the application without dropping power.
    Soft,
}

impl ResetKind {
    #[must_use]
    pub fn from_sub_function(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hard),
            0x03 => Some(Self::Soft),
            _ => None,
        }
    }

    #[must_use]
    pub fn sub_function(self) -> u8 {
        match self {
            Self::Hard => 0x01,
            Self::Soft => 0x03,
        }
    }
}

/// Phase of the upload/download state machine.
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TransferPhase {
    #[default]
    Idle,
    Download,
    Upload,
}

/// State shared by RequestDownload/RequestUpload (0x34/0x35), TransferData
/// (0x36) and RequestTransferExit (0x37).
///
/// While the phase is [`Idle`](TransferPhase::Idle) no block sequence counter
/// is live; `offset <= memory_size` holds at all times.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransferState {
    pub phase: TransferPhase,
    pub memory_address: u32,
    pub memory_size: u32,
    /// Bytes already transferred from the window base.
    pub offset: u32,
    /// Next expected counter. Starts at 1 per accepted window, wraps
    /// 0xFF -> 0x00.
    pub block_sequence_counter: u8,
}

impl TransferState {
    pub(crate) fn begin(&mut self, phase: TransferPhase, address: u32, size: u32) {
        self.phase = phase;
        self.memory_address = address;
        self.memory_size = size;
        self.offset = 0;
        self.block_sequence_counter = 1;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Runtime state of the security access (0x27) handshake.
#[derive(Debug, Default)]
pub(crate) struct SecurityAccessState {
    /// Level for which a seed has been handed out and no key verdict reached
    /// yet.
    pub(crate) pending_seed_level: Option<u8>,
    /// Failed-key counters, indexed by level - 1.
    pub(crate) attempts: [u8; 8],
    /// Lockout ticks remaining; all 0x27 requests fail with 0x37 while > 0.
    pub(crate) delay_timer: u16,
}

/// Process-wide dispatcher state. There is exactly one of these per server
/// and at most one active request mutating it.
#[derive(Debug)]
pub struct DiagnosticContext {
    /// Active diagnostic session identifier.
    pub session: u8,
    /// Unlocked security level; 0 while locked.
    pub security_level: u8,
    pub transfer: TransferState,
    pub(crate) op_status: OpStatus,
    pub(crate) reset_pending: Option<ResetKind>,
    pub(crate) timer_s3: u16,
    pub(crate) timer_p2: u16,
    pub(crate) timer_reset: u16,
    pub(crate) security: SecurityAccessState,
}

impl DiagnosticContext {
    pub(crate) fn new(s3_server: u16) -> Self {
        Self {
            session: DEFAULT_SESSION,
            security_level: 0,
            transfer: TransferState::default(),
            op_status: OpStatus::Initial,
            reset_pending: None,
            timer_s3: s3_server,
            timer_p2: 0,
            timer_reset: 0,
            security: SecurityAccessState::default(),
        }
    }

    /// Session transition: locks security, drops any live transfer and
    /// forgets a half-done seed/key handshake. Lockout timers and attempt
    /// counters survive; they are anti-brute-force state, not session state.
    pub(crate) fn enter_session(&mut self, session: u8) {
        self.session = session;
        self.security_level = 0;
        self.transfer.reset();
        self.security.pending_seed_level = None;
    }

    #[must_use]
    pub fn op_status(&self) -> OpStatus {
        self.op_status
    }
}

/// Per-request view handed to a service handler: the request payload after
/// the SID byte and the response payload buffer after the `SID + 0x40` byte.
/// The buffer length is the response capacity.
pub struct MsgContext<'a> {
    pub request: &'a [u8],
    pub response: &'a mut [u8],
    /// Set by the handler; never larger than `response.len()`.
    pub response_len: usize,
    pub addressing: Addressing,
    pub protocol: Protocol,
}

impl MsgContext<'_> {
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.response.len()
    }
}
