//! Server-side UDS (ISO 14229) diagnostic service dispatcher.
//!
//! This crate implements the service-handling layer of a diagnostic server as
//! it runs inside an ECU: a transport (CAN-TP, DoIP, ...) delivers complete
//! request byte buffers, the dispatcher gates each request against the active
//! diagnostic session, security level and addressing mode, runs the handler
//! configured for the requested Service Identifier (SID) and produces either
//! a positive response or a Negative Response Code.
//!
//! The dispatcher is transport-agnostic and single-threaded: there is exactly
//! one active request at any time, handlers never block, and long-running
//! backend operations report `Pending` so the server can answer
//! `requestCorrectlyReceivedResponsePending` (NRC `0x78`) on the wire while
//! the work completes. Session idle (S3) and response deadline (P2) timing is
//! driven by a periodic call to [`UdsServer::main_function`].
//!
//! ```
//! use uds_server::{
//!     DispatchOutcome, RequestSource, ServiceEntry, ServiceHandler, SessionControlConfig,
//!     UdsServer,
//! };
//!
//! let mut server = UdsServer::builder()
//!     .service(ServiceEntry::new(ServiceHandler::SessionControl(
//!         SessionControlConfig { sessions: vec![0x01, 0x03], permission: None },
//!     )))
//!     .service(ServiceEntry::new(ServiceHandler::TesterPresent))
//!     .build()
//!     .unwrap();
//!
//! let outcome = server.process(&[0x3E, 0x00], RequestSource::physical());
//! assert_eq!(outcome, DispatchOutcome::Respond);
//! assert_eq!(server.response(), &[0x7E, 0x00]);
//! ```

mod error;
pub use error::Error;

mod nrc;
pub use nrc::NegativeResponseCode;

mod service;
pub use service::ServiceId;

mod session;
pub use session::{
    AddressingMask, SecurityMask, SessionMask, DEFAULT_SESSION, EXTENDED_SESSION,
    PROGRAMMING_SESSION, SAFETY_SYSTEM_SESSION,
};

mod context;
pub use context::{
    Addressing, DiagnosticContext, MsgContext, OpStatus, Protocol, RequestSource, ResetKind,
    TransferPhase, TransferState,
};

mod backend;
pub use backend::{Dem, DemError, DtcStatus, NvmStatus, TransferResult};

mod config;
pub use config::{
    CompareKeyFn, DtcReport, EcuResetConfig, Gating, GenerateSeedFn, IoControlAction,
    IoControlConfig, IoControlDid, IoControlFn, MemoryWindowFn, NvmStatusFn, ReadDid,
    ReadDidConfig, ReadDidFn, ReadDtcConfig, ReadMemoryFn, RequestDownloadConfig,
    RequestTransferExitConfig, RequestUploadConfig, Routine, RoutineControlConfig, RoutineFn,
    SecurityAccessConfig, SecurityLevel, ServiceEntry, ServiceHandler, SessionChangeFn,
    SessionControlConfig, SessionPermissionFn, TimingConfig, TransferDataConfig, TransferExitFn,
    WriteDid, WriteDidConfig, WriteDidFn, WriteMemoryFn,
};

mod server;
pub use server::{response_pending_frame, DispatchOutcome, TickEvent, UdsServer, UdsServerBuilder};

mod services;
