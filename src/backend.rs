use bitmask_enum::bitmask;

use crate::NegativeResponseCode;

/// Verdict of a memory read/write callback during TransferData.
///
/// Long-running flash operations return [`Pending`](Self::Pending) and are
/// re-invoked until they settle; the dispatcher answers RCRRP (NRC 0x78) on
/// the wire in the meantime. [`ForceRcrrp`](Self::ForceRcrrp) asks for one
/// RCRRP to be transmitted immediately, after which the callback sees
/// [`OpStatus::ForceRcrrpOk`](crate::OpStatus::ForceRcrrpOk) once.
#[derive(Debug)]
pub enum TransferResult {
    /// Chunk fully processed.
    Ok,
    /// Still working; invoke again later.
    Pending,
    /// Put an RCRRP on the wire now, then continue.
    ForceRcrrp,
    /// Gave up. `None` selects the service default (generalProgrammingFailure
    /// for writes, conditionsNotCorrect for reads).
    Failed(Option<NegativeResponseCode>),
}

/// Errors surfaced by the DEM fault-memory backend.
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DemError {
    /// The operation is running; poll again on a later invocation.
    Busy,
    /// The caller's buffer cannot hold the record.
    BufferTooSmall,
    /// Anything else; mapped to requestOutOfRange on the wire.
    Failed,
}

/// Status of the non-volatile memory manager, polled while a ClearDTC job
/// drains to persistent storage.
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NvmStatus {
    Idle,
    Busy,
}

/// ISO 14229 DTC status byte, reported per fault record.
#[bitmask(u8)]
pub enum DtcStatus {
    TestFailed,
    TestFailedThisOperationCycle,
    PendingDtc,
    ConfirmedDtc,
    TestNotCompletedSinceLastClear,
    TestFailedSinceLastClear,
    TestNotCompletedThisOperationCycle,
    WarningIndicatorRequested,
}

/// Fault-memory operations the ReadDTCInformation / ClearDiagnosticInformation
/// / ControlDTCSetting front-ends delegate to.
///
/// The filter/record iteration protocol mirrors the classic DEM shape: set a
/// filter, ask for the match count, then pull matches one by one. Record
/// reads write into the caller's buffer and report the byte count.
pub trait Dem {
    /// Select a DTC (or group of DTCs) for a subsequent clear or record read.
    fn select_dtc(&mut self, dtc: u32) -> Result<(), DemError>;
    /// Clear the previously selected DTC group from primary memory. Called
    /// once per request; [`DemError::Busy`] keeps the request pending, with
    /// completion tracked through the NVM status probe.
    fn clear_dtc(&mut self) -> Result<(), DemError>;

    fn set_dtc_filter(&mut self, status_mask: u8) -> Result<(), DemError>;
    fn filtered_dtc_count(&mut self) -> Result<u16, DemError>;
    fn next_filtered_dtc(&mut self) -> Result<(u32, DtcStatus), DemError>;

    fn set_freeze_frame_record_filter(&mut self) -> Result<(), DemError>;
    fn freeze_frame_record_count(&mut self) -> Result<u16, DemError>;
    /// Next (DTC, record number) pair under the freeze-frame filter.
    fn next_freeze_frame_record(&mut self) -> Result<(u32, u8), DemError>;

    /// Select a snapshot/extended record of the previously selected DTC.
    fn select_freeze_frame_data(&mut self, record: u8) -> Result<(), DemError>;
    fn read_freeze_frame_data(&mut self, buf: &mut [u8]) -> Result<usize, DemError>;
    fn read_extended_data_record(&mut self, buf: &mut [u8]) -> Result<usize, DemError>;

    fn enable_dtc_setting(&mut self);
    fn disable_dtc_setting(&mut self);
}
