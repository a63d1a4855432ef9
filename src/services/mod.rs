//! Per-service request handlers.
//!
//! Each handler receives the [`MsgContext`](crate::MsgContext) for the active
//! request together with its service configuration and the mutable
//! [`DiagnosticContext`](crate::DiagnosticContext), and reports back through
//! [`ServiceResult`]. The dispatcher owns gate checks, response framing and
//! the pending/RCRRP machinery.

pub(crate) mod clear_diagnostic_info;
pub(crate) mod control_dtc_setting;
pub(crate) mod ecu_reset;
pub(crate) mod io_control;
pub(crate) mod read_data_by_identifier;
pub(crate) mod read_dtc_information;
pub(crate) mod routine_control;
pub(crate) mod security_access;
pub(crate) mod session_control;
pub(crate) mod tester_present;
pub(crate) mod upload_download;
pub(crate) mod write_data_by_identifier;

use crate::NegativeResponseCode;

/// Successful handler outcomes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Handled {
    /// Response payload is in place.
    Done,
    /// Backend still working; re-invoke later, RCRRP on P2 expiry.
    Pending,
    /// Transmit an RCRRP right away, then re-invoke with
    /// [`OpStatus::ForceRcrrpOk`](crate::OpStatus::ForceRcrrpOk).
    ForceRcrrp,
}

pub(crate) type ServiceResult = Result<Handled, NegativeResponseCode>;
