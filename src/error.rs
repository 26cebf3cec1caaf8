//! Error handling conventions used across the crate.
//!
//! Internal functions propagate `anyhow::Result` with `Context` attached
//! at I/O and parsing boundaries (file paths, line numbers, wire
//! diagnostics). The operation surface and the `ffi` module narrow every
//! failure down to the two-value return code described in `spec.md` §6/§7:
//! no richer error enum crosses those boundaries, finer distinctions are
//! surfaced only through the installed error handler and the `log` crate.

use log::error;

/// The only result shape the operation surface and the FFI boundary
/// expose to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpResult {
    Success,
    Failure,
}

impl OpResult {
    pub fn is_success(self) -> bool {
        matches!(self, OpResult::Success)
    }

    pub fn from_result<T>(res: &anyhow::Result<T>) -> Self {
        match res {
            Ok(_) => OpResult::Success,
            Err(_) => OpResult::Failure,
        }
    }
}

/// Log `err` under `context` at `error` level and collapse it to
/// `OpResult::Failure`. Used at every operation-surface and error-callback
/// boundary so the detailed `anyhow` chain isn't silently dropped.
pub(crate) fn log_failure(context: &str, err: &anyhow::Error) -> OpResult {
    error!("{context}: {err:#}");
    OpResult::Failure
}
