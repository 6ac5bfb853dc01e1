//! Download task execution -- one enqueued request driven end to end.
//!
//! Split into focused submodules:
//! - [`context`] - Shared state, cancellation signal, fenced store writes
//! - [`orchestration`] - Eligibility check, transfer, throttled progress
//! - [`finalization`] - Terminal store write and result emission

mod context;
mod finalization;
mod orchestration;


pub(crate) use context::{CancelSignal, DownloadTaskContext};
pub(crate) use orchestration::run_download_task;
