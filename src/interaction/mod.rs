//! Operator-facing seams: deletion confirmation and progress reporting.
//!
//! Neither is part of the collection algorithm itself. The collector talks to
//! them through the [`Confirmation`] and [`ProgressReporter`] traits so a
//! terminal, a test script or nothing at all can sit on the other side.

mod confirm;
mod progress;

pub use confirm::{
    AutoConfirm, Confirmation, ConfirmationResponse, ScriptedConfirmation, TerminalConfirmation,
};
pub use progress::{NoopProgress, ProgressReporter, ProgressSnapshot, ProgressTracker};
