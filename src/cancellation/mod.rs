//! Cooperative cancellation: signals, deadlines and their composition.

pub mod composer;
pub mod signal;

pub use composer::{run_until_cancelled, CancellationComposer, DeadlineSignal, LinkedCancellation};
pub use signal::{CancelCause, CancellationSignal};
