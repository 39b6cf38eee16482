//! Bounded execution of independent asynchronous units of work.

pub mod gate;
pub mod report;
pub mod runner;

pub use gate::{AdmissionGate, ExecutionSlot, GateStats};
pub use report::{ExecutionReport, ExecutionSummary, ModeComparison, UnitOutcome, UnitRecord};
pub use runner::{compare_modes, ConcurrencyExecutor};
