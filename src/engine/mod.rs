//! Core engine: eligibility, scanning, take execution and position planning.

pub mod eligibility;
pub mod executor;
pub mod planner;
pub mod scanner;

pub use eligibility::{evaluate_eligibility, Eligibility, TakeStatus};
pub use executor::{prepare_take, TakeCoordinator, TakeOutcome};
pub use planner::{draft_position, PositionPlanner};
pub use scanner::{CandidateBook, PositionScanner, ScanReport};
