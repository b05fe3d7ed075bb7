//! Swap coordination
//!
//! The coordination layer:
//! 1. Resolves swap requests into plans against the configuration
//! 2. Runs one coordinator per swap through the hashlock/timelock state machine
//! 3. Keeps source-before-destination ordering and the cancellation deadlines
//! 4. Supervises concurrent swaps and shuts them down on request

pub mod clock;
pub mod coordinator;
pub mod engine;
pub mod plan;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{CoordinatorPolicy, SwapContext, SwapCoordinator};
pub use engine::{summarize, ResolverEngine, SwapOutcome};
pub use plan::SwapPlan;
