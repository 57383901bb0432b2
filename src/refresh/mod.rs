pub mod coordinator;
pub mod scheduler;

pub use coordinator::{RefreshCoordinator, RefreshOutcome, RefreshPolicy, Trigger};
pub use scheduler::spawn_scheduled_refresh;
