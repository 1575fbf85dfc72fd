pub mod coordinator;
pub mod mutation;

pub use coordinator::MutationCoordinator;
pub use mutation::{MutationHandle, PendingMutation};
