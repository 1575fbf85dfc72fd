pub mod store;
mod table;
pub mod topic;

pub use store::{CacheStore, Cart, Catalog, TopicValue};
pub use topic::{Scope, Topic, TopicStatus};
