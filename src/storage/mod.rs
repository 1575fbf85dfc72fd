pub mod collection;
pub mod patch;

pub use collection::KeyedCollection;
pub use patch::{Mutation, apply, apply_all};
