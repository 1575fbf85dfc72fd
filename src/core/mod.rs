pub mod error;
pub mod key;
pub mod record;

pub use error::{Result, SyncError};
pub use key::{IdentityKey, Keyed, derive_key, derive_key_from_record};
pub use record::{CatalogItem, OwnerId, Record};
