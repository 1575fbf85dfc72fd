pub mod session;

pub use session::{CatalogEntry, ShopSession};
