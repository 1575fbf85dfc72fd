pub mod memory;

pub use memory::{CommitLogEntry, MemoryRemote};

use crate::core::{CatalogItem, OwnerId, Record, Result, SyncError};
use async_trait::async_trait;
use std::time::Duration;

/// Source of the owner-agnostic catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogItem>>;
}

/// Source of one owner's cart.
#[async_trait]
pub trait CartSource: Send + Sync {
    async fn fetch_cart(&self, owner: &OwnerId) -> Result<Vec<Record>>;
}

/// Remote write path. The payload replaces the owner's whole cart.
#[async_trait]
pub trait CartCommitter: Send + Sync {
    async fn commit_cart(&self, owner: &OwnerId, cart: Vec<Record>) -> Result<()>;
}

/// Run a remote call under an optional time limit. Every error, including
/// the timeout itself, passes through `on_error`.
pub(crate) async fn call_with_timeout<T, E, Fut>(
    limit: Option<Duration>,
    on_error: E,
    call: Fut,
) -> Result<T>
where
    E: FnOnce(SyncError) -> SyncError,
    Fut: Future<Output = Result<T>>,
{
    let result = match limit {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!("exceeded {:?}", limit))),
        },
        None => call.await,
    };
    result.map_err(on_error)
}
