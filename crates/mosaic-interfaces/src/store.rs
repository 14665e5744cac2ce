//! Rendezvous key-value store used for peer discovery

use crate::deadline::{deadline_after, remaining};
use mosaic_types::Result;
use std::time::Duration;

/// Key-value store shared by every rank of a group.
///
/// Values are opaque bytes. `get` blocks until the key is present or the
/// timeout elapses, in which case it fails with a `Timeout` error.
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Publish a value, replacing any previous one
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Read a value, waiting for it to appear
    fn get(&self, key: &str, timeout: Duration) -> Result<Vec<u8>>;

    /// Check whether a key is present without waiting
    fn check(&self, key: &str) -> Result<bool>;

    /// Wait until every key is present
    fn wait(&self, keys: &[&str], timeout: Duration) -> Result<()> {
        let deadline = deadline_after(timeout);
        for key in keys {
            self.get(key, remaining(deadline))?;
        }
        Ok(())
    }
}
