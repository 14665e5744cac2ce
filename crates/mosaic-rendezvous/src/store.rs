//! Rendezvous store implementations

use mosaic_interfaces::deadline::{deadline_after, expired};
use mosaic_interfaces::Store;
use mosaic_types::{MosaicError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// In-process store; waiters wake on every `set`
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Vec<u8>>>,
    changed: Condvar,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.data.lock().insert(key.to_string(), value.to_vec());
        self.changed.notify_all();
        Ok(())
    }

    fn get(&self, key: &str, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = deadline_after(timeout);
        let mut data = self.data.lock();
        loop {
            if let Some(value) = data.get(key) {
                return Ok(value.clone());
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut data, deadline).timed_out() {
                        return data.get(key).cloned().ok_or_else(|| {
                            MosaicError::timeout(format!(
                                "key '{}' not set within {:?}",
                                key, timeout
                            ))
                        });
                    }
                }
                None => self.changed.wait(&mut data),
            }
        }
    }

    fn check(&self, key: &str) -> Result<bool> {
        Ok(self.data.lock().contains_key(key))
    }
}

/// Store backed by a directory visible to every rank.
///
/// Each key is one file. Writes go to a temporary file and are renamed into
/// place so readers never see a partial value.
///
/// The directory must be fresh for every job. Keys left behind by an earlier
/// job (a stale `mesh/rank/0` address, say) are indistinguishable from new
/// ones and can be read before their new owner overwrites them. Opening a
/// directory that already holds keys logs a warning.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    poll_interval: Duration,
    write_seq: AtomicU64,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            MosaicError::rendezvous(format!(
                "failed to create store directory {}: {}",
                root.display(),
                e
            ))
        })?;
        let leftover = count_keys(&root)?;
        if leftover > 0 {
            warn!(
                "File store directory {} already holds {} key(s); use a fresh directory per job",
                root.display(),
                leftover
            );
        }
        debug!("File store at {}", root.display());
        Ok(Self {
            root,
            poll_interval: Duration::from_millis(10),
            write_seq: AtomicU64::new(0),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(escape_key(key))
    }
}

/// Committed keys in a store directory; staging files start with `.`
fn count_keys(root: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(root)? {
        if !entry?.file_name().to_string_lossy().starts_with('.') {
            count += 1;
        }
    }
    Ok(count)
}

/// Map a key to a single file name; bytes outside `[A-Za-z0-9._-]` become `%XX`
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            b'.' if !out.is_empty() => out.push('.'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

impl Store for FileStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let target = self.key_path(key);
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let staging = self.root.join(format!(
            ".{}.tmp.{}.{}",
            escape_key(key),
            std::process::id(),
            seq
        ));
        std::fs::write(&staging, value)?;
        std::fs::rename(&staging, &target)?;
        Ok(())
    }

    fn get(&self, key: &str, timeout: Duration) -> Result<Vec<u8>> {
        let path = self.key_path(key);
        let deadline = deadline_after(timeout);
        loop {
            match std::fs::read(&path) {
                Ok(value) => return Ok(value),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            if expired(deadline) {
                return Err(MosaicError::timeout(format!(
                    "key '{}' not set within {:?}",
                    key, timeout
                )));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn check(&self, key: &str) -> Result<bool> {
        Ok(self.key_path(key).exists())
    }
}

/// Namespaces every key of an inner store under `prefix/`
#[derive(Debug, Clone)]
pub struct PrefixStore {
    prefix: String,
    inner: Arc<dyn Store>,
}

impl PrefixStore {
    pub fn new(prefix: impl Into<String>, inner: Arc<dyn Store>) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key)
    }
}

impl Store for PrefixStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner.set(&self.scoped(key), value)
    }

    fn get(&self, key: &str, timeout: Duration) -> Result<Vec<u8>> {
        self.inner.get(&self.scoped(key), timeout)
    }

    fn check(&self, key: &str) -> Result<bool> {
        self.inner.check(&self.scoped(key))
    }
}
