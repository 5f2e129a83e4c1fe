//! KEEL - Background Sweeper
//! One thread per typed collection that periodically removes expired keys.
//! Stopping drops the channel sender, which wakes the thread at once.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use super::collections::TypedCollection;
use super::metrics::EngineMetrics;
use super::ttl::TtlRegistry;
use crate::error::Result;

pub struct Sweeper {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Start sweeping `collection` every `interval`.
    pub fn spawn(
        collection: Arc<dyn TypedCollection>,
        ttl: Arc<TtlRegistry>,
        metrics: Arc<EngineMetrics>,
        interval: Duration,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let kind = collection.collection_type();
        let handle = thread::Builder::new()
            .name(format!("keel-sweeper-{}", kind))
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match collection.sweep(&ttl) {
                        Ok(0) => {}
                        Ok(removed) => {
                            metrics.record_swept(removed);
                            log::debug!("Swept {} expired {} keys", removed, kind);
                        }
                        Err(e) => log::error!("Sweep of {} collection failed: {}", kind, e),
                    },
                    // Stop signal or sender dropped.
                    _ => break,
                }
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to finish its current sweep.
    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Sweeper thread panicked");
            }
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::collections::HashStore;
    use crate::types::{unix_secs, CollectionType};
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    #[test]
    fn test_sweeper_removes_expired_keys() {
        let ttl = Arc::new(TtlRegistry::new());
        let metrics = Arc::new(EngineMetrics::new());
        let hashes = Arc::new(HashStore::new(None));
        hashes.hset(b"gone".to_vec(), b"f".to_vec(), b"v".to_vec()).unwrap();
        hashes.hset(b"kept".to_vec(), b"f".to_vec(), b"v".to_vec()).unwrap();
        hashes.expire_at(b"gone", unix_secs() - 1, &ttl).unwrap();

        let mut sweeper = Sweeper::spawn(
            hashes.clone(),
            ttl.clone(),
            metrics.clone(),
            Duration::from_millis(10),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while hashes.contains(b"gone").unwrap() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        sweeper.stop();

        assert!(!hashes.contains(b"gone").unwrap());
        assert!(hashes.contains(b"kept").unwrap());
        assert_eq!(ttl.get_ttl(CollectionType::Hash, b"gone"), None);
        assert_eq!(metrics.swept_keys.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_stop_is_prompt_and_idempotent() {
        let mut sweeper = Sweeper::spawn(
            Arc::new(HashStore::new(None)),
            Arc::new(TtlRegistry::new()),
            Arc::new(EngineMetrics::new()),
            Duration::from_secs(3600),
        )
        .unwrap();
        assert!(sweeper.is_running());

        let started = Instant::now();
        sweeper.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!sweeper.is_running());
        sweeper.stop();
    }
}
