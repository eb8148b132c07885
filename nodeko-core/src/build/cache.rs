//! Build result caching.
//!
//! `Caching` wraps a builder in a layer that shares build results for the
//! same inputs using a single-assignment `Future`. Concurrent and repeated
//! requests for one key trigger exactly one inner build; cached results
//! (including errors) are replayed until the key is invalidated.

use crate::build::Builder;
use crate::error::{NodekoError, Result};
use crate::types::Image;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

type Producer<T> = BoxFuture<'static, Result<T>>;

/// A single-assignment concurrent value cell.
///
/// The producer runs exactly once, triggered by whichever caller first asks
/// for the value; every caller (including the triggering one) waits for it
/// to complete and then observes the identical result. Completing with an
/// error is permanent: the error is replayed, never retried.
pub struct Future<T> {
    producer: tokio::sync::Mutex<Option<Producer<T>>>,
    cell: OnceCell<std::result::Result<T, Arc<NodekoError>>>,
}

impl<T: Clone> Future<T> {
    /// Create an empty cell bound to `producer`.
    pub fn new(producer: impl std::future::Future<Output = Result<T>> + Send + 'static) -> Self {
        Self {
            producer: tokio::sync::Mutex::new(Some(producer.boxed())),
            cell: OnceCell::new(),
        }
    }

    /// Wait for the value, running the producer if nobody has yet.
    pub async fn get(&self) -> std::result::Result<T, Arc<NodekoError>> {
        self.cell
            .get_or_init(|| async {
                match self.producer.lock().await.take() {
                    Some(producer) => producer.await.map_err(Arc::new),
                    // Reachable only if a previous initialization was
                    // cancelled after taking the producer.
                    None => Err(Arc::new(NodekoError::Internal(
                        "build producer already consumed".to_string(),
                    ))),
                }
            })
            .await
            .clone()
    }
}

/// Caching decorator over a [`Builder`].
///
/// The map lock guards membership only, never the build computation, which
/// runs with the map unlocked. Requests for distinct keys therefore never
/// block one another, and requests for the same key serialize through the
/// shared `Future`.
pub struct Caching {
    inner: Arc<dyn Builder>,
    results: Mutex<HashMap<PathBuf, Arc<Future<Image>>>>,
}

impl Caching {
    /// Wrap `inner` so build results are shared per input key until
    /// invalidated.
    pub fn new(inner: Arc<dyn Builder>) -> Self {
        Self { inner, results: Mutex::new(HashMap::new()) }
    }

    /// Remove a key's cached result. A `Future` already handed to waiters is
    /// unaffected; the next `build` for the key starts fresh. No-op for keys
    /// never built.
    pub fn invalidate(&self, base_dir: &Path, path: &str) {
        let mut results = self.results.lock().expect("cache lock poisoned");
        results.remove(&cache_key(base_dir, path));
    }
}

#[async_trait]
impl Builder for Caching {
    /// Delegates uncached: the check is cheap and side-effect free, and
    /// caching it would only add staleness.
    fn is_supported_reference(&self, base_dir: &Path, path: &str) -> Option<String> {
        self.inner.is_supported_reference(base_dir, path)
    }

    async fn build(&self, base_dir: &Path, path: &str) -> Result<Image> {
        let future = {
            let mut results = self.results.lock().expect("cache lock poisoned");
            let key = cache_key(base_dir, path);
            match results.get(&key) {
                Some(future) => Arc::clone(future),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let (base_dir, path) = (base_dir.to_path_buf(), path.to_string());
                    let future = Arc::new(Future::new(async move {
                        inner.build(&base_dir, &path).await
                    }));
                    results.insert(key, Arc::clone(&future));
                    future
                }
            }
        };

        // Await outside the lock; the expensive work runs with the map free.
        future.get().await.map_err(NodekoError::from)
    }
}

/// Normalized join of the base directory and relative path, so spellings
/// like `./app` and `app` share a cache entry.
fn cache_key(base_dir: &Path, path: &str) -> PathBuf {
    let mut key = PathBuf::new();
    for component in base_dir.join(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                key.pop();
            }
            other => key.push(other),
        }
    }
    key
}
