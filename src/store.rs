//! Per-page transcript cache with request collapsing.
//!
//! A key is `(video_id, language key)`. The first request for a key starts the
//! fetch and parks a shared future in the map; later requests for the same key
//! await that same future. Successful results are kept until `invalidate`,
//! failures are dropped so the next explicit request retries.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::CaptionResult;
use crate::transcript::{Transcript, language_key};

type SharedFetch = Shared<BoxFuture<'static, CaptionResult<Arc<Transcript>>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StoreKey {
  video_id: String,
  language: String,
}

enum Slot {
  Ready(Arc<Transcript>),
  InFlight(SharedFetch),
}

#[derive(Default)]
struct Inner {
  generation: u64,
  slots: HashMap<StoreKey, Slot>,
}

#[derive(Default)]
pub struct TranscriptStore {
  inner: Mutex<Inner>,
}

impl TranscriptStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Cached transcript for the key, or the result of `fetch`, shared with any
  /// concurrent caller of the same key.
  pub async fn get_or_fetch<F>(&self, video_id: &str, code: Option<&str>, fetch: F) -> CaptionResult<Arc<Transcript>>
  where
    F: Future<Output = CaptionResult<Transcript>> + Send + 'static,
  {
    let key = StoreKey { video_id: video_id.to_string(), language: language_key(code) };

    let (shared, generation) = {
      let mut inner = self.lock();
      let generation = inner.generation;
      let joined = match inner.slots.get(&key) {
        Some(Slot::Ready(transcript)) => {
          debug!(video_id = %key.video_id, language = %key.language, "store: hit");
          return Ok(Arc::clone(transcript));
        }
        Some(Slot::InFlight(shared)) => Some(shared.clone()),
        None => None,
      };
      match joined {
        Some(shared) => {
          debug!(video_id = %key.video_id, language = %key.language, "store: joining in-flight fetch");
          (shared, generation)
        }
        None => {
          let shared = fetch.map(|result| result.map(Arc::new)).boxed().shared();
          inner.slots.insert(key.clone(), Slot::InFlight(shared.clone()));
          (shared, generation)
        }
      }
    };

    let result = shared.await;

    let mut inner = self.lock();
    if inner.generation != generation {
      debug!(video_id = %key.video_id, language = %key.language, "store: result from an invalidated page dropped");
      return result;
    }
    match &result {
      Ok(transcript) => {
        if matches!(inner.slots.get(&key), Some(Slot::InFlight(_))) {
          info!(video_id = %key.video_id, language = %key.language, entries = transcript.len(), "store: cached");
          inner.slots.insert(key, Slot::Ready(Arc::clone(transcript)));
        }
      }
      Err(_) => {
        if matches!(inner.slots.get(&key), Some(Slot::InFlight(_))) {
          inner.slots.remove(&key);
        }
      }
    }
    result
  }

  /// Forget everything. Fetches already running still answer their waiters
  /// but are never stored.
  pub fn invalidate(&self) {
    let mut inner = self.lock();
    inner.generation += 1;
    let dropped = inner.slots.len();
    inner.slots.clear();
    info!(dropped, generation = inner.generation, "store: invalidated");
  }

  #[cfg(test)]
  pub fn cached(&self, video_id: &str, code: Option<&str>) -> Option<Arc<Transcript>> {
    let key = StoreKey { video_id: video_id.to_string(), language: language_key(code) };
    match self.lock().slots.get(&key) {
      Some(Slot::Ready(transcript)) => Some(Arc::clone(transcript)),
      _ => None,
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}
