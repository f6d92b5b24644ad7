//! Retrying of unprocessed batch write items.

use super::{Error, Result};
use rand::Rng;
use serde::Deserialize;
use std::{any::Any, fmt, future::Future, time::Duration};
use tracing::warn;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchWriteRetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Randomizes each delay to between 50% and 100% of its computed value.
    pub jitter: bool,
}

impl Default for BatchWriteRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 8,
            base_delay_ms: 100,
            max_delay_ms: 20_000,
            jitter: true,
        }
    }
}

impl BatchWriteRetryConfig {
    /// The delay before retry number `attempt` (0-indexed): `base * 2^attempt`, capped at the
    /// maximum delay.
    pub fn delay_before_retry(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay_ms.saturating_mul(1u64 << attempt.min(32));
        let capped = exponential.min(self.max_delay_ms);
        if !self.jitter || capped == 0 {
            return Duration::from_millis(capped);
        }
        Duration::from_millis(rand::thread_rng().gen_range(capped / 2..=capped))
    }
}

/// Entities that could not be written after the retry budget was spent.
#[derive(thiserror::Error)]
#[error("{} entities were not processed after {retries} retries", .unprocessed.len())]
pub struct BatchWriteError {
    unprocessed: Vec<Box<dyn Any + Send + Sync>>,
    pub retries: u32,
    /// Set when the last attempt failed outright rather than leaving items unprocessed.
    #[source]
    pub cause: Option<Box<Error>>,
}

impl BatchWriteError {
    pub fn new<T: Send + Sync + 'static>(unprocessed: Vec<T>, retries: u32, cause: Option<Error>) -> Self {
        Self {
            unprocessed: unprocessed.into_iter().map(|e| Box::new(e) as Box<dyn Any + Send + Sync>).collect(),
            retries,
            cause: cause.map(Box::new),
        }
    }

    /// The unprocessed entities of type `T`. Entities of other types are skipped.
    pub fn unprocessed_entities<T: Clone + 'static>(&self) -> Vec<T> {
        self.unprocessed.iter().filter_map(|e| e.downcast_ref::<T>()).cloned().collect()
    }

    pub fn unprocessed_count(&self) -> usize {
        self.unprocessed.len()
    }
}

impl fmt::Debug for BatchWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchWriteError")
            .field("unprocessed", &self.unprocessed.len())
            .field("retries", &self.retries)
            .field("cause", &self.cause)
            .finish()
    }
}

/// Runs `attempt` until it reports no unprocessed entities. Each call receives the entities still
/// pending and returns the ones the store did not process.
pub async fn write_with_retry<T, F, Fut>(config: &BatchWriteRetryConfig, entities: Vec<T>, mut attempt: F) -> Result<()>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut pending = entities;
    let mut retries = 0;
    while !pending.is_empty() {
        match attempt(pending.clone()).await {
            Ok(unprocessed) if unprocessed.is_empty() => return Ok(()),
            Ok(unprocessed) => {
                if retries >= config.max_retries {
                    return Err(BatchWriteError::new(unprocessed, retries, None).into());
                }
                let delay = config.delay_before_retry(retries);
                warn!(
                    retry = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    unprocessed = unprocessed.len(),
                    "retrying unprocessed batch write items"
                );
                tokio::time::sleep(delay).await;
                retries += 1;
                pending = unprocessed;
            }
            Err(e) => return Err(BatchWriteError::new(pending, retries, Some(e)).into()),
        }
    }
    Ok(())
}
