//! Coalescing of concurrent remote status reads.
//!
//! A [`SingleFlight`] runs at most one remote call at a time. Callers that
//! arrive while a call is in flight wait for it and receive the identical
//! result, errors included. Once a call completes, the next caller starts a
//! new one, but that call is held back until the cool-down window measured
//! from the previous completion has elapsed; callers arriving during that wait
//! join it as well.
//!
//! Results are never cached: a completed call, successful or not, is never
//! handed to a later caller.
//!
//! [`StatusFetcher`] keys one flight per lock device.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::{Instant, sleep};
use tracing::debug;

use sesame_types::RemoteStatus;

use crate::error::{Error, Result};
use crate::traits::LockApi;

/// Default cool-down between two remote status reads of the same device.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);

type SharedCall<T> = Shared<BoxFuture<'static, std::result::Result<T, Arc<Error>>>>;

/// Deduplicates concurrent calls of one operation.
pub struct SingleFlight<T: Clone> {
    in_flight: Arc<Mutex<Option<SharedCall<T>>>>,
    last_completed: Arc<Mutex<Option<Instant>>>,
    cooldown: Duration,
}

impl<T: Clone> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
            last_completed: Arc::clone(&self.last_completed),
            cooldown: self.cooldown,
        }
    }
}

impl<T: Clone> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a flight with the given cool-down.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(None)),
            last_completed: Arc::new(Mutex::new(None)),
            cooldown,
        }
    }

    /// The configured cool-down.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Run `call`, or join the call already in flight.
    ///
    /// `call` is only invoked when this caller becomes the leader. Every
    /// waiter of a failed call receives [`Error::Shared`] wrapping the
    /// original error.
    pub async fn run<F, Fut>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(pending) if pending.peek().is_none() => pending.clone(),
                _ => {
                    let leader = self.lead(call());
                    *slot = Some(leader.clone());
                    leader
                }
            }
        };

        shared.await.map_err(Error::Shared)
    }

    fn lead<Fut>(&self, call: Fut) -> SharedCall<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let delay = self
            .last_completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|done| (done + self.cooldown).saturating_duration_since(Instant::now()))
            .unwrap_or_default();
        let last_completed = Arc::clone(&self.last_completed);

        async move {
            if !delay.is_zero() {
                debug!("Deferring remote call by {:?} for cool-down", delay);
                sleep(delay).await;
            }
            let result = call.await.map_err(Arc::new);
            *last_completed.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
            result
        }
        .boxed()
        .shared()
    }
}

/// Keyed single-flight status reads, one flight per lock device.
pub struct StatusFetcher {
    api: Arc<dyn LockApi>,
    cooldown: Duration,
    flights: Mutex<HashMap<String, SingleFlight<RemoteStatus>>>,
}

impl std::fmt::Debug for StatusFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusFetcher")
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

impl StatusFetcher {
    /// Create a fetcher with the given cool-down.
    pub fn new(api: Arc<dyn LockApi>, cooldown: Duration) -> Self {
        Self {
            api,
            cooldown,
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Create a fetcher with [`DEFAULT_COOLDOWN`].
    pub fn with_default_cooldown(api: Arc<dyn LockApi>) -> Self {
        Self::new(api, DEFAULT_COOLDOWN)
    }

    /// Read the remote status of `device_id`, coalescing with concurrent reads.
    pub async fn fetch(&self, device_id: &str) -> Result<RemoteStatus> {
        let flight = self
            .flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(device_id.to_string())
            .or_insert_with(|| SingleFlight::new(self.cooldown))
            .clone();

        let api = Arc::clone(&self.api);
        let id = device_id.to_string();
        flight
            .run(move || async move { api.get_status(&id).await })
            .await
    }
}
