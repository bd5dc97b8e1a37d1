//! Entitlement-policy cache: a periodically refreshed [`PolicySnapshot`].
//!
//! Readers load the current snapshot through an [`ArcSwapOption`] and never
//! block on a refresh. A refresh builds a complete new snapshot and publishes
//! it with one pointer swap; a failed refresh leaves the previous snapshot in
//! place.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::AuthzError;
use crate::metrics::{RefreshStats, record_refresh};
use crate::store::{PolicySnapshot, PolicyStore, SnapshotSource};
use crate::types::{Attribute, Obligation, RegisteredResource, SubjectMapping};

/// How long [`EntitlementPolicyCache::stop`] waits for the refresh task.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared snapshot holder with a background refresh task.
///
/// Built by [`EntitlementPolicyCache::start`], which loads the first snapshot
/// before returning. Concurrent [`refresh`](Self::refresh) calls coalesce
/// into one store listing.
pub struct EntitlementPolicyCache {
    store: Arc<dyn PolicyStore>,
    current: ArcSwapOption<PolicySnapshot>,
    refresh_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    interval: Duration,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EntitlementPolicyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementPolicyCache")
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .field("interval", &self.interval)
            .finish()
    }
}

impl EntitlementPolicyCache {
    /// Load the first snapshot and start the periodic refresh task.
    ///
    /// Fails with [`AuthzError::CacheDisabled`] when caching is off or the
    /// interval is zero, and with the store's error when the first load fails.
    pub async fn start(
        store: Arc<dyn PolicyStore>,
        config: &CacheConfig,
    ) -> Result<Arc<Self>, AuthzError> {
        if !config.enabled {
            return Err(AuthzError::CacheDisabled);
        }
        config.validate()?;

        let cache = Arc::new(EntitlementPolicyCache {
            store,
            current: ArcSwapOption::from(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            interval: config.refresh_interval(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });

        cache.refresh().await?;

        let handle = tokio::spawn(refresh_loop(
            Arc::downgrade(&cache),
            cache.cancel.clone(),
            cache.interval,
        ));
        *cache.task.lock()? = Some(handle);

        info!(
            event = "Cache",
            phase = "Started",
            interval_secs = cache.interval.as_secs()
        );
        Ok(cache)
    }

    /// Reload every collection and publish the result.
    ///
    /// Callers are serialized. A caller that waited while another refresh
    /// succeeded returns without listing again.
    pub async fn refresh(&self) -> Result<(), AuthzError> {
        let observed = self.generation.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;
        if self.generation.load(Ordering::SeqCst) != observed {
            debug!(event = "Cache", phase = "Refresh", "Coalesced with a concurrent refresh");
            return Ok(());
        }

        let generation = observed + 1;
        match PolicySnapshot::load(self.store.as_ref(), generation).await {
            Ok(snapshot) => {
                record_refresh(RefreshStats {
                    refreshed_at: snapshot.version.refreshed_at,
                    attributes: snapshot.attributes.len(),
                    subject_mappings: snapshot.subject_mappings.len(),
                    registered_resources: snapshot.registered_resources.len(),
                    obligations: snapshot.obligations.len(),
                    succeeded: true,
                });
                self.current.store(Some(Arc::new(snapshot)));
                self.generation.store(generation, Ordering::SeqCst);
                debug!(event = "Cache", phase = "Refresh", generation, "Snapshot published");
                Ok(())
            }
            Err(err) => {
                warn!(
                    event = "Cache",
                    phase = "Refresh",
                    error = %err,
                    "Refresh failed, keeping previous snapshot"
                );
                self.record_failure();
                Err(err)
            }
        }
    }

    fn record_failure(&self) {
        let previous = self.current.load_full();
        let count = |f: fn(&PolicySnapshot) -> usize| previous.as_deref().map(f).unwrap_or(0);
        record_refresh(RefreshStats {
            refreshed_at: SystemTime::now(),
            attributes: count(|s| s.attributes.len()),
            subject_mappings: count(|s| s.subject_mappings.len()),
            registered_resources: count(|s| s.registered_resources.len()),
            obligations: count(|s| s.obligations.len()),
            succeeded: false,
        });
    }

    /// The published snapshot, if any load has succeeded.
    pub fn current(&self) -> Option<Arc<PolicySnapshot>> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn list_all_attributes(&self) -> Vec<Attribute> {
        self.current()
            .map(|s| s.attributes.clone())
            .unwrap_or_default()
    }

    pub fn list_all_subject_mappings(&self) -> Vec<SubjectMapping> {
        self.current()
            .map(|s| s.subject_mappings.clone())
            .unwrap_or_default()
    }

    pub fn list_all_registered_resources(&self) -> Vec<RegisteredResource> {
        self.current()
            .map(|s| s.registered_resources.clone())
            .unwrap_or_default()
    }

    pub fn list_all_obligations(&self) -> Vec<Obligation> {
        self.current()
            .map(|s| s.obligations.clone())
            .unwrap_or_default()
    }

    /// Signal the refresh task and wait up to [`STOP_TIMEOUT`] for it.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = match self.task.lock() {
            Ok(mut slot) => slot.take(),
            Err(err) => {
                warn!(event = "Cache", phase = "Stop", error = %err, "Task slot poisoned");
                None
            }
        };
        let Some(handle) = handle else {
            return;
        };
        let abort = handle.abort_handle();
        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(_) => info!(event = "Cache", phase = "Stopped"),
            Err(_) => {
                warn!(
                    event = "Cache",
                    phase = "Stop",
                    timeout_secs = STOP_TIMEOUT.as_secs(),
                    "Refresh task did not stop in time, aborting"
                );
                abort.abort();
            }
        }
    }
}

async fn refresh_loop(
    cache: std::sync::Weak<EntitlementPolicyCache>,
    cancel: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and the initial load already ran.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                match tokio::time::timeout(interval / 2, cache.refresh()).await {
                    Ok(Ok(())) => {}
                    // Already logged by refresh().
                    Ok(Err(_)) => {}
                    Err(_) => {
                        let err = AuthzError::RefreshTimeout(format!("{:?}", interval / 2));
                        warn!(event = "Cache", phase = "Refresh", error = %err);
                        cache.record_failure();
                    }
                }
            }
        }
    }
}

#[async_trait]
impl SnapshotSource for EntitlementPolicyCache {
    async fn snapshot(&self) -> Result<Arc<PolicySnapshot>, AuthzError> {
        Ok(self
            .current()
            .unwrap_or_else(|| Arc::new(PolicySnapshot::empty())))
    }
}
