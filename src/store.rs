//! Policy storage seam and the immutable snapshots built from it.
//!
//! The store itself lives outside this crate. It exposes paginated listings
//! of the four policy collections; [`PolicySnapshot::load`] drains them into
//! one point-in-time view that the decision point evaluates against.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuthzError;
use crate::types::{Attribute, Obligation, RegisteredResource, SubjectMapping};

/// Page size used when draining a collection.
pub const DEFAULT_PAGE_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: i64,
    pub limit: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// One page of a listing. A `next_offset` of zero or less ends the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_offset: i64,
}

/// Paginated read access to active policy objects.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn list_attributes(&self, page: PageRequest) -> Result<Page<Attribute>, AuthzError>;

    async fn list_subject_mappings(
        &self,
        page: PageRequest,
    ) -> Result<Page<SubjectMapping>, AuthzError>;

    async fn list_registered_resources(
        &self,
        page: PageRequest,
    ) -> Result<Page<RegisteredResource>, AuthzError>;

    async fn list_obligations(&self, page: PageRequest) -> Result<Page<Obligation>, AuthzError>;
}

/// Drain every page of one collection.
pub async fn list_all<T, F, Fut>(mut fetch: F) -> Result<Vec<T>, AuthzError>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, AuthzError>>,
{
    let mut items = Vec::new();
    let mut request = PageRequest::default();
    loop {
        let page = fetch(request).await?;
        items.extend(page.items);
        if page.next_offset <= 0 {
            break;
        }
        request.offset = page.next_offset;
    }
    Ok(items)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotVersion {
    /// Increases by one for every successful load.
    pub generation: u64,
    pub refreshed_at: SystemTime,
}

/// Point-in-time view of the policy collections. Never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySnapshot {
    pub attributes: Vec<Attribute>,
    pub subject_mappings: Vec<SubjectMapping>,
    pub registered_resources: Vec<RegisteredResource>,
    pub obligations: Vec<Obligation>,
    pub version: SnapshotVersion,
}

impl PolicySnapshot {
    pub fn new(
        attributes: Vec<Attribute>,
        subject_mappings: Vec<SubjectMapping>,
        registered_resources: Vec<RegisteredResource>,
        obligations: Vec<Obligation>,
    ) -> Self {
        PolicySnapshot {
            attributes,
            subject_mappings,
            registered_resources,
            obligations,
            version: SnapshotVersion {
                generation: 0,
                refreshed_at: SystemTime::now(),
            },
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new(), Vec::new(), Vec::new())
    }

    /// Drain all four collections from `store`.
    pub async fn load(store: &dyn PolicyStore, generation: u64) -> Result<Self, AuthzError> {
        let attributes = list_all(|page| store.list_attributes(page)).await?;
        let subject_mappings = list_all(|page| store.list_subject_mappings(page)).await?;
        let registered_resources = list_all(|page| store.list_registered_resources(page)).await?;
        let obligations = list_all(|page| store.list_obligations(page)).await?;

        debug!(
            event = "Snapshot",
            phase = "Loaded",
            generation,
            attributes = attributes.len(),
            subject_mappings = subject_mappings.len(),
            registered_resources = registered_resources.len(),
            obligations = obligations.len()
        );

        Ok(PolicySnapshot {
            attributes,
            subject_mappings,
            registered_resources,
            obligations,
            version: SnapshotVersion {
                generation,
                refreshed_at: SystemTime::now(),
            },
        })
    }
}

/// Anything that can hand out the current snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> Result<Arc<PolicySnapshot>, AuthzError>;
}

#[async_trait]
impl SnapshotSource for Arc<PolicySnapshot> {
    async fn snapshot(&self) -> Result<Arc<PolicySnapshot>, AuthzError> {
        Ok(Arc::clone(self))
    }
}

/// Loads a fresh snapshot from the store on every call. Used when the cache
/// is disabled.
pub struct DirectStoreSource {
    store: Arc<dyn PolicyStore>,
    generation: AtomicU64,
}

impl DirectStoreSource {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        DirectStoreSource {
            store,
            generation: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl SnapshotSource for DirectStoreSource {
    async fn snapshot(&self) -> Result<Arc<PolicySnapshot>, AuthzError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Arc::new(
            PolicySnapshot::load(self.store.as_ref(), generation).await?,
        ))
    }
}

#[derive(Debug, Default)]
struct MemoryCollections {
    attributes: Vec<Attribute>,
    subject_mappings: Vec<SubjectMapping>,
    registered_resources: Vec<RegisteredResource>,
    obligations: Vec<Obligation>,
}

/// An in-memory [`PolicyStore`], for embedding and tests.
///
/// Pages are served with the requested limit. `set_failing(true)` makes every
/// listing fail, and `list_calls()` counts listing requests.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    collections: RwLock<MemoryCollections>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attributes(self, attributes: Vec<Attribute>) -> Self {
        if let Ok(mut c) = self.collections.write() {
            c.attributes = attributes;
        }
        self
    }

    pub fn with_subject_mappings(self, subject_mappings: Vec<SubjectMapping>) -> Self {
        if let Ok(mut c) = self.collections.write() {
            c.subject_mappings = subject_mappings;
        }
        self
    }

    pub fn with_registered_resources(self, registered_resources: Vec<RegisteredResource>) -> Self {
        if let Ok(mut c) = self.collections.write() {
            c.registered_resources = registered_resources;
        }
        self
    }

    pub fn with_obligations(self, obligations: Vec<Obligation>) -> Self {
        if let Ok(mut c) = self.collections.write() {
            c.obligations = obligations;
        }
        self
    }

    /// Replace the stored attributes of a live store.
    pub fn set_attributes(&self, attributes: Vec<Attribute>) -> Result<(), AuthzError> {
        self.collections.write()?.attributes = attributes;
        Ok(())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn page_of<T: Clone>(
        &self,
        page: PageRequest,
        select: impl Fn(&MemoryCollections) -> &Vec<T>,
    ) -> Result<Page<T>, AuthzError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthzError::Store("memory store is failing".to_string()));
        }
        let collections = self.collections.read()?;
        let all = select(&collections);
        let start = usize::try_from(page.offset.max(0)).unwrap_or(0).min(all.len());
        let limit = usize::try_from(page.limit.max(1)).unwrap_or(1);
        let end = start.saturating_add(limit).min(all.len());
        let next_offset = if end < all.len() { end as i64 } else { 0 };
        Ok(Page {
            items: all[start..end].to_vec(),
            next_offset,
        })
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn list_attributes(&self, page: PageRequest) -> Result<Page<Attribute>, AuthzError> {
        self.page_of(page, |c| &c.attributes)
    }

    async fn list_subject_mappings(
        &self,
        page: PageRequest,
    ) -> Result<Page<SubjectMapping>, AuthzError> {
        self.page_of(page, |c| &c.subject_mappings)
    }

    async fn list_registered_resources(
        &self,
        page: PageRequest,
    ) -> Result<Page<RegisteredResource>, AuthzError> {
        self.page_of(page, |c| &c.registered_resources)
    }

    async fn list_obligations(&self, page: PageRequest) -> Result<Page<Obligation>, AuthzError> {
        self.page_of(page, |c| &c.obligations)
    }
}
