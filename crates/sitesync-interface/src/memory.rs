//! In-memory collaborators
//!
//! `MemoryContentStore` and `MemoryLedger` implement the collaborator traits
//! without any network. They are used by tests and by offline planning, and
//! both support failure injection so partial-failure paths can be exercised.

use crate::{
    CapabilityId, CollectionId, ContentLocator, ContentStoreClient, InterfaceError, LedgerClient,
    LedgerMutation, LedgerOutcome, RemoteResource, ResourcePage, Result,
};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, PoisonError, RwLock};

const DEFAULT_STORAGE_EPOCHS: u64 = 5;
const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Default)]
struct StoreState {
    blobs: HashMap<String, Vec<u8>>,
    puts: usize,
    fail_after: Option<usize>,
}

/// Content-addressed in-memory store
///
/// Blob ids are the SHA-256 of the stored bytes, so storing the same bytes
/// twice yields the same locator.
#[derive(Debug, Clone)]
pub struct MemoryContentStore {
    state: Arc<RwLock<StoreState>>,
    current_epoch: u64,
    storage_epochs: u64,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::with_epochs(0, DEFAULT_STORAGE_EPOCHS)
    }

    /// Create a store whose locators expire `storage_epochs` after `current_epoch`
    pub fn with_epochs(current_epoch: u64, storage_epochs: u64) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            current_epoch,
            storage_epochs,
        }
    }

    /// Fail every `put` after `successful` puts have succeeded
    pub fn fail_after(&self, successful: usize) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_after = Some(successful);
    }

    /// Number of successful puts so far
    pub fn put_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .puts
    }

    /// Number of distinct blobs held
    pub fn blob_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .blobs
            .len()
    }

    pub fn contains(&self, locator: &ContentLocator) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .blobs
            .contains_key(locator.blob_id())
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ContentStoreClient for MemoryContentStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentLocator> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(limit) = state.fail_after {
            if state.puts >= limit {
                return Err(InterfaceError::ContentStore(
                    "injected upload failure".to_string(),
                ));
            }
        }

        let blob_id = hex::encode(Sha256::digest(&bytes));
        state.blobs.insert(blob_id.clone(), bytes);
        state.puts += 1;

        Ok(ContentLocator::new(
            blob_id,
            self.current_epoch + self.storage_epochs,
        ))
    }

    async fn get(&self, locator: &ContentLocator) -> Result<Vec<u8>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .blobs
            .get(locator.blob_id())
            .cloned()
            .ok_or_else(|| InterfaceError::NotFound(locator.blob_id().to_string()))
    }
}

#[derive(Debug)]
struct CollectionState {
    name: String,
    capability: CapabilityId,
    resources: BTreeMap<String, RemoteResource>,
}

#[derive(Debug, Default)]
struct LedgerState {
    collections: HashMap<CollectionId, CollectionState>,
    next_id: u64,
    submissions: usize,
    confirmed: usize,
    fail_submit_after: Option<usize>,
    fail_listing: bool,
    fail_create: bool,
}

impl LedgerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory ledger with capability checks and idempotent mutations
///
/// Transactions are atomic: if any mutation in a submission is invalid, the
/// whole submission is reported as `LedgerOutcome::Failed` and nothing changes.
#[derive(Debug, Clone)]
pub struct MemoryLedger {
    state: Arc<RwLock<LedgerState>>,
    page_size: usize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::default())),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the number of resources returned per listing page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Insert a collection with existing resources, bypassing transactions
    pub fn seed_collection(
        &self,
        name: &str,
        resources: Vec<RemoteResource>,
    ) -> (CollectionId, CapabilityId) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let id = state.next_id();
        let collection = CollectionId::new(format!("0x{:016x}", id));
        let capability = CapabilityId::new(format!("cap-{:016x}", id));

        let resources = resources
            .into_iter()
            .map(|r| (r.path.clone(), r))
            .collect();

        state.collections.insert(
            collection.clone(),
            CollectionState {
                name: name.to_string(),
                capability: capability.clone(),
                resources,
            },
        );

        (collection, capability)
    }

    /// Report every submission after `confirmed` confirmed ones as failed
    pub fn fail_submissions_after(&self, confirmed: usize) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_submit_after = Some(confirmed);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_listing = fail;
    }

    pub fn fail_create(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_create = fail;
    }

    /// Drop every injected failure
    pub fn clear_failures(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.fail_submit_after = None;
        state.fail_listing = false;
        state.fail_create = false;
    }

    /// Current resources of a collection, ordered by path
    pub fn resources(&self, collection: &CollectionId) -> Vec<RemoteResource> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .collections
            .get(collection)
            .map(|c| c.resources.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn collection_name(&self, collection: &CollectionId) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .collections
            .get(collection)
            .map(|c| c.name.clone())
    }

    /// Number of `submit` calls received, confirmed or not
    pub fn submission_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .submissions
    }

    pub fn confirmed_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .confirmed
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply one mutation, returning whether it changed state
fn apply_mutation(
    resources: &mut BTreeMap<String, RemoteResource>,
    mutation: LedgerMutation,
) -> std::result::Result<bool, String> {
    match mutation {
        LedgerMutation::AddResource {
            path,
            locator,
            hash,
            size,
            ..
        } => match resources.get(&path) {
            Some(existing) if existing.hash == hash => Ok(false),
            Some(_) => Err(format!("resource {} already exists", path)),
            None => {
                resources.insert(
                    path.clone(),
                    RemoteResource {
                        path,
                        locator,
                        hash,
                        size,
                    },
                );
                Ok(true)
            }
        },
        LedgerMutation::UpdateResource {
            path,
            locator,
            hash,
            size,
        } => match resources.get(&path) {
            Some(existing) if existing.hash == hash => Ok(false),
            Some(_) => {
                resources.insert(
                    path.clone(),
                    RemoteResource {
                        path,
                        locator,
                        hash,
                        size,
                    },
                );
                Ok(true)
            }
            None => Err(format!("resource {} does not exist", path)),
        },
        LedgerMutation::DeleteResource { path } => Ok(resources.remove(&path).is_some()),
        LedgerMutation::DeleteResources { paths } => {
            let mut changed = false;
            for path in paths {
                changed |= resources.remove(&path).is_some();
            }
            Ok(changed)
        }
    }
}

#[async_trait::async_trait]
impl LedgerClient for MemoryLedger {
    async fn create_collection(&self, name: &str) -> Result<LedgerOutcome> {
        if self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_create
        {
            return Ok(LedgerOutcome::Failed {
                tx_digest: None,
                reason: "injected create failure".to_string(),
            });
        }

        let (collection, capability) = self.seed_collection(name, Vec::new());
        Ok(LedgerOutcome::Created {
            tx_digest: format!("tx-create-{}", collection),
            collection,
            capability,
        })
    }

    async fn list_resources(
        &self,
        collection: &CollectionId,
        cursor: Option<&str>,
    ) -> Result<ResourcePage> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.fail_listing {
            return Err(InterfaceError::Ledger(
                "injected listing failure".to_string(),
            ));
        }

        let entry = state
            .collections
            .get(collection)
            .ok_or_else(|| InterfaceError::UnknownCollection(collection.clone()))?;

        let lower = match cursor {
            Some(c) => Bound::Excluded(c),
            None => Bound::Unbounded,
        };
        let mut remaining = entry
            .resources
            .range::<str, _>((lower, Bound::Unbounded))
            .map(|(_, r)| r.clone())
            .peekable();

        let mut resources = Vec::with_capacity(self.page_size);
        while resources.len() < self.page_size {
            match remaining.next() {
                Some(r) => resources.push(r),
                None => break,
            }
        }

        let next_cursor = match (remaining.peek(), resources.last()) {
            (Some(_), Some(last)) => Some(last.path.clone()),
            _ => None,
        };

        Ok(ResourcePage {
            resources,
            next_cursor,
        })
    }

    async fn submit(
        &self,
        capability: &CapabilityId,
        collection: &CollectionId,
        mutations: Vec<LedgerMutation>,
    ) -> Result<LedgerOutcome> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.submissions += 1;

        if let Some(limit) = state.fail_submit_after {
            if state.confirmed >= limit {
                return Ok(LedgerOutcome::Failed {
                    tx_digest: None,
                    reason: "injected commit failure".to_string(),
                });
            }
        }

        let entry = state
            .collections
            .get(collection)
            .ok_or_else(|| InterfaceError::UnknownCollection(collection.clone()))?;
        if entry.capability != *capability {
            return Err(InterfaceError::Unauthorized {
                capability: capability.clone(),
                collection: collection.clone(),
            });
        }

        let mut next = entry.resources.clone();
        let mut applied = 0;
        for mutation in mutations {
            match apply_mutation(&mut next, mutation) {
                Ok(changed) => applied += usize::from(changed),
                Err(reason) => {
                    return Ok(LedgerOutcome::Failed {
                        tx_digest: None,
                        reason,
                    })
                }
            }
        }

        let id = state.next_id();
        if let Some(entry) = state.collections.get_mut(collection) {
            entry.resources = next;
        }
        state.confirmed += 1;

        Ok(LedgerOutcome::Mutated {
            tx_digest: format!("tx-{:016x}", id),
            applied,
        })
    }
}
