//! Sitesync Interface: the collaborator boundary
//!
//! This crate defines the two external systems the deployment engine talks to:
//!
//! 1. **Content store** (`ContentStoreClient`): stores bytes and hands back an
//!    opaque `ContentLocator` that expires at a store-owned epoch.
//! 2. **Ledger** (`LedgerClient`): holds collections of resources. Every
//!    mutation is gated by a `CapabilityId` issued when the collection was
//!    created, and a collection's current resource set can be read back in
//!    pages.
//!
//! Responses are decoded once, here, into tagged values (`LedgerOutcome`)
//! so the engine never inspects loosely-shaped records.
//!
//! # Example
//!
//! ```rust,no_run
//! use sitesync_interface::{ContentStoreClient, LedgerClient, LedgerOutcome};
//!
//! async fn publish_one<S: ContentStoreClient, L: LedgerClient>(
//!     store: &S,
//!     ledger: &L,
//! ) -> sitesync_interface::Result<()> {
//!     let locator = store.put(b"<h1>hello</h1>".to_vec()).await?;
//!     if let LedgerOutcome::Created { collection, capability, .. } =
//!         ledger.create_collection("my-site").await?
//!     {
//!         ledger
//!             .add_resource(&capability, &collection, "/index.html", locator, "00".repeat(32), 14, "text/html")
//!             .await?;
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod memory;

pub use memory::{MemoryContentStore, MemoryLedger};

#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Content store error: {0}")]
    ContentStore(String),

    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(CollectionId),

    #[error("Capability {capability} does not authorize collection {collection}")]
    Unauthorized {
        capability: CapabilityId,
        collection: CollectionId,
    },
}

pub type Result<T> = std::result::Result<T, InterfaceError>;

/// Opaque reference to stored bytes, as returned by the content store.
///
/// The engine never looks inside `blob_id`; it only carries the locator into
/// ledger mutations and reports `expiry_epoch` when content ends up orphaned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentLocator {
    blob_id: String,
    expiry_epoch: u64,
}

impl ContentLocator {
    pub fn new(blob_id: impl Into<String>, expiry_epoch: u64) -> Self {
        Self {
            blob_id: blob_id.into(),
            expiry_epoch,
        }
    }

    pub fn blob_id(&self) -> &str {
        &self.blob_id
    }

    /// Epoch after which the store may drop the content
    pub fn expiry_epoch(&self) -> u64 {
        self.expiry_epoch
    }
}

impl fmt::Display for ContentLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (expires epoch {})", self.blob_id, self.expiry_epoch)
    }
}

/// Ledger-side identity of a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(String);

impl CollectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unforgeable token authorizing mutation of one collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(String);

impl CapabilityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resource as the ledger reports it.
///
/// Fields are untrusted strings; the engine validates `path` and `hash`
/// before using them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResource {
    pub path: String,
    pub locator: ContentLocator,
    pub hash: String,
    pub size: u64,
}

/// One page of a collection's resource listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePage {
    pub resources: Vec<RemoteResource>,

    /// Cursor for the next page, `None` on the last page
    pub next_cursor: Option<String>,
}

/// A single resource mutation inside a ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerMutation {
    AddResource {
        path: String,
        locator: ContentLocator,
        hash: String,
        size: u64,
        content_type: String,
    },
    UpdateResource {
        path: String,
        locator: ContentLocator,
        hash: String,
        size: u64,
    },
    DeleteResource {
        path: String,
    },
    /// Batched delete of several paths in one mutation
    DeleteResources {
        paths: Vec<String>,
    },
}

impl LedgerMutation {
    /// Paths touched by this mutation
    pub fn paths(&self) -> Vec<&str> {
        match self {
            LedgerMutation::AddResource { path, .. }
            | LedgerMutation::UpdateResource { path, .. }
            | LedgerMutation::DeleteResource { path } => vec![path.as_str()],
            LedgerMutation::DeleteResources { paths } => {
                paths.iter().map(String::as_str).collect()
            }
        }
    }
}

/// Tagged result of a ledger call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// A collection was created; the capability gates all later mutations
    Created {
        collection: CollectionId,
        capability: CapabilityId,
        tx_digest: String,
    },

    /// A transaction was confirmed. `applied` counts mutations that changed
    /// state; resubmitted no-op mutations are not counted.
    Mutated { tx_digest: String, applied: usize },

    /// The ledger rejected or failed the transaction
    Failed {
        tx_digest: Option<String>,
        reason: String,
    },
}

/// Content-addressed storage collaborator
#[async_trait]
pub trait ContentStoreClient: Send + Sync + 'static {
    /// Store bytes and return a locator for them
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentLocator>;

    /// Fetch previously stored bytes
    ///
    /// # Errors
    ///
    /// Returns `InterfaceError::NotFound` if the content expired or never existed.
    async fn get(&self, locator: &ContentLocator) -> Result<Vec<u8>>;
}

/// Capability-gated ledger collaborator
///
/// Implementations must treat an `AddResource` or `UpdateResource` whose hash
/// already matches the stored resource as a no-op, so a resubmitted
/// transaction is harmless.
#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    /// Create a new, empty collection
    async fn create_collection(&self, name: &str) -> Result<LedgerOutcome>;

    /// Read one page of a collection's current resources
    async fn list_resources(
        &self,
        collection: &CollectionId,
        cursor: Option<&str>,
    ) -> Result<ResourcePage>;

    /// Submit mutations as a single transaction
    async fn submit(
        &self,
        capability: &CapabilityId,
        collection: &CollectionId,
        mutations: Vec<LedgerMutation>,
    ) -> Result<LedgerOutcome>;

    #[allow(clippy::too_many_arguments)]
    async fn add_resource(
        &self,
        capability: &CapabilityId,
        collection: &CollectionId,
        path: &str,
        locator: ContentLocator,
        hash: String,
        size: u64,
        content_type: &str,
    ) -> Result<LedgerOutcome> {
        let mutation = LedgerMutation::AddResource {
            path: path.to_string(),
            locator,
            hash,
            size,
            content_type: content_type.to_string(),
        };
        self.submit(capability, collection, vec![mutation]).await
    }

    async fn update_resource(
        &self,
        capability: &CapabilityId,
        collection: &CollectionId,
        path: &str,
        locator: ContentLocator,
        hash: String,
        size: u64,
    ) -> Result<LedgerOutcome> {
        let mutation = LedgerMutation::UpdateResource {
            path: path.to_string(),
            locator,
            hash,
            size,
        };
        self.submit(capability, collection, vec![mutation]).await
    }

    async fn delete_resource(
        &self,
        capability: &CapabilityId,
        collection: &CollectionId,
        path: &str,
    ) -> Result<LedgerOutcome> {
        let mutation = LedgerMutation::DeleteResource {
            path: path.to_string(),
        };
        self.submit(capability, collection, vec![mutation]).await
    }

    async fn delete_resources(
        &self,
        capability: &CapabilityId,
        collection: &CollectionId,
        paths: Vec<String>,
    ) -> Result<LedgerOutcome> {
        self.submit(
            capability,
            collection,
            vec![LedgerMutation::DeleteResources { paths }],
        )
        .await
    }
}
