/*!
 * Sitesync - incremental content-addressed site deployment
 *
 * Publishes a local file tree to a content store and records the resulting
 * references in a capability-gated ledger collection:
 * - Defensive validation of every path-like string
 * - SHA-256 content addressing with streamed hashing
 * - Gitignore-style ignore files
 * - Diffing against the collection's current resources
 * - Full-create and incremental publish protocols
 * - Orphaned-upload reporting on partial failure
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod config;
pub mod core;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{DeployConfig, LogLevel, LoggingConfig};
pub use core::{
    CanonicalPath, Deployer, DeployReport, DeployTarget, DiffResult, FileRecord, OrphanRecord,
    ProgressEvent, PublishPlan,
};
pub use error::{Result, SiteError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
