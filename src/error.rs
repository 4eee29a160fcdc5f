/*!
 * Error types for sitesync
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

use sitesync_interface::{CapabilityId, CollectionId};

use crate::core::deploy::DeployState;
use crate::core::filter::IgnoreError;
use crate::core::orphans::OrphanRecord;
use crate::core::validation::Rejected;

pub type Result<T> = std::result::Result<T, SiteError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum SiteError {
    /// A path or identifier failed validation
    ValidationRejected(Rejected),

    /// Reading the local tree failed (before any network effect)
    ScanIo { path: PathBuf, source: io::Error },

    /// An ignore file contains an unsafe or malformed pattern
    IgnorePattern {
        file: PathBuf,
        line: usize,
        pattern: String,
        reason: String,
    },

    /// Reading the collection's current resources failed (before any upload)
    RemoteFetch {
        collection: CollectionId,
        reason: String,
    },

    /// Uploading content failed; content already stored is orphaned
    Upload {
        path: String,
        reason: String,
        orphans: Vec<OrphanRecord>,
    },

    /// Submitting ledger mutations failed; uncommitted content is orphaned.
    ///
    /// `capability` is set whenever one is known, including a collection
    /// created by this run, so the commit can be retried by hand.
    Commit {
        collection: Option<CollectionId>,
        capability: Option<CapabilityId>,
        reason: String,
        committed_transactions: usize,
        orphans: Vec<OrphanRecord>,
    },

    /// The run was cancelled before committing
    Cancelled {
        phase: DeployState,
        orphans: Vec<OrphanRecord>,
    },

    /// Configuration error
    Config(String),

    /// A blocking worker task failed to complete
    Parallel(String),
}

impl SiteError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        if self.orphans().is_empty() {
            EXIT_FATAL
        } else {
            // Some content reached the store; an operator can retry the commit
            EXIT_PARTIAL
        }
    }

    /// Check if this error aborts the whole run
    ///
    /// Only a rejected path is recoverable: the scanner skips it unless
    /// strict path handling is configured.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SiteError::ValidationRejected(_))
    }

    /// Uploaded content left without a committed ledger resource
    pub fn orphans(&self) -> &[OrphanRecord] {
        match self {
            SiteError::Upload { orphans, .. }
            | SiteError::Commit { orphans, .. }
            | SiteError::Cancelled { orphans, .. } => orphans,
            _ => &[],
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            SiteError::ValidationRejected(_) | SiteError::IgnorePattern { .. } => {
                ErrorCategory::Validation
            }
            SiteError::ScanIo { .. } => ErrorCategory::Filesystem,
            SiteError::RemoteFetch { .. } | SiteError::Commit { .. } => ErrorCategory::Ledger,
            SiteError::Upload { .. } => ErrorCategory::Storage,
            SiteError::Cancelled { .. } => ErrorCategory::Cancelled,
            SiteError::Config(_) => ErrorCategory::Configuration,
            SiteError::Parallel(_) => ErrorCategory::Concurrency,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Path, identifier and ignore-pattern validation
    Validation,
    /// Local filesystem access
    Filesystem,
    /// Ledger reads and writes
    Ledger,
    /// Content store uploads
    Storage,
    /// Cooperative cancellation
    Cancelled,
    /// Configuration errors
    Configuration,
    /// Worker task failures
    Concurrency,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Filesystem => write!(f, "filesystem"),
            ErrorCategory::Ledger => write!(f, "ledger"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Cancelled => write!(f, "cancelled"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Concurrency => write!(f, "concurrency"),
        }
    }
}

impl fmt::Display for SiteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteError::ValidationRejected(rejected) => {
                write!(f, "Path rejected: {}", rejected)
            }
            SiteError::ScanIo { path, source } => {
                write!(f, "Failed to scan {}: {}", path.display(), source)
            }
            SiteError::IgnorePattern {
                file,
                line,
                pattern,
                reason,
            } => {
                write!(
                    f,
                    "Invalid ignore pattern '{}' at {}:{}: {}",
                    pattern,
                    file.display(),
                    line,
                    reason
                )
            }
            SiteError::RemoteFetch { collection, reason } => {
                write!(
                    f,
                    "Failed to read resources of collection {}: {}",
                    collection, reason
                )
            }
            SiteError::Upload {
                path,
                reason,
                orphans,
            } => {
                write!(
                    f,
                    "Upload of {} failed: {} ({} uploaded blobs orphaned)",
                    path,
                    reason,
                    orphans.len()
                )
            }
            SiteError::Commit {
                collection,
                capability,
                reason,
                committed_transactions,
                orphans,
            } => {
                let mut target = collection
                    .as_ref()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "<new collection>".to_string());
                if let Some(capability) = capability {
                    target.push_str(&format!(" (capability {})", capability));
                }
                write!(
                    f,
                    "Commit to {} failed after {} confirmed transactions: {} ({} uploaded blobs orphaned)",
                    target,
                    committed_transactions,
                    reason,
                    orphans.len()
                )
            }
            SiteError::Cancelled { phase, orphans } => {
                write!(
                    f,
                    "Cancelled during {} ({} uploaded blobs orphaned)",
                    phase,
                    orphans.len()
                )
            }
            SiteError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            SiteError::Parallel(msg) => {
                write!(f, "Worker task error: {}", msg)
            }
        }
    }
}

impl std::error::Error for SiteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SiteError::ValidationRejected(rejected) => Some(rejected),
            SiteError::ScanIo { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<Rejected> for SiteError {
    fn from(rejected: Rejected) -> Self {
        SiteError::ValidationRejected(rejected)
    }
}

impl From<IgnoreError> for SiteError {
    fn from(err: IgnoreError) -> Self {
        match err {
            IgnoreError::InvalidPattern {
                file,
                line,
                pattern,
                reason,
            } => SiteError::IgnorePattern {
                file,
                line,
                pattern,
                reason,
            },
            IgnoreError::Read { path, source } => SiteError::ScanIo { path, source },
        }
    }
}

impl From<tokio::task::JoinError> for SiteError {
    fn from(err: tokio::task::JoinError) -> Self {
        SiteError::Parallel(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitesync_interface::ContentLocator;

    fn orphan() -> OrphanRecord {
        OrphanRecord::new("/a.txt", ContentLocator::new("blob", 7))
    }

    #[test]
    fn test_exit_code_reflects_orphans() {
        let clean = SiteError::RemoteFetch {
            collection: CollectionId::new("0x1"),
            reason: "offline".to_string(),
        };
        assert_eq!(clean.exit_code(), EXIT_FATAL);

        let partial = SiteError::Commit {
            collection: Some(CollectionId::new("0x1")),
            capability: None,
            reason: "rejected".to_string(),
            committed_transactions: 0,
            orphans: vec![orphan()],
        };
        assert_eq!(partial.exit_code(), EXIT_PARTIAL);
        assert_eq!(partial.orphans().len(), 1);
    }

    #[test]
    fn test_categories() {
        let err = SiteError::Upload {
            path: "/a.txt".to_string(),
            reason: "store offline".to_string(),
            orphans: Vec::new(),
        };
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert_eq!(err.category().to_string(), "storage");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_display_includes_remediation_details() {
        let err = SiteError::Commit {
            collection: Some(CollectionId::new("0xabc")),
            capability: Some(CapabilityId::new("cap-7")),
            reason: "gas exhausted".to_string(),
            committed_transactions: 2,
            orphans: vec![orphan()],
        };
        let msg = err.to_string();
        assert!(msg.contains("0xabc"));
        assert!(msg.contains("capability cap-7"));
        assert!(msg.contains("gas exhausted"));
        assert!(msg.contains("1 uploaded blobs orphaned"));
    }
}
