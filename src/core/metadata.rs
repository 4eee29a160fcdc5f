/*!
 * Canonical file and resource records
 *
 * `FileRecord` describes one local file as scanned; `ResourceRecord` describes
 * one resource as the ledger reports it. Both are keyed by `CanonicalPath`
 * and live for a single synchronization attempt.
 */

use serde::{Deserialize, Serialize};
use sitesync_interface::{ContentLocator, RemoteResource};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

use super::checksum::Digest;
use super::validation::CanonicalPath;

/// Content type for files whose extension is unknown
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Local state keyed by resource path
pub type LocalState = BTreeMap<CanonicalPath, FileRecord>;

/// Remote state keyed by resource path
pub type RemoteState = BTreeMap<CanonicalPath, ResourceRecord>;

/// One local file, as seen by a single scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: CanonicalPath,
    pub hash: Digest,
    pub size: u64,
    pub content_type: String,

    /// Where the bytes live on disk
    #[serde(skip)]
    pub source: PathBuf,
}

impl FileRecord {
    pub fn new(path: CanonicalPath, hash: Digest, size: u64, source: PathBuf) -> Self {
        let content_type = content_type_for(&path).to_string();
        Self {
            path,
            hash,
            size,
            content_type,
            source,
        }
    }
}

/// A previously published resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub path: CanonicalPath,
    pub locator: ContentLocator,
    pub hash: Digest,
    pub size: u64,
}

/// The ledger returned a resource the engine refuses to use
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("remote resource {path:?} is invalid: {reason}")]
pub struct InvalidResource {
    pub path: String,
    pub reason: String,
}

impl ResourceRecord {
    /// Validate a resource fetched from the ledger
    pub fn from_remote(remote: RemoteResource) -> Result<Self, InvalidResource> {
        let invalid = |reason: String| InvalidResource {
            path: remote.path.clone(),
            reason,
        };

        let path = CanonicalPath::parse(&remote.path).map_err(|r| invalid(r.reason.to_string()))?;
        let hash = Digest::parse(&remote.hash).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            path,
            locator: remote.locator,
            hash,
            size: remote.size,
        })
    }
}

/// Content type derived from the file extension
pub fn content_type_for(path: &CanonicalPath) -> &'static str {
    path.extension()
        .and_then(|ext| mime_guess::from_ext(ext).first_raw())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Index records by path.
///
/// The scanner never yields two records for one path. If a caller does, the
/// first record is kept and the duplicate is logged.
pub fn local_state(records: impl IntoIterator<Item = FileRecord>) -> LocalState {
    let mut state = LocalState::new();
    for record in records {
        match state.entry(record.path.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(kept) => warn!(
                "Dropping {} for {}: already provided by {}",
                record.source.display(),
                record.path,
                kept.get().source.display()
            ),
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checksum::hash;

    fn path(s: &str) -> CanonicalPath {
        CanonicalPath::parse(s).unwrap()
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(&path("/index.html")), "text/html");
        assert_eq!(content_type_for(&path("/site.css")), "text/css");
        assert_eq!(content_type_for(&path("/logo.png")), "image/png");
        assert_eq!(content_type_for(&path("/blob.unknownext")), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for(&path("/Makefile")), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_file_record_content_type() {
        let record = FileRecord::new(path("/app.js"), hash(b"x"), 1, PathBuf::from("app.js"));
        assert!(record.content_type.contains("javascript"));
    }

    #[test]
    fn test_from_remote_validates() {
        let good = RemoteResource {
            path: "/a.txt".to_string(),
            locator: ContentLocator::new("blob", 1),
            hash: hash(b"a").to_string(),
            size: 1,
        };
        let record = ResourceRecord::from_remote(good.clone()).unwrap();
        assert_eq!(record.path.as_str(), "/a.txt");

        let bad_path = RemoteResource {
            path: "/../etc/passwd".to_string(),
            ..good.clone()
        };
        assert!(ResourceRecord::from_remote(bad_path).is_err());

        let bad_hash = RemoteResource {
            hash: "not-a-digest".to_string(),
            ..good
        };
        let err = ResourceRecord::from_remote(bad_hash).unwrap_err();
        assert_eq!(err.path, "/a.txt");
    }

    #[test]
    fn test_local_state_indexes_by_path() {
        let records = vec![
            FileRecord::new(path("/b.txt"), hash(b"b"), 1, PathBuf::from("b.txt")),
            FileRecord::new(path("/a.txt"), hash(b"a"), 1, PathBuf::from("a.txt")),
        ];
        let state = local_state(records);
        let keys: Vec<_> = state.keys().map(|p| p.as_str()).collect();
        assert_eq!(keys, vec!["/a.txt", "/b.txt"]);
    }

    #[test]
    fn test_local_state_keeps_first_duplicate() {
        let records = vec![
            FileRecord::new(path("/a b.txt"), hash(b"1"), 1, PathBuf::from("a b.txt")),
            FileRecord::new(path("/a b.txt"), hash(b"2"), 1, PathBuf::from("a%20b.txt")),
        ];
        let state = local_state(records);
        assert_eq!(state.len(), 1);
        assert_eq!(state[&path("/a b.txt")].hash, hash(b"1"));
    }
}
