/*!
 * Local/remote state reconciliation
 *
 * Pure and deterministic. Only the content hash decides whether a path
 * changed; size and content type differences alone are not changes.
 */

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use super::metadata::{LocalState, RemoteState};
use super::validation::CanonicalPath;

/// Classification of every path seen in either state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub added: BTreeSet<CanonicalPath>,
    pub updated: BTreeSet<CanonicalPath>,
    pub deleted: BTreeSet<CanonicalPath>,
    pub unchanged: BTreeSet<CanonicalPath>,
}

/// Set sizes of a `DiffResult`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} updated, {} deleted, {} unchanged",
            self.added, self.updated, self.deleted, self.unchanged
        )
    }
}

/// Compare local files against remote resources
pub fn diff(local: &LocalState, remote: &RemoteState) -> DiffResult {
    let mut result = DiffResult::default();

    for (path, file) in local {
        match remote.get(path) {
            None => result.added.insert(path.clone()),
            Some(resource) if resource.hash != file.hash => result.updated.insert(path.clone()),
            Some(_) => result.unchanged.insert(path.clone()),
        };
    }

    result.deleted = remote
        .keys()
        .filter(|path| !local.contains_key(*path))
        .cloned()
        .collect();

    result
}

impl DiffResult {
    /// True when applying the diff would not change the collection
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Paths whose content must be uploaded (`added ∪ updated`), in order
    pub fn changed_paths(&self) -> BTreeSet<CanonicalPath> {
        self.added.union(&self.updated).cloned().collect()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            added: self.added.len(),
            updated: self.updated.len(),
            deleted: self.deleted.len(),
            unchanged: self.unchanged.len(),
        }
    }
}
