/*!
 * Orphaned content tracking
 *
 * Content that reached the store but is not referenced by any committed
 * ledger resource. It is never deleted here: the store drops it once its
 * expiry epoch lapses, and until then an operator can retry the commit with
 * the same locator.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitesync_interface::ContentLocator;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::validation::CanonicalPath;

/// Uploaded content with no committed ledger resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanRecord {
    /// Resource path the content was uploaded for
    pub path: String,
    pub locator: ContentLocator,
    /// Epoch after which the store may drop the content
    pub expiry_epoch: u64,
    pub recorded_at: DateTime<Utc>,
}

impl OrphanRecord {
    pub fn new(path: &str, locator: ContentLocator) -> Self {
        Self {
            path: path.to_string(),
            expiry_epoch: locator.expiry_epoch(),
            locator,
            recorded_at: Utc::now(),
        }
    }
}

impl fmt::Display for OrphanRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.path, self.locator)
    }
}

/// Turn every locator not yet referenced by a committed mutation into an orphan.
///
/// Identical content uploaded for several paths shares one locator; once any
/// of those paths is committed the content is referenced and none of them
/// report it. Records come out ordered by path.
pub fn collect_orphans(
    locators: &BTreeMap<CanonicalPath, ContentLocator>,
    committed: &HashSet<CanonicalPath>,
) -> Vec<OrphanRecord> {
    let referenced: HashSet<&ContentLocator> = locators
        .iter()
        .filter(|(path, _)| committed.contains(*path))
        .map(|(_, locator)| locator)
        .collect();

    locators
        .iter()
        .filter(|(_, locator)| !referenced.contains(locator))
        .map(|(path, locator)| OrphanRecord::new(path.as_str(), locator.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> CanonicalPath {
        CanonicalPath::parse(s).unwrap()
    }

    #[test]
    fn test_orphan_carries_expiry() {
        let orphan = OrphanRecord::new("/a.txt", ContentLocator::new("blob-a", 12));
        assert_eq!(orphan.expiry_epoch, 12);
        assert_eq!(orphan.locator.blob_id(), "blob-a");
        assert!(orphan.to_string().contains("/a.txt"));
    }

    #[test]
    fn test_collect_orphans_excludes_committed() {
        let mut locators = BTreeMap::new();
        locators.insert(path("/b.txt"), ContentLocator::new("b", 5));
        locators.insert(path("/a.txt"), ContentLocator::new("a", 5));
        locators.insert(path("/c.txt"), ContentLocator::new("c", 5));

        let committed: HashSet<_> = [path("/b.txt")].into_iter().collect();
        let orphans = collect_orphans(&locators, &committed);

        let paths: Vec<_> = orphans.iter().map(|o| o.path.as_str()).collect();
        assert_eq!(paths, vec!["/a.txt", "/c.txt"]);
    }

    #[test]
    fn test_shared_locator_is_referenced_once_committed() {
        let shared = ContentLocator::new("same-bytes", 5);
        let mut locators = BTreeMap::new();
        locators.insert(path("/a.txt"), shared.clone());
        locators.insert(path("/copy/a.txt"), shared);
        locators.insert(path("/b.txt"), ContentLocator::new("b", 5));

        let committed: HashSet<_> = [path("/a.txt")].into_iter().collect();
        let orphans = collect_orphans(&locators, &committed);

        let paths: Vec<_> = orphans.iter().map(|o| o.path.as_str()).collect();
        assert_eq!(paths, vec!["/b.txt"]);
    }

    #[test]
    fn test_orphan_serializes() {
        let orphan = OrphanRecord::new("/a.txt", ContentLocator::new("blob-a", 3));
        let json = serde_json::to_string(&orphan).unwrap();
        assert!(json.contains("\"expiry_epoch\":3"));
    }
}
