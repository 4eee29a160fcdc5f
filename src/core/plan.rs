/*!
 * Publish plans
 *
 * A plan is the ordered list of mutations that moves a collection from its
 * remote state to the local state. Two protocols produce plans:
 *
 * - full-create: a lone `Create`, then one `AddResource` per local file
 * - incremental: one mutation per added, updated or deleted path
 *
 * Changed paths without an uploaded content locator are never planned; they
 * are recorded as `MetadataSkip`s so the caller can warn about them.
 */

use serde::Serialize;
use sitesync_interface::{ContentLocator, LedgerMutation};
use std::collections::BTreeMap;
use std::fmt;

use super::checksum::Digest;
use super::diff::DiffResult;
use super::metadata::{FileRecord, LocalState};
use super::validation::CanonicalPath;

/// Content locators obtained during upload, by resource path
pub type LocatorMap = BTreeMap<CanonicalPath, ContentLocator>;

/// One planned mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanOp {
    Create {
        name: String,
    },
    AddResource {
        path: CanonicalPath,
        locator: ContentLocator,
        hash: Digest,
        size: u64,
        content_type: String,
    },
    UpdateResource {
        path: CanonicalPath,
        locator: ContentLocator,
        hash: Digest,
        size: u64,
    },
    DeleteResource {
        path: CanonicalPath,
    },
}

impl PlanOp {
    fn add(record: &FileRecord, locator: &ContentLocator) -> Self {
        PlanOp::AddResource {
            path: record.path.clone(),
            locator: locator.clone(),
            hash: record.hash.clone(),
            size: record.size,
            content_type: record.content_type.clone(),
        }
    }

    fn update(record: &FileRecord, locator: &ContentLocator) -> Self {
        PlanOp::UpdateResource {
            path: record.path.clone(),
            locator: locator.clone(),
            hash: record.hash.clone(),
            size: record.size,
        }
    }

    /// Resource path targeted by this op; `None` for `Create`
    pub fn path(&self) -> Option<&CanonicalPath> {
        match self {
            PlanOp::Create { .. } => None,
            PlanOp::AddResource { path, .. }
            | PlanOp::UpdateResource { path, .. }
            | PlanOp::DeleteResource { path } => Some(path),
        }
    }

    /// Locator referenced by this op, if it stores content
    pub fn locator(&self) -> Option<&ContentLocator> {
        match self {
            PlanOp::AddResource { locator, .. } | PlanOp::UpdateResource { locator, .. } => {
                Some(locator)
            }
            _ => None,
        }
    }

    /// Wire form of a resource op; `Create` has its own ledger call
    pub fn to_mutation(&self) -> Option<LedgerMutation> {
        match self {
            PlanOp::Create { .. } => None,
            PlanOp::AddResource {
                path,
                locator,
                hash,
                size,
                content_type,
            } => Some(LedgerMutation::AddResource {
                path: path.to_string(),
                locator: locator.clone(),
                hash: hash.to_string(),
                size: *size,
                content_type: content_type.clone(),
            }),
            PlanOp::UpdateResource {
                path,
                locator,
                hash,
                size,
            } => Some(LedgerMutation::UpdateResource {
                path: path.to_string(),
                locator: locator.clone(),
                hash: hash.to_string(),
                size: *size,
            }),
            PlanOp::DeleteResource { path } => Some(LedgerMutation::DeleteResource {
                path: path.to_string(),
            }),
        }
    }
}

impl fmt::Display for PlanOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanOp::Create { name } => write!(f, "create {}", name),
            PlanOp::AddResource { path, size, .. } => write!(f, "add    {} ({} bytes)", path, size),
            PlanOp::UpdateResource { path, size, .. } => {
                write!(f, "update {} ({} bytes)", path, size)
            }
            PlanOp::DeleteResource { path } => write!(f, "delete {}", path),
        }
    }
}

/// A changed path left out of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataSkip {
    pub path: CanonicalPath,
    pub reason: String,
}

impl fmt::Display for MetadataSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} skipped: {}", self.path, self.reason)
    }
}

/// Ordered resource mutations plus the paths that had to be skipped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishPlan {
    pub ops: Vec<PlanOp>,
    pub skipped: Vec<MetadataSkip>,
}

/// One ledger transaction cut from a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub mutations: Vec<LedgerMutation>,
    /// Every path the transaction touches, in plan order
    pub paths: Vec<CanonicalPath>,
}

impl PublishPlan {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Split into transactions of at most `max_ops` ops each.
    ///
    /// Adjacent deletes inside one transaction collapse into a single batched
    /// delete. `Create` ops are not part of any transaction.
    pub fn transactions(&self, max_ops: usize) -> Vec<Transaction> {
        let max_ops = max_ops.max(1);
        let resource_ops: Vec<&PlanOp> = self
            .ops
            .iter()
            .filter(|op| !matches!(op, PlanOp::Create { .. }))
            .collect();

        resource_ops
            .chunks(max_ops)
            .map(build_transaction)
            .collect()
    }
}

fn build_transaction(ops: &[&PlanOp]) -> Transaction {
    let mut mutations = Vec::new();
    let mut paths = Vec::with_capacity(ops.len());
    let mut pending_deletes: Vec<String> = Vec::new();

    let flush = |pending: &mut Vec<String>, mutations: &mut Vec<LedgerMutation>| match pending.len() {
        0 => {}
        1 => mutations.push(LedgerMutation::DeleteResource {
            path: pending.remove(0),
        }),
        _ => mutations.push(LedgerMutation::DeleteResources {
            paths: std::mem::take(pending),
        }),
    };

    for op in ops {
        if let Some(path) = op.path() {
            paths.push(path.clone());
        }
        match op {
            PlanOp::DeleteResource { path } => pending_deletes.push(path.to_string()),
            other => {
                flush(&mut pending_deletes, &mut mutations);
                mutations.extend(other.to_mutation());
            }
        }
    }
    flush(&mut pending_deletes, &mut mutations);

    Transaction { mutations, paths }
}

/// Plan for a collection that does not exist yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullCreatePlan {
    /// Submitted alone, before any resource
    pub create: PlanOp,
    pub resources: PublishPlan,
}

/// Build the full-create plan: every local file becomes an `AddResource`
pub fn full_create(name: &str, local: &LocalState, locators: &LocatorMap) -> FullCreatePlan {
    let mut resources = PublishPlan::default();

    for (path, record) in local {
        match locators.get(path) {
            Some(locator) => resources.ops.push(PlanOp::add(record, locator)),
            None => resources.skipped.push(missing_locator(path)),
        }
    }

    FullCreatePlan {
        create: PlanOp::Create {
            name: name.to_string(),
        },
        resources,
    }
}

/// Build the incremental plan for a diff
pub fn incremental(diff: &DiffResult, local: &LocalState, locators: &LocatorMap) -> PublishPlan {
    let mut plan = PublishPlan::default();

    let mut plan_upsert = |path: &CanonicalPath, build: fn(&FileRecord, &ContentLocator) -> PlanOp| {
        match (local.get(path), locators.get(path)) {
            (Some(record), Some(locator)) => plan.ops.push(build(record, locator)),
            (None, _) => plan.skipped.push(MetadataSkip {
                path: path.clone(),
                reason: "no local record".to_string(),
            }),
            (Some(_), None) => plan.skipped.push(missing_locator(path)),
        }
    };

    for path in &diff.added {
        plan_upsert(path, PlanOp::add);
    }
    for path in &diff.updated {
        plan_upsert(path, PlanOp::update);
    }
    for path in &diff.deleted {
        plan.ops.push(PlanOp::DeleteResource { path: path.clone() });
    }

    plan.ops.sort_by(|a, b| a.path().cmp(&b.path()));
    plan.skipped.sort_by(|a, b| a.path.cmp(&b.path));
    plan
}

fn missing_locator(path: &CanonicalPath) -> MetadataSkip {
    MetadataSkip {
        path: path.clone(),
        reason: "no content locator was recorded for this path".to_string(),
    }
}
