/*!
 * Deploy orchestration
 *
 * Sequences one synchronization attempt:
 *
 * ```text
 * Scanning -> Diffing -> Uploading -> Committing -> Done
 *     \__________\___________\____________\______-> Failed
 * ```
 *
 * Nothing is retried across phases. When a run fails after content reached
 * the store, every locator not referenced by a confirmed transaction is
 * reported as an `OrphanRecord`; ledger mutations are idempotent, so an
 * operator can retry the commit with those locators.
 */

use futures::future::join_all;
use serde::Serialize;
use sitesync_interface::{
    CapabilityId, CollectionId, ContentLocator, ContentStoreClient, LedgerClient, LedgerOutcome,
};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::checksum::hash;
use super::diff::{diff, DiffSummary};
use super::directory::{RejectedPath, Scanner};
use super::metadata::{local_state, FileRecord, LocalState, RemoteState, ResourceRecord};
use super::orphans::collect_orphans;
use super::plan::{full_create, incremental, LocatorMap, MetadataSkip, PublishPlan};
use super::progress::{ProgressEvent, ProgressPublisher};
use super::validation::CanonicalPath;
use crate::config::DeployConfig;
use crate::error::{Result, SiteError};

/// Phase of a deploy run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployState {
    Scanning,
    Diffing,
    Uploading,
    Committing,
    Done,
    Failed,
}

impl DeployState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployState::Done | DeployState::Failed)
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployState::Scanning => "scanning",
            DeployState::Diffing => "diffing",
            DeployState::Uploading => "uploading",
            DeployState::Committing => "committing",
            DeployState::Done => "done",
            DeployState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation shared between a run and its controller.
///
/// Honoured before each scan or upload batch and before committing starts;
/// once a transaction has been broadcast the run always finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a run deploys into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployTarget {
    /// Create a new collection (full-create protocol)
    Create { name: String },

    /// Synchronize an existing collection (incremental protocol)
    Update {
        collection: CollectionId,
        capability: CapabilityId,
    },
}

/// Result of a successful (or dry) run
#[derive(Debug, Clone, Default)]
pub struct DeployReport {
    pub collection: Option<CollectionId>,
    pub capability: Option<CapabilityId>,
    pub diff: DiffSummary,
    /// Resource mutations planned (excluding collection creation)
    pub mutations: usize,
    /// Mutations that changed ledger state
    pub applied: usize,
    pub transactions: usize,
    pub uploaded: usize,
    pub skipped: Vec<MetadataSkip>,
    pub rejected: Vec<RejectedPath>,
    pub dry_run: bool,
    /// Every state the run went through, in order
    pub states: Vec<DeployState>,
}

/// Tracks the current phase of one run
struct RunState {
    current: DeployState,
    history: Vec<DeployState>,
}

impl RunState {
    fn new() -> Self {
        Self {
            current: DeployState::Scanning,
            history: vec![DeployState::Scanning],
        }
    }

    fn transition(&mut self, next: DeployState) {
        debug!("Deploy state {} -> {}", self.current, next);
        self.current = next;
        self.history.push(next);
    }
}

/// Drives scan, diff, upload and commit against the collaborators
pub struct Deployer<S, L> {
    store: S,
    ledger: L,
    config: DeployConfig,
    publisher: ProgressPublisher,
    cancel: CancelFlag,
}

impl<S: ContentStoreClient, L: LedgerClient> Deployer<S, L> {
    pub fn new(store: S, ledger: L, config: DeployConfig) -> Self {
        Self {
            store,
            ledger,
            config,
            publisher: ProgressPublisher::noop(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_publisher(mut self, publisher: ProgressPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for cancelling runs of this deployer
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Deploy the tree at `root` into `target`
    pub async fn deploy(&self, root: &Path, target: DeployTarget) -> Result<DeployReport> {
        let mut run = RunState::new();
        match self.run(root, &target, &mut run).await {
            Ok(mut report) => {
                run.transition(DeployState::Done);
                report.states = run.history;
                self.publisher.publish(ProgressEvent::done(report.mutations));
                info!(
                    "Deploy finished: {} ({} mutations in {} transactions)",
                    report.diff, report.mutations, report.transactions
                );
                Ok(report)
            }
            Err(err) => {
                let phase = run.current;
                run.transition(DeployState::Failed);
                error!("Deploy failed during {}: {}", phase, err);
                for orphan in err.orphans() {
                    warn!("Orphaned content: {}", orphan);
                }
                self.publisher
                    .publish(ProgressEvent::failed(err.to_string(), err.orphans().to_vec()));
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        root: &Path,
        target: &DeployTarget,
        run: &mut RunState,
    ) -> Result<DeployReport> {
        self.publisher
            .publish(ProgressEvent::scanning(root.to_path_buf()));
        info!("Scanning {}", root.display());
        let scan = Scanner::new(&self.config)
            .with_publisher(self.publisher.clone())
            .with_cancel(self.cancel.clone())
            .scan(root)
            .await?;
        let local = local_state(scan.records);

        run.transition(DeployState::Diffing);
        self.publisher.publish(ProgressEvent::diffing());
        let remote = match target {
            DeployTarget::Create { .. } => RemoteState::new(),
            DeployTarget::Update { collection, .. } => self.fetch_remote(collection).await?,
        };
        let changes = diff(&local, &remote);
        info!("Diff: {}", changes.summary());

        let mut report = DeployReport {
            diff: changes.summary(),
            rejected: scan.rejected,
            dry_run: self.config.dry_run,
            ..Default::default()
        };
        if let DeployTarget::Update {
            collection,
            capability,
        } = target
        {
            report.collection = Some(collection.clone());
            report.capability = Some(capability.clone());
        }

        if self.config.dry_run {
            report.mutations = changes.added.len() + changes.updated.len() + changes.deleted.len();
            report.transactions = report
                .mutations
                .div_ceil(self.config.max_mutations_per_transaction.max(1));
            info!("Dry run: {} mutations would be submitted", report.mutations);
            return Ok(report);
        }

        if matches!(target, DeployTarget::Update { .. }) && changes.is_empty() {
            info!("Collection already matches local state");
            return Ok(report);
        }

        run.transition(DeployState::Uploading);
        let upload_paths: Vec<&CanonicalPath> = match target {
            DeployTarget::Create { .. } => local.keys().collect(),
            DeployTarget::Update { .. } => changes.added.iter().chain(&changes.updated).collect(),
        };
        let locators = self.upload(&local, &upload_paths).await?;
        report.uploaded = locators.len();

        if self.cancel.is_cancelled() {
            return Err(SiteError::Cancelled {
                phase: DeployState::Committing,
                orphans: collect_orphans(&locators, &HashSet::new()),
            });
        }
        run.transition(DeployState::Committing);

        match target {
            DeployTarget::Create { name } => {
                let plan = full_create(name, &local, &locators);
                let (collection, capability) = self.create_collection(name, &locators).await?;
                report.collection = Some(collection.clone());
                report.capability = Some(capability.clone());
                self.commit(&plan.resources, &collection, &capability, &locators, &mut report)
                    .await?;
            }
            DeployTarget::Update {
                collection,
                capability,
            } => {
                let plan = incremental(&changes, &local, &locators);
                self.commit(&plan, collection, capability, &locators, &mut report)
                    .await?;
            }
        }

        Ok(report)
    }

    /// Read every page of a collection's resources
    pub async fn fetch_remote(&self, collection: &CollectionId) -> Result<RemoteState> {
        let fetch_error = |reason: String| SiteError::RemoteFetch {
            collection: collection.clone(),
            reason,
        };

        let mut remote = RemoteState::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors: HashSet<String> = HashSet::new();
        let mut pages = 0usize;

        loop {
            let page = self
                .ledger
                .list_resources(collection, cursor.as_deref())
                .await
                .map_err(|e| fetch_error(e.to_string()))?;
            pages += 1;

            for resource in page.resources {
                let record =
                    ResourceRecord::from_remote(resource).map_err(|e| fetch_error(e.to_string()))?;
                remote.insert(record.path.clone(), record);
            }

            match page.next_cursor {
                None => break,
                Some(next) if !seen_cursors.insert(next.clone()) => {
                    return Err(fetch_error(format!("ledger repeated cursor {:?}", next)));
                }
                Some(next) => cursor = Some(next),
            }
        }

        debug!(
            "Fetched {} resources of {} in {} pages",
            remote.len(),
            collection,
            pages
        );
        Ok(remote)
    }

    /// Upload the content of `paths` in batches, returning their locators
    async fn upload(&self, local: &LocalState, paths: &[&CanonicalPath]) -> Result<LocatorMap> {
        let total = paths.len();
        let mut locators = LocatorMap::new();
        self.publisher.publish(ProgressEvent::uploading(0, total));

        for batch in paths.chunks(self.config.upload_batch_size.max(1)) {
            if self.cancel.is_cancelled() {
                return Err(SiteError::Cancelled {
                    phase: DeployState::Uploading,
                    orphans: collect_orphans(&locators, &HashSet::new()),
                });
            }

            let uploads = batch.iter().filter_map(|path| local.get(*path)).map(|record| async move {
                (record, self.upload_one(record).await)
            });

            let mut failure = None;
            for (record, outcome) in join_all(uploads).await {
                match outcome {
                    Ok(locator) => {
                        debug!("Uploaded {} as {}", record.path, locator);
                        locators.insert(record.path.clone(), locator);
                    }
                    Err(reason) if failure.is_none() => failure = Some((record, reason)),
                    Err(reason) => warn!("Upload of {} also failed: {}", record.path, reason),
                }
            }

            if let Some((record, reason)) = failure {
                return Err(SiteError::Upload {
                    path: record.path.to_string(),
                    reason,
                    orphans: collect_orphans(&locators, &HashSet::new()),
                });
            }

            self.publisher
                .publish(ProgressEvent::uploading(locators.len(), total));
            tokio::task::yield_now().await;
        }

        info!("Uploaded {} files", locators.len());
        Ok(locators)
    }

    /// Read, re-verify and store one file
    async fn upload_one(&self, record: &FileRecord) -> std::result::Result<ContentLocator, String> {
        let bytes = tokio::fs::read(&record.source)
            .await
            .map_err(|e| format!("failed to read {}: {}", record.source.display(), e))?;

        if hash(&bytes) != record.hash {
            return Err("file changed since scan".to_string());
        }

        self.store.put(bytes).await.map_err(|e| e.to_string())
    }

    async fn create_collection(
        &self,
        name: &str,
        locators: &LocatorMap,
    ) -> Result<(CollectionId, CapabilityId)> {
        let commit_error = |reason: String| SiteError::Commit {
            collection: None,
            capability: None,
            reason,
            committed_transactions: 0,
            orphans: collect_orphans(locators, &HashSet::new()),
        };

        match self.ledger.create_collection(name).await {
            Ok(LedgerOutcome::Created {
                collection,
                capability,
                tx_digest,
            }) => {
                info!(
                    "Created collection {} with capability {} ({})",
                    collection, capability, tx_digest
                );
                Ok((collection, capability))
            }
            Ok(LedgerOutcome::Failed { reason, .. }) => Err(commit_error(reason)),
            Ok(other) => Err(commit_error(format!("unexpected ledger response {:?}", other))),
            Err(e) => Err(commit_error(e.to_string())),
        }
    }

    /// Submit a plan one transaction at a time
    async fn commit(
        &self,
        plan: &PublishPlan,
        collection: &CollectionId,
        capability: &CapabilityId,
        locators: &LocatorMap,
        report: &mut DeployReport,
    ) -> Result<()> {
        for skip in &plan.skipped {
            warn!("{}", skip);
            self.publisher.publish(ProgressEvent::warning(skip.to_string()));
        }
        report.skipped = plan.skipped.clone();
        report.mutations = plan.len();

        let transactions = plan.transactions(self.config.max_mutations_per_transaction);
        report.transactions = transactions.len();
        self.publisher
            .publish(ProgressEvent::committing(transactions.len()));

        let mut committed: HashSet<CanonicalPath> = HashSet::new();
        for (index, tx) in transactions.into_iter().enumerate() {
            let paths = tx.paths;
            let outcome = self
                .ledger
                .submit(capability, collection, tx.mutations)
                .await;

            let reason = match outcome {
                Ok(LedgerOutcome::Mutated { tx_digest, applied }) => {
                    debug!(
                        "Transaction {} confirmed ({} of {} paths applied)",
                        tx_digest,
                        applied,
                        paths.len()
                    );
                    report.applied += applied;
                    committed.extend(paths);
                    continue;
                }
                Ok(LedgerOutcome::Failed { tx_digest, reason }) => match tx_digest {
                    Some(digest) => format!("{} (transaction {})", reason, digest),
                    None => reason,
                },
                Ok(other) => format!("unexpected ledger response {:?}", other),
                Err(e) => e.to_string(),
            };

            return Err(SiteError::Commit {
                collection: Some(collection.clone()),
                capability: Some(capability.clone()),
                reason,
                committed_transactions: index,
                orphans: collect_orphans(locators, &committed),
            });
        }

        Ok(())
    }
}
