/*!
 * Deployment engine
 *
 * Leaf-first:
 * - `validation`: untrusted path and ignore-pattern validation
 * - `checksum`: content digests
 * - `filter`: ignore rules
 * - `directory` + `metadata`: scanning into `FileRecord`s
 * - `diff`: local/remote reconciliation
 * - `plan`: publish plans and ledger transactions
 * - `deploy`: the orchestrator, with `orphans` and `progress`
 */

pub mod checksum;
pub mod deploy;
pub mod diff;
pub mod directory;
pub mod filter;
pub mod metadata;
pub mod orphans;
pub mod plan;
pub mod progress;
pub mod validation;

pub use checksum::{hash, hash_stream, Digest};
pub use deploy::{CancelFlag, DeployReport, DeployState, DeployTarget, Deployer};
pub use diff::{diff, DiffResult, DiffSummary};
pub use directory::{RejectedPath, ScanReport, Scanner};
pub use metadata::{FileRecord, LocalState, RemoteState, ResourceRecord};
pub use orphans::OrphanRecord;
pub use plan::{full_create, incremental, FullCreatePlan, LocatorMap, PlanOp, PublishPlan};
pub use progress::{ProgressEvent, ProgressPublisher, ProgressSubscriber};
pub use validation::{validate, CanonicalPath, RejectReason, Rejected};
