/*!
 * Directory scanning and metadata building
 *
 * Walks a project tree, drops ignored entries before any hashing is done,
 * validates every remaining file path and hashes the survivors in bounded
 * batches on the blocking pool.
 */

use futures::future::join_all;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::checksum::hash_stream_with_size;
use super::deploy::{CancelFlag, DeployState};
use super::filter::IgnoreRules;
use super::metadata::FileRecord;
use super::progress::{ProgressEvent, ProgressPublisher};
use super::validation::{match_form, CanonicalPath, RejectReason, Rejected};
use crate::config::DeployConfig;
use crate::error::{Result, SiteError};

/// A file left out of the scan because its path failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedPath {
    /// Path relative to the scan root, as found on disk
    pub path: PathBuf,
    pub rejected: Rejected,
}

/// Outcome of one scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Accepted files, sorted by canonical path
    pub records: Vec<FileRecord>,
    pub rejected: Vec<RejectedPath>,
}

impl ScanReport {
    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.size).sum()
    }
}

/// A file that passed filtering and validation, waiting to be hashed
struct Candidate {
    path: CanonicalPath,
    source: PathBuf,
}

/// Builds `FileRecord`s for a project tree
pub struct Scanner {
    config: DeployConfig,
    publisher: ProgressPublisher,
    cancel: CancelFlag,
}

impl Scanner {
    pub fn new(config: &DeployConfig) -> Self {
        Self {
            config: config.clone(),
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

    /// Scan `root` from scratch.
    ///
    /// Fails on any I/O error and on invalid ignore patterns. A rejected path
    /// fails the scan only with `strict_paths`; otherwise it is reported in
    /// [`ScanReport::rejected`] and published as a warning.
    pub async fn scan(&self, root: &Path) -> Result<ScanReport> {
        let rules = IgnoreRules::discover(root, &self.config.ignore_files)?;
        if let Some(source) = rules.source() {
            info!("Loaded {} ignore rules from {}", rules.len(), source.display());
        }

        let (candidates, rejected) = self.collect_candidates(root, &rules)?;
        for r in &rejected {
            warn!("Skipping {}: {}", r.path.display(), r.rejected.reason);
            self.publisher.publish(ProgressEvent::warning(format!(
                "skipped {}: {}",
                r.path.display(),
                r.rejected.reason
            )));
        }

        let mut records = self.hash_candidates(candidates).await?;
        records.sort_by(|a, b| a.path.cmp(&b.path));

        info!(
            "Scanned {} files ({} rejected) under {}",
            records.len(),
            rejected.len(),
            root.display()
        );

        Ok(ScanReport { records, rejected })
    }

    fn collect_candidates(
        &self,
        root: &Path,
        rules: &IgnoreRules,
    ) -> Result<(Vec<Candidate>, Vec<RejectedPath>)> {
        let mut candidates = Vec::new();
        let mut rejected = Vec::new();
        // canonical path -> on-disk file that claimed it first
        let mut claimed: HashMap<CanonicalPath, PathBuf> = HashMap::new();

        let mut walker = WalkDir::new(root)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| SiteError::ScanIo {
                path: e.path().unwrap_or(root).to_path_buf(),
                source: io::Error::from(e),
            })?;

            let relative = match entry.path().strip_prefix(root) {
                Ok(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => continue,
            };
            let file_type = entry.file_type();
            let raw_path = relative_match_path(&relative);
            // patterns are decoded when loaded, so paths are too
            let match_path = match_form(&raw_path);

            if rules.is_ignored(&match_path, file_type.is_dir()) {
                debug!("Ignoring {}", match_path);
                if file_type.is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }

            if !file_type.is_file() {
                if file_type.is_symlink() {
                    debug!("Not following symlink {}", match_path);
                }
                continue;
            }

            if entry.depth() == 1 && self.config.is_project_file_name(&raw_path) {
                continue;
            }

            let canonical = CanonicalPath::from_relative(&relative).and_then(|path| {
                match claimed.get(&path) {
                    Some(first) => {
                        debug!("{} collides with {}", raw_path, first.display());
                        Err(Rejected::new(&raw_path, RejectReason::Collision))
                    }
                    None => Ok(path),
                }
            });

            match canonical {
                Ok(path) => {
                    claimed.insert(path.clone(), relative);
                    candidates.push(Candidate {
                        path,
                        source: entry.into_path(),
                    });
                }
                Err(rejection) if self.config.strict_paths => {
                    return Err(SiteError::ValidationRejected(rejection));
                }
                Err(rejection) => rejected.push(RejectedPath {
                    path: relative,
                    rejected: rejection,
                }),
            }
        }

        Ok((candidates, rejected))
    }

    async fn hash_candidates(&self, candidates: Vec<Candidate>) -> Result<Vec<FileRecord>> {
        let mut records = Vec::with_capacity(candidates.len());
        let mut pending = candidates.into_iter().peekable();

        while pending.peek().is_some() {
            if self.cancel.is_cancelled() {
                return Err(SiteError::Cancelled {
                    phase: DeployState::Scanning,
                    orphans: Vec::new(),
                });
            }

            let batch: Vec<Candidate> = pending
                .by_ref()
                .take(self.config.hash_batch_size.max(1))
                .collect();
            let tasks = batch.into_iter().map(|candidate| {
                tokio::task::spawn_blocking(move || {
                    let hashed = hash_stream_with_size(&candidate.source);
                    (candidate, hashed)
                })
            });

            for joined in join_all(tasks).await {
                let (candidate, hashed) = joined?;
                let (hash, size) = hashed.map_err(|e| SiteError::ScanIo {
                    path: candidate.source.clone(),
                    source: e,
                })?;
                debug!("Hashed {} ({} bytes)", candidate.path, size);
                records.push(FileRecord::new(candidate.path, hash, size, candidate.source));
            }

            self.publisher
                .publish(ProgressEvent::scan_progress(records.len()));
            tokio::task::yield_now().await;
        }

        Ok(records)
    }
}

/// Root-relative path with '/' separators, for ignore matching
fn relative_match_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checksum::hash;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn paths(report: &ScanReport) -> Vec<&str> {
        report.records.iter().map(|r| r.path.as_str()).collect()
    }

    #[tokio::test]
    async fn test_scan_builds_sorted_records() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.html", b"<h1>hi</h1>");
        write(dir.path(), "a/b.css", b"body{}");
        write(dir.path(), "a-c.js", b"1");

        let report = Scanner::new(&DeployConfig::default())
            .scan(dir.path())
            .await
            .unwrap();

        assert_eq!(paths(&report), vec!["/a-c.js", "/a/b.css", "/index.html"]);
        let index = &report.records[2];
        assert_eq!(index.hash, hash(b"<h1>hi</h1>"));
        assert_eq!(index.size, 11);
        assert_eq!(index.content_type, "text/html");
        assert!(report.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_scan_applies_ignore_rules() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".sitesignore", b"*.log\nnode_modules/\n");
        write(dir.path(), "keep.txt", b"k");
        write(dir.path(), "debug.log", b"d");
        write(dir.path(), "node_modules/pkg/index.js", b"x");

        let report = Scanner::new(&DeployConfig::default())
            .scan(dir.path())
            .await
            .unwrap();

        assert_eq!(paths(&report), vec!["/keep.txt"]);
    }

    #[tokio::test]
    async fn test_scan_skips_rejected_paths() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "ok.txt", b"ok");
        write(dir.path(), "bad;name.txt", b"bad");

        let (publisher, subscriber) = ProgressPublisher::unbounded();
        let report = Scanner::new(&DeployConfig::default())
            .with_publisher(publisher)
            .scan(dir.path())
            .await
            .unwrap();

        assert_eq!(paths(&report), vec!["/ok.txt"]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].path, PathBuf::from("bad;name.txt"));
        assert!(subscriber
            .drain()
            .iter()
            .any(|e| matches!(e, ProgressEvent::Warning { .. })));
    }

    #[tokio::test]
    async fn test_strict_paths_fail_the_scan() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "bad|name.txt", b"bad");

        let config = DeployConfig {
            strict_paths: true,
            ..Default::default()
        };
        let err = Scanner::new(&config).scan(dir.path()).await.unwrap_err();
        assert!(matches!(err, SiteError::ValidationRejected(_)));
    }

    #[tokio::test]
    async fn test_colliding_spellings_keep_the_first_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a b.txt", b"plain");
        write(dir.path(), "a%20b.txt", b"escaped");

        let report = Scanner::new(&DeployConfig::default())
            .scan(dir.path())
            .await
            .unwrap();

        assert_eq!(paths(&report), vec!["/a b.txt"]);
        assert_eq!(report.records[0].hash, hash(b"plain"));
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].path, PathBuf::from("a%20b.txt"));
        assert_eq!(report.rejected[0].rejected.reason, RejectReason::Collision);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_unicode_forms_collide() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "caf\u{e9}.txt", b"composed");
        write(dir.path(), "cafe\u{301}.txt", b"decomposed");

        let report = Scanner::new(&DeployConfig::default())
            .scan(dir.path())
            .await
            .unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].rejected.reason, RejectReason::Collision);
    }

    #[tokio::test]
    async fn test_strict_paths_fail_on_collision() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a b.txt", b"plain");
        write(dir.path(), "a%20b.txt", b"escaped");

        let config = DeployConfig {
            strict_paths: true,
            ..Default::default()
        };
        let err = Scanner::new(&config).scan(dir.path()).await.unwrap_err();
        match err {
            SiteError::ValidationRejected(rejected) => {
                assert_eq!(rejected.reason, RejectReason::Collision)
            }
            other => panic!("expected collision, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_project_config_is_not_published() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "sitesync.toml", b"hash_batch_size = 4\n");
        write(dir.path(), "docs/sitesync.toml", b"# sample");
        write(dir.path(), "index.html", b"<p>hi</p>");

        let report = Scanner::new(&DeployConfig::default())
            .scan(dir.path())
            .await
            .unwrap();

        assert_eq!(paths(&report), vec!["/docs/sitesync.toml", "/index.html"]);
    }

    #[tokio::test]
    async fn test_batches_cover_every_file() {
        let dir = TempDir::new().unwrap();
        for i in 0..23 {
            write(dir.path(), &format!("f{:02}.txt", i), format!("{}", i).as_bytes());
        }

        let config = DeployConfig {
            hash_batch_size: 5,
            ..Default::default()
        };
        let (publisher, subscriber) = ProgressPublisher::unbounded();
        let report = Scanner::new(&config)
            .with_publisher(publisher)
            .scan(dir.path())
            .await
            .unwrap();

        assert_eq!(report.records.len(), 23);
        let progress: Vec<usize> = subscriber
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::ScanProgress { files_hashed, .. } => Some(files_hashed),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![5, 10, 15, 20, 23]);
    }

    #[tokio::test]
    async fn test_cancelled_scan() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.txt", b"a");

        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = Scanner::new(&DeployConfig::default())
            .with_cancel(cancel)
            .scan(dir.path())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SiteError::Cancelled {
                phase: DeployState::Scanning,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_root_is_scan_io() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = Scanner::new(&DeployConfig::default())
            .scan(&missing)
            .await
            .unwrap_err();
        assert!(matches!(err, SiteError::ScanIo { .. }));
    }

    #[tokio::test]
    async fn test_invalid_ignore_pattern_is_fatal() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".sitesignore", b"../../etc\n");
        write(dir.path(), "a.txt", b"a");

        let err = Scanner::new(&DeployConfig::default())
            .scan(dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, SiteError::IgnorePattern { line: 1, .. }));
    }
}
