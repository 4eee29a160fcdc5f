/*!
 * Ignore rules loaded from a project-local ignore file
 *
 * Syntax follows the familiar gitignore shape:
 * - blank lines and `#` comments are skipped
 * - `!pattern` re-includes what an earlier rule excluded
 * - a trailing `/` restricts the rule to directories (and so everything below)
 * - a pattern without an inner `/` matches the file name at any depth
 * - a pattern with an inner `/` (or a leading one) is anchored at the project root
 *
 * The last matching rule decides. Every pattern is validated before it is
 * compiled.
 */

use glob::{MatchOptions, Pattern as GlobPattern};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::validation::validate_ignore_pattern;

/// Errors that can occur while loading ignore rules
#[derive(Error, Debug)]
pub enum IgnoreError {
    #[error("Invalid ignore pattern '{pattern}' at {}:{line}: {reason}", file.display())]
    InvalidPattern {
        file: PathBuf,
        line: usize,
        pattern: String,
        reason: String,
    },

    #[error("Failed to read ignore file '{}': {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A single compiled ignore rule
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    pattern: GlobPattern,
    raw: String,
    negated: bool,
    dir_only: bool,
    anchored: bool,
}

impl IgnoreRule {
    /// Check if this rule matches a root-relative path (no leading '/')
    pub fn matches(&self, relative: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.anchored {
            self.pattern.matches_with(relative, MATCH_OPTIONS)
        } else {
            let name = relative.rsplit('/').next().unwrap_or(relative);
            self.pattern.matches_with(name, MATCH_OPTIONS)
        }
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// The pattern as written in the ignore file
    pub fn pattern_string(&self) -> &str {
        &self.raw
    }
}

/// Ordered ignore rules for one project
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<IgnoreRule>,
    source: Option<PathBuf>,
}

impl IgnoreRules {
    /// Rules that ignore nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the first ignore file that exists among `names` inside `project_root`.
    ///
    /// Later names are fallbacks: they are only consulted when every earlier
    /// file is absent. With no file present, no rules apply.
    pub fn discover(project_root: &Path, names: &[String]) -> Result<Self, IgnoreError> {
        for name in names {
            let candidate = project_root.join(name);
            if candidate.is_file() {
                debug!("Using ignore file {}", candidate.display());
                return Self::load_from_file(project_root, &candidate);
            }
        }
        Ok(Self::empty())
    }

    /// Load rules from a specific file
    pub fn load_from_file(project_root: &Path, file: &Path) -> Result<Self, IgnoreError> {
        let contents = fs::read_to_string(file).map_err(|e| IgnoreError::Read {
            path: file.to_path_buf(),
            source: e,
        })?;

        let mut rules = Self::parse(project_root, file, &contents)?;
        rules.source = Some(file.to_path_buf());
        Ok(rules)
    }

    /// Parse ignore file contents; `file` is only used for error reporting
    pub fn parse(project_root: &Path, file: &Path, contents: &str) -> Result<Self, IgnoreError> {
        let mut rules = Vec::new();

        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            rules.push(parse_rule_line(project_root, file, index + 1, line)?);
        }

        Ok(Self {
            rules,
            source: None,
        })
    }

    /// Check if a root-relative path is ignored
    pub fn is_ignored(&self, relative: &str, is_dir: bool) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matches(relative, is_dir))
            .is_some_and(|rule| !rule.negated)
    }

    /// The file the rules were loaded from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &IgnoreRule> {
        self.rules.iter()
    }
}

fn parse_rule_line(
    project_root: &Path,
    file: &Path,
    line_num: usize,
    line: &str,
) -> Result<IgnoreRule, IgnoreError> {
    let invalid = |reason: String| IgnoreError::InvalidPattern {
        file: file.to_path_buf(),
        line: line_num,
        pattern: line.to_string(),
        reason,
    };

    let (negated, body) = match line.strip_prefix('!') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, line),
    };

    let normalized =
        validate_ignore_pattern(body, project_root).map_err(|r| invalid(r.reason.to_string()))?;

    let (dir_only, body) = match normalized.strip_suffix('/') {
        Some(rest) => (true, rest),
        None => (false, normalized.as_str()),
    };
    let anchored = body.contains('/');
    let body = body.trim_start_matches('/');
    if body.is_empty() {
        return Err(invalid("pattern is empty".to_string()));
    }

    let pattern = GlobPattern::new(body).map_err(|e| invalid(e.to_string()))?;

    Ok(IgnoreRule {
        pattern,
        raw: line.to_string(),
        negated,
        dir_only,
        anchored,
    })
}
