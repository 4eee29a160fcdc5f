/*!
 * Path and identifier validation
 *
 * Every string that names a file, whether it came from a directory walk, an
 * ignore file or the ledger, passes through here before it is used. The
 * checks run in a fixed order and the first failing rule rejects the input:
 *
 * 1. length cap
 * 2. percent-decoding to a fixed point
 * 3. NFC normalization
 * 4. NUL and control characters
 * 5. look-alike dots
 * 6. drive and UNC prefixes
 * 7. backslashes
 * 8. runs of three or more dots
 * 9. `..` as a whole segment
 * 10. shell metacharacters
 * 11. lexical resolution must stay under the root
 */

use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Inputs longer than this are rejected before any decoding
pub const MAX_INPUT_LEN: usize = 10_000;

/// Decode rounds allowed before the input counts as a decode bomb
const MAX_DECODE_ROUNDS: usize = 16;

/// Characters that render like '.' but are not ASCII dots
const HOMOGLYPH_DOTS: [char; 5] = [
    '\u{FF0E}', // fullwidth full stop
    '\u{2024}', // one dot leader
    '\u{3002}', // ideographic full stop
    '\u{FE52}', // small full stop
    '\u{FF61}', // halfwidth ideographic full stop
];

/// Shell metacharacters. `?`, `&`, `#`, `[]` and `{}` stay legal.
const SHELL_METACHARACTERS: [char; 4] = [';', '|', '`', '$'];

/// Command and process substitution openers
const SUBSTITUTIONS: [&str; 2] = ["<(", "$("];

/// Synthetic root used to prove a path cannot climb out of its tree
const SYNTHETIC_ROOT: &str = "/__sitesync_root__";

/// Longest input excerpt kept inside a `Rejected`
const EXCERPT_LEN: usize = 120;

/// The rule that rejected an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooLong,
    MalformedEncoding,
    DecodeDepth,
    NulByte,
    ControlCharacter,
    HomoglyphDot,
    AbsolutePrefix,
    Backslash,
    DotRun,
    Traversal,
    ShellMetacharacter,
    EscapesRoot,
    NonUtf8,
    Empty,
    /// Another file already maps to the same canonical path
    Collision,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::TooLong => "input exceeds length limit",
            RejectReason::MalformedEncoding => "malformed percent-encoding",
            RejectReason::DecodeDepth => "percent-decoding did not settle",
            RejectReason::NulByte => "contains NUL byte",
            RejectReason::ControlCharacter => "contains control character",
            RejectReason::HomoglyphDot => "contains look-alike dot character",
            RejectReason::AbsolutePrefix => "drive or UNC prefix",
            RejectReason::Backslash => "contains backslash",
            RejectReason::DotRun => "contains three or more consecutive dots",
            RejectReason::Traversal => "contains '..' segment",
            RejectReason::ShellMetacharacter => "contains shell metacharacter",
            RejectReason::EscapesRoot => "resolves outside the root",
            RejectReason::NonUtf8 => "not valid UTF-8",
            RejectReason::Empty => "names no file",
            RejectReason::Collision => "canonical path already taken by another file",
        };
        f.write_str(text)
    }
}

/// A rejected input together with the rule it broke
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{input:?}: {reason}")]
pub struct Rejected {
    /// Leading excerpt of the raw input
    pub input: String,
    pub reason: RejectReason,
}

impl Rejected {
    pub fn new(raw: &str, reason: RejectReason) -> Self {
        Self {
            input: raw.chars().take(EXCERPT_LEN).collect(),
            reason,
        }
    }
}

/// Validate an untrusted path-like string.
///
/// Returns the original input on success. Use [`CanonicalPath::parse`] to get
/// the normalized form used as a resource identity.
pub fn validate(raw: &str) -> Result<&str, Rejected> {
    check_path(raw)?;
    Ok(raw)
}

/// Validate an ignore pattern read from a file inside `project_root`.
///
/// Applies the decode, normalization, NUL, look-alike dot, backslash,
/// dot-run and traversal checks, then requires the pattern to resolve inside
/// the project root. Returns the normalized pattern.
pub fn validate_ignore_pattern(raw: &str, project_root: &Path) -> Result<String, Rejected> {
    let reject = |reason| Rejected::new(raw, reason);

    if raw.len() > MAX_INPUT_LEN {
        return Err(reject(RejectReason::TooLong));
    }
    let decoded = decode_fixed_point(raw).map_err(reject)?;
    let normalized: String = decoded.nfc().collect();

    check_characters(&normalized).map_err(reject)?;
    if normalized.contains('\\') {
        return Err(reject(RejectReason::Backslash));
    }
    check_dots(&normalized).map_err(reject)?;

    let root = project_root
        .absolutize()
        .map_err(|_| reject(RejectReason::EscapesRoot))?;
    let joined = root.join(normalized.trim_start_matches('/'));
    let resolved = joined
        .absolutize()
        .map_err(|_| reject(RejectReason::EscapesRoot))?;
    if !resolved.starts_with(&root) {
        return Err(reject(RejectReason::EscapesRoot));
    }

    Ok(normalized)
}

/// The form ignore patterns are matched in: percent-decoded and NFC.
///
/// Input that cannot be decoded is returned unchanged; such paths are
/// rejected by [`CanonicalPath::parse`] anyway.
pub fn match_form(raw: &str) -> String {
    match decode_fixed_point(raw) {
        Ok(decoded) => decoded.nfc().collect(),
        Err(_) => raw.to_string(),
    }
}

/// Run every path rule and return the decoded, NFC-normalized form
fn check_path(raw: &str) -> Result<String, Rejected> {
    let reject = |reason| Rejected::new(raw, reason);

    if raw.len() > MAX_INPUT_LEN {
        return Err(reject(RejectReason::TooLong));
    }
    let decoded = decode_fixed_point(raw).map_err(reject)?;
    let normalized: String = decoded.nfc().collect();

    check_characters(&normalized).map_err(reject)?;
    if has_absolute_prefix(&normalized) {
        return Err(reject(RejectReason::AbsolutePrefix));
    }
    if normalized.contains('\\') {
        return Err(reject(RejectReason::Backslash));
    }
    check_dots(&normalized).map_err(reject)?;
    if normalized.contains(SHELL_METACHARACTERS)
        || SUBSTITUTIONS.iter().any(|s| normalized.contains(s))
    {
        return Err(reject(RejectReason::ShellMetacharacter));
    }
    if !stays_under_root(&normalized) {
        return Err(reject(RejectReason::EscapesRoot));
    }

    Ok(normalized)
}

/// Percent-decode until the output stops changing
fn decode_fixed_point(raw: &str) -> Result<String, RejectReason> {
    let mut current = raw.to_string();
    for _ in 0..MAX_DECODE_ROUNDS {
        if !escapes_well_formed(&current) {
            return Err(RejectReason::MalformedEncoding);
        }
        let decoded =
            urlencoding::decode(&current).map_err(|_| RejectReason::MalformedEncoding)?;
        if decoded == current {
            return Ok(current);
        }
        let next = decoded.into_owned();
        current = next;
    }
    Err(RejectReason::DecodeDepth)
}

/// Every '%' must introduce two hex digits
fn escapes_well_formed(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

fn check_characters(s: &str) -> Result<(), RejectReason> {
    if s.contains('\0') {
        return Err(RejectReason::NulByte);
    }
    if s.chars().any(char::is_control) {
        return Err(RejectReason::ControlCharacter);
    }
    if s.contains(HOMOGLYPH_DOTS) {
        return Err(RejectReason::HomoglyphDot);
    }
    Ok(())
}

/// Drive letters (`C:`) and UNC (`\\server`) prefixes, with or without a leading '/'
fn has_absolute_prefix(s: &str) -> bool {
    let is_drive = |p: &str| {
        let bytes = p.as_bytes();
        bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
    };
    s.starts_with("\\\\") || is_drive(s) || s.strip_prefix('/').is_some_and(is_drive)
}

/// Checked on the raw string; resolution would silently collapse `..`
fn check_dots(s: &str) -> Result<(), RejectReason> {
    if s.contains("...") {
        return Err(RejectReason::DotRun);
    }
    if s.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(RejectReason::Traversal);
    }
    Ok(())
}

fn stays_under_root(s: &str) -> bool {
    let root = Path::new(SYNTHETIC_ROOT);
    let candidate = s.strip_prefix('/').unwrap_or(s);
    match root.join(candidate).absolutize() {
        Ok(resolved) => resolved.starts_with(root),
        Err(_) => false,
    }
}

/// A validated, POSIX-style resource path with exactly one leading '/'.
///
/// Only [`CanonicalPath::parse`] and [`CanonicalPath::from_relative`] create
/// values, so holding one proves the string passed every validation rule,
/// is NFC-normalized and is a fixed point of percent-decoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalPath(String);

impl CanonicalPath {
    /// Validate `raw` and build its canonical form
    pub fn parse(raw: &str) -> Result<Self, Rejected> {
        let normalized = check_path(raw)?;

        let mut canonical = String::with_capacity(normalized.len() + 1);
        for segment in normalized.split('/').filter(|s| !s.is_empty() && *s != ".") {
            canonical.push('/');
            canonical.push_str(segment);
        }
        if canonical.is_empty() {
            return Err(Rejected::new(raw, RejectReason::Empty));
        }
        Ok(Self(canonical))
    }

    /// Build the resource path for a file relative to the scan root
    pub fn from_relative(relative: &Path) -> Result<Self, Rejected> {
        let mut joined = String::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| {
                        Rejected::new(
                            &relative.to_string_lossy(),
                            RejectReason::NonUtf8,
                        )
                    })?;
                    joined.push('/');
                    joined.push_str(part);
                }
                Component::CurDir => {}
                _ => {
                    return Err(Rejected::new(
                        &relative.to_string_lossy(),
                        RejectReason::EscapesRoot,
                    ))
                }
            }
        }
        Self::parse(&joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path without its leading '/', as used for ignore matching
    pub fn relative(&self) -> &str {
        &self.0[1..]
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Extension of the file name, if any (a leading dot is not an extension)
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx + 1..]),
        }
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CanonicalPath {
    type Error = Rejected;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CanonicalPath> for String {
    fn from(path: CanonicalPath) -> Self {
        path.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(raw: &str) -> RejectReason {
        validate(raw).unwrap_err().reason
    }

    #[test]
    fn test_match_form_decodes_like_patterns() {
        assert_eq!(match_form("secret%20key.pem"), "secret key.pem");
        assert_eq!(match_form("cafe\u{301}"), "caf\u{e9}");
        assert_eq!(match_form("bad%zz"), "bad%zz");
    }

    #[test]
    fn test_accepts_plain_paths() {
        assert_eq!(validate("/assets/app.js"), Ok("/assets/app.js"));
        assert_eq!(validate("index.html"), Ok("index.html"));
        assert!(validate("/a/./b.txt").is_ok());
    }

    #[test]
    fn test_accepts_web_style_characters() {
        for raw in [
            "/search?q=rust&lang=en",
            "/docs#section",
            "/files[1].txt",
            "/tmpl/{name}.html",
            "/café/naïve.txt",
            "/日本語/ファイル.md",
        ] {
            assert!(validate(raw).is_ok(), "{} should be accepted", raw);
        }
    }

    #[test]
    fn test_rejects_traversal() {
        assert_eq!(reason("../../etc/passwd"), RejectReason::Traversal);
        assert_eq!(reason("/a/../b"), RejectReason::Traversal);
        assert_eq!(reason("/a/.."), RejectReason::Traversal);
        assert_eq!(reason(".."), RejectReason::Traversal);
    }

    #[test]
    fn test_double_dots_inside_names_are_fine() {
        assert!(validate("/release..notes.txt").is_ok());
        assert!(validate("/..hidden").is_ok());
    }

    #[test]
    fn test_rejects_encoded_traversal() {
        assert_eq!(reason("/%2e%2e/etc/passwd"), RejectReason::Traversal);
        // %252e decodes to %2e, then to '.'
        assert_eq!(reason("/%252e%252e/etc"), RejectReason::Traversal);
        assert_eq!(reason("..%2fetc"), RejectReason::Traversal);
    }

    #[test]
    fn test_rejects_malformed_encoding() {
        assert_eq!(reason("/bad%zzescape"), RejectReason::MalformedEncoding);
        assert_eq!(reason("/trailing%2"), RejectReason::MalformedEncoding);
        // decodes to invalid UTF-8
        assert_eq!(reason("/%ff%fe"), RejectReason::MalformedEncoding);
    }

    #[test]
    fn test_rejects_decode_bomb() {
        let mut raw = "%2e".to_string();
        for _ in 0..20 {
            raw = raw.replace('%', "%25");
        }
        assert_eq!(reason(&raw), RejectReason::DecodeDepth);
    }

    #[test]
    fn test_rejects_nul_and_controls() {
        assert_eq!(reason("/a\0b"), RejectReason::NulByte);
        assert_eq!(reason("/a%00b"), RejectReason::NulByte);
        assert_eq!(reason("/a\nb"), RejectReason::ControlCharacter);
    }

    #[test]
    fn test_rejects_homoglyph_dots() {
        for dot in HOMOGLYPH_DOTS {
            let raw = format!("/{}{}/etc", dot, dot);
            assert_eq!(reason(&raw), RejectReason::HomoglyphDot);
        }
    }

    #[test]
    fn test_rejects_prefixes_and_backslashes() {
        assert_eq!(reason("C:/Windows/system32"), RejectReason::AbsolutePrefix);
        assert_eq!(reason("/c:/x"), RejectReason::AbsolutePrefix);
        assert_eq!(reason("\\\\server\\share"), RejectReason::AbsolutePrefix);
        assert_eq!(reason("/a\\b"), RejectReason::Backslash);
        assert_eq!(reason("/a%5cb"), RejectReason::Backslash);
    }

    #[test]
    fn test_rejects_dot_runs() {
        assert_eq!(reason("/a/.../b"), RejectReason::DotRun);
        assert_eq!(reason("/file....txt"), RejectReason::DotRun);
    }

    #[test]
    fn test_rejects_shell_metacharacters() {
        for raw in ["/a;rm", "/a|b", "/a`id`", "/$HOME", "/x$(id)", "/x<(cat)"] {
            assert_eq!(reason(raw), RejectReason::ShellMetacharacter, "{}", raw);
        }
    }

    #[test]
    fn test_rejects_overlong_input() {
        let raw = format!("/{}", "a".repeat(MAX_INPUT_LEN));
        assert_eq!(reason(&raw), RejectReason::TooLong);
    }

    #[test]
    fn test_rejected_excerpt_is_bounded() {
        let raw = format!("/{};", "a".repeat(500));
        let rejected = validate(&raw).unwrap_err();
        assert_eq!(rejected.input.chars().count(), EXCERPT_LEN);
    }

    #[test]
    fn test_canonical_path_normalizes() {
        let path = CanonicalPath::parse("assets//app.js").unwrap();
        assert_eq!(path.as_str(), "/assets/app.js");

        let path = CanonicalPath::parse("/./a/b%20c.txt").unwrap();
        assert_eq!(path.as_str(), "/a/b c.txt");

        // decomposed e + combining acute becomes the precomposed form
        let path = CanonicalPath::parse("/cafe\u{0301}.txt").unwrap();
        assert_eq!(path.as_str(), "/caf\u{00e9}.txt");
    }

    #[test]
    fn test_canonical_path_rejects_empty() {
        assert_eq!(CanonicalPath::parse("/").unwrap_err().reason, RejectReason::Empty);
        assert_eq!(CanonicalPath::parse("").unwrap_err().reason, RejectReason::Empty);
    }

    #[test]
    fn test_canonical_path_from_relative() {
        let rel = Path::new("assets").join("css").join("site.css");
        let path = CanonicalPath::from_relative(&rel).unwrap();
        assert_eq!(path.as_str(), "/assets/css/site.css");
        assert_eq!(path.relative(), "assets/css/site.css");
        assert_eq!(path.file_name(), "site.css");
        assert_eq!(path.extension(), Some("css"));
    }

    #[test]
    fn test_canonical_path_extension_edge_cases() {
        assert_eq!(CanonicalPath::parse("/.env").unwrap().extension(), None);
        assert_eq!(CanonicalPath::parse("/Makefile").unwrap().extension(), None);
        assert_eq!(
            CanonicalPath::parse("/a.tar.gz").unwrap().extension(),
            Some("gz")
        );
    }

    #[test]
    fn test_canonical_path_serde_validates() {
        let ok: CanonicalPath = serde_json::from_str("\"/a.txt\"").unwrap();
        assert_eq!(ok.as_str(), "/a.txt");
        assert!(serde_json::from_str::<CanonicalPath>("\"/../a.txt\"").is_err());
    }

    #[test]
    fn test_ignore_pattern_validation() {
        let root = Path::new("/project");
        assert_eq!(
            validate_ignore_pattern("*.log", root).unwrap(),
            "*.log".to_string()
        );
        assert!(validate_ignore_pattern("/build/**", root).is_ok());
        assert!(validate_ignore_pattern("node_modules/", root).is_ok());

        assert_eq!(
            validate_ignore_pattern("../secret", root).unwrap_err().reason,
            RejectReason::Traversal
        );
        assert_eq!(
            validate_ignore_pattern("a\\b", root).unwrap_err().reason,
            RejectReason::Backslash
        );
        assert_eq!(
            validate_ignore_pattern("\u{FF0E}\u{FF0E}/x", root)
                .unwrap_err()
                .reason,
            RejectReason::HomoglyphDot
        );
    }
}
