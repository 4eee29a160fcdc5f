/*!
 * Integration tests for ignore files during scanning
 */

use sitesync::config::DeployConfig;
use sitesync::core::directory::Scanner;
use sitesync::error::SiteError;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

async fn scanned_paths(root: &Path, config: &DeployConfig) -> Vec<String> {
    Scanner::new(config)
        .scan(root)
        .await
        .unwrap()
        .records
        .into_iter()
        .map(|r| r.path.to_string())
        .collect()
}

#[tokio::test]
async fn test_gitignore_is_the_fallback() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    fs::create_dir_all(root.join("target")).unwrap();
    fs::write(root.join(".gitignore"), "target/\n*.log\n").unwrap();
    fs::write(root.join("index.html"), "<p>hi</p>").unwrap();
    fs::write(root.join("build.log"), "log").unwrap();
    fs::write(root.join("target/out.bin"), [0u8, 1, 2]).unwrap();

    let paths = scanned_paths(root, &DeployConfig::default()).await;
    assert_eq!(paths, vec!["/index.html"]);
}

#[tokio::test]
async fn test_primary_ignore_file_shadows_fallback() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    fs::write(root.join(".sitesignore"), "*.md\n").unwrap();
    fs::write(root.join(".gitignore"), "*.html\n").unwrap();
    fs::write(root.join("index.html"), "<p>hi</p>").unwrap();
    fs::write(root.join("README.md"), "# readme").unwrap();

    // neither ignore file is published, and only the primary one is applied
    let paths = scanned_paths(root, &DeployConfig::default()).await;
    assert_eq!(paths, vec!["/index.html"]);
}

#[tokio::test]
async fn test_negation_reincludes_files() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    fs::create_dir_all(root.join("docs")).unwrap();
    fs::write(root.join(".sitesignore"), "docs/*\n!docs/keep.txt\n").unwrap();
    fs::write(root.join("docs/keep.txt"), "keep").unwrap();
    fs::write(root.join("docs/drop.txt"), "drop").unwrap();

    let paths = scanned_paths(root, &DeployConfig::default()).await;
    assert_eq!(paths, vec!["/docs/keep.txt"]);
}

#[tokio::test]
async fn test_custom_ignore_file_names() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    fs::write(root.join(".deployignore"), "secret.txt\n").unwrap();
    fs::write(root.join("secret.txt"), "s").unwrap();
    fs::write(root.join("public.txt"), "p").unwrap();

    let config = DeployConfig {
        ignore_files: vec![".deployignore".to_string()],
        ..Default::default()
    };
    let paths = scanned_paths(root, &config).await;
    assert_eq!(paths, vec!["/public.txt"]);
}

#[tokio::test]
async fn test_escaped_file_name_matches_its_pattern() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    fs::write(root.join(".sitesignore"), "secret%20key.pem\n").unwrap();
    fs::write(root.join("secret%20key.pem"), "private").unwrap();
    fs::write(root.join("index.html"), "<p>hi</p>").unwrap();

    let paths = scanned_paths(root, &DeployConfig::default()).await;
    assert_eq!(paths, vec!["/index.html"]);
}

#[tokio::test]
async fn test_plain_pattern_matches_escaped_file_name() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    fs::write(root.join(".sitesignore"), "secret key.pem\n").unwrap();
    fs::write(root.join("secret%20key.pem"), "private").unwrap();
    fs::write(root.join("index.html"), "<p>hi</p>").unwrap();

    let paths = scanned_paths(root, &DeployConfig::default()).await;
    assert_eq!(paths, vec!["/index.html"]);
}

#[tokio::test]
async fn test_escaping_pattern_aborts_scan() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    fs::write(root.join(".sitesignore"), "# comment\n\n..\\..\\windows\n").unwrap();
    fs::write(root.join("a.txt"), "a").unwrap();

    let err = Scanner::new(&DeployConfig::default())
        .scan(root)
        .await
        .unwrap_err();
    match err {
        SiteError::IgnorePattern { line, .. } => assert_eq!(line, 3),
        other => panic!("expected ignore pattern error, got {}", other),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlinks_are_not_followed_by_default() {
    let temp = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let root = temp.path();

    fs::write(outside.path().join("secret.txt"), "secret").unwrap();
    fs::write(root.join("index.html"), "<p>hi</p>").unwrap();
    std::os::unix::fs::symlink(outside.path(), root.join("linked")).unwrap();

    let paths = scanned_paths(root, &DeployConfig::default()).await;
    assert_eq!(paths, vec!["/index.html"]);

    let following = DeployConfig {
        follow_symlinks: true,
        ..Default::default()
    };
    let paths = scanned_paths(root, &following).await;
    assert_eq!(paths, vec!["/index.html", "/linked/secret.txt"]);
}
