//! Shared fixtures for the integration suites.

use std::fs;
use std::path::Path;

use memvc::config::RepoConfig;
use memvc::hash::ObjectHash;
use memvc::internal::repo::Repository;

/// Route engine tracing to test output at DEBUG, ignoring `RUST_LOG`.
/// `try_init` tolerates being called from several tests in one binary;
/// only the first call installs the subscriber.
#[allow(dead_code)]
pub fn init_logger() {
    use tracing_subscriber::util::SubscriberInitExt;
    let _ = tracing_subscriber::fmt::Subscriber::builder()
        .with_target(false)
        .without_time()
        .with_level(true)
        .with_max_level(tracing::Level::DEBUG)
        .finish()
        .try_init();
}

/// Default config with a deterministic author.
pub fn test_config() -> RepoConfig {
    let mut config = RepoConfig::default();
    config.author.name = "curator".to_string();
    config.author.email = "curator@agents.local".to_string();
    config
}

/// A fresh repository in a temp dir.
pub fn temp_repo() -> (tempfile::TempDir, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), test_config()).unwrap();
    (dir, repo)
}

/// Write one working-tree file.
#[allow(dead_code)]
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join("current").join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Write, stage, and commit one file.
#[allow(dead_code)]
pub fn commit_file(repo: &Repository, root: &Path, rel: &str, content: &str, message: &str) -> ObjectHash {
    write_file(root, rel, content);
    repo.stage(Path::new(rel)).unwrap();
    repo.commit(message).unwrap()
}

/// Read one working-tree file as text.
#[allow(dead_code)]
pub fn read_file(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join("current").join(rel)).unwrap()
}
