//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated scratch root for directories under test
//! - A small-file configuration so tests stay fast
//!
//! # Usage
//!
//! ```ignore
//! use fsverify_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let dir = env.create_dir("worker-0").unwrap();
//!     // env.files is a 1-4 KiB FileConfig with immediate_check off
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{Config, FileConfig};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with a private scratch root
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Root under which test directories are created
    pub root: PathBuf,
    /// Per-file settings sized for unit tests
    pub files: FileConfig,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join(format!("fsverify-test-{}", test_id));
        std::fs::create_dir_all(&root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            files: FileConfig::new(10, 10, false),
            test_id,
        })
    }

    /// Same environment but with `immediate_check` turned on
    pub fn with_immediate_check(mut self) -> Self {
        self.files.immediate_check = true;
        self
    }

    /// A full `Config` carrying this environment's file settings
    pub fn config(&self) -> Config {
        Config {
            files: self.files,
            ..Config::default()
        }
    }

    /// Create a test directory
    pub fn create_dir(&self, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = self.root.join(relative_path);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Write a config file at `relative_path` and return its location
    pub fn write_config(&self, relative_path: &str, config: &Config) -> anyhow::Result<PathBuf> {
        let path = self.root.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, config.to_toml())?;
        Ok(path)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
