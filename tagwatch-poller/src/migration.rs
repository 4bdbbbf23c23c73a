//! Cache-key migration guard.
//!
//! While a migration rewrites the key scheme, no cycle may read or write the
//! cache. The migration itself runs elsewhere; tagwatch only observes a flag.

use std::path::{Path, PathBuf};

use tagwatch_core::registry::root_at;

pub trait MigrationStatus: Send + Sync {
    fn is_running(&self) -> bool;
}

/// Reports a migration as running while a marker file exists.
#[derive(Debug, Clone)]
pub struct MarkerFileMigration {
    marker: PathBuf,
}

impl MarkerFileMigration {
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Marker at `<home>/.tagwatch/run/cache-migration.lock`.
    pub fn at(home: &Path) -> Self {
        Self::new(marker_path_at(home))
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }
}

impl MigrationStatus for MarkerFileMigration {
    fn is_running(&self) -> bool {
        self.marker.exists()
    }
}

pub fn marker_path_at(home: &Path) -> PathBuf {
    root_at(home).join("run").join("cache-migration.lock")
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn marker_presence_toggles_flag() {
        let home = TempDir::new().unwrap();
        let migration = MarkerFileMigration::at(home.path());
        assert!(!migration.is_running());

        std::fs::create_dir_all(migration.marker().parent().unwrap()).unwrap();
        std::fs::write(migration.marker(), "").unwrap();
        assert!(migration.is_running());
    }
}
