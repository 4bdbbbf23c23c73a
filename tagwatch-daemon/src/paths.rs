use std::path::{Path, PathBuf};

use tagwatch_core::registry;

pub const DAEMON_SOCKET: &str = "tagwatch.sock";

pub fn tagwatch_root(home: &Path) -> PathBuf {
    registry::root_at(home)
}

pub fn run_dir(home: &Path) -> PathBuf {
    tagwatch_root(home).join("run")
}

pub fn cache_dir(home: &Path) -> PathBuf {
    tagwatch_root(home).join("cache")
}

pub fn socket_path(home: &Path) -> PathBuf {
    tagwatch_root(home).join(DAEMON_SOCKET)
}
