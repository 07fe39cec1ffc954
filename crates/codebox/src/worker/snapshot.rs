use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Entry names currently in `dir`. A missing directory is an empty set.
pub(crate) fn snapshot_entries(dir: &Path) -> io::Result<BTreeSet<OsString>> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|entry| entry.map(|entry| entry.file_name()))
            .collect(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeSet::new()),
        Err(err) => Err(err),
    }
}

/// Declared paths first, then files that appeared in `save_dir`.
///
/// Only existing regular files survive. Discovered names are visited in
/// sorted order and a file is listed once even when it was both declared
/// and discovered.
pub(crate) fn collect_artifacts(
    declared: &[PathBuf],
    save_dir: &Path,
    before: &BTreeSet<OsString>,
    after: &BTreeSet<OsString>,
) -> Vec<PathBuf> {
    let mut artifacts = Vec::new();
    let mut seen = BTreeSet::new();

    let discovered = after
        .difference(before)
        .map(|name| save_dir.join(name));

    for path in declared.iter().cloned().chain(discovered) {
        if is_regular_file(&path) && seen.insert(identity(&path)) {
            artifacts.push(path);
        }
    }
    artifacts
}

fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.is_file())
}

fn identity(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
