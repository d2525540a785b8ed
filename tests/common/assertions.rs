//! Filesystem assertions for scratch cleanup

use std::path::{Path, PathBuf};

/// Every file or directory under `root`, recursively
pub fn entries_under(root: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .collect()
}

/// Assert that nothing was left behind under `root`
pub fn assert_no_leftovers(root: &Path) {
    let left = entries_under(root);
    assert!(
        left.is_empty(),
        "expected {} to be empty, found {:?}",
        root.display(),
        left
    );
}

/// Assert that `dir` contains exactly the named files and nothing else
pub fn assert_only_files(dir: &Path, names: &[&str]) {
    let mut found: Vec<String> = entries_under(dir)
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    found.sort();
    let mut expected: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    expected.sort();
    assert_eq!(found, expected, "unexpected contents of {}", dir.display());
}
