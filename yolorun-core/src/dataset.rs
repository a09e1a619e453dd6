//! Dataset reduction: delete the image/label pairs named in a removal list.
//!
//! Independent of the training pipeline; it shares no state with a run.

use crate::error::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions removed for every listed base name.
pub const REMOVED_EXTENSIONS: &[&str] = &["png", "txt"];

/// Outcome of one reduction pass.
#[derive(Debug, Default)]
pub struct ReductionReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Read base names, one per line; blank lines are skipped and whitespace trimmed.
pub fn load_names(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// `true` when `file_name` is `<name>.png` or `<name>.txt` for a listed name.
fn is_listed(file_name: &str, names: &HashSet<&str>) -> bool {
    REMOVED_EXTENSIONS.iter().any(|ext| {
        file_name
            .strip_suffix(*ext)
            .and_then(|rest| rest.strip_suffix('.'))
            .is_some_and(|stem| names.contains(stem))
    })
}

/// Walk `root` and delete every file whose name is a listed base name with a
/// removed extension. Files that cannot be deleted are recorded and skipped.
pub fn remove_listed_files(root: &Path, names: &[String]) -> ReductionReport {
    let names: HashSet<&str> = names.iter().map(String::as_str).collect();
    let mut report = ReductionReport::default();

    for entry in WalkDir::new(root).into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        if !is_listed(file_name, &names) {
            continue;
        }
        let path = entry.into_path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed");
                report.removed.push(path);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove");
                report.failed.push((path, e.to_string()));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_load_names_trims_and_skips_blank() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("remove.txt");
        std::fs::write(&list, "boat72_so\n\n  buoy3  \n").unwrap();
        assert_eq!(load_names(&list).unwrap(), vec!["boat72_so", "buoy3"]);
    }

    #[test]
    fn test_removes_png_and_txt_anywhere_in_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("images/train/boat72_so.png"));
        touch(&root.join("labels/train/boat72_so.txt"));
        touch(&root.join("images/val/boat72_so.jpg"));
        touch(&root.join("images/val/boat72_so_extra.png"));
        touch(&root.join("labels/val/keep.txt"));

        let report = remove_listed_files(root, &["boat72_so".to_string()]);

        assert_eq!(report.removed.len(), 2);
        assert!(report.failed.is_empty());
        assert!(!root.join("images/train/boat72_so.png").exists());
        assert!(!root.join("labels/train/boat72_so.txt").exists());
        assert!(root.join("images/val/boat72_so.jpg").exists());
        assert!(root.join("images/val/boat72_so_extra.png").exists());
        assert!(root.join("labels/val/keep.txt").exists());
    }

    #[test]
    fn test_is_listed_requires_exact_stem() {
        let names: HashSet<&str> = ["a"].into_iter().collect();
        assert!(is_listed("a.png", &names));
        assert!(is_listed("a.txt", &names));
        assert!(!is_listed("ba.png", &names));
        assert!(!is_listed("a.pngx", &names));
        assert!(!is_listed("apng", &names));
    }
}
