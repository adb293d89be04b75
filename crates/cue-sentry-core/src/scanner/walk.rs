use crate::fingerprint::extension_of;
use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Which files a walk reports: an extension allow-list and glob ignore
/// patterns matched against the full path.
#[derive(Debug, Clone)]
pub struct WalkFilter {
    extensions: Vec<String>,
    ignore_patterns: Vec<Pattern>,
}

impl WalkFilter {
    pub fn new(extensions: &[String], ignore_globs: &[String]) -> Self {
        let ignore_patterns = ignore_globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();
        Self {
            extensions: crate::config::normalize_extensions(extensions),
            ignore_patterns,
        }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }

    pub fn accepts(&self, path: &Path) -> bool {
        let ext = extension_of(path);
        self.extensions.iter().any(|e| *e == ext) && !self.is_ignored(path)
    }
}

/// Sequential depth-first walk of `root`, returning accepted files in a
/// stable (sorted per directory) order. Fails only when `root` itself cannot
/// be read; unreadable subdirectories and entries are logged and skipped.
pub fn collect_candidates(root: &Path, filter: &WalkFilter) -> io::Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a readable directory", root.display()),
        ));
    }
    let mut found = Vec::new();
    visit_dirs(root, filter, &mut found, true)?;
    Ok(found)
}

fn visit_dirs(
    dir: &Path,
    filter: &WalkFilter,
    found: &mut Vec<PathBuf>,
    is_root: bool,
) -> io::Result<()> {
    if !is_root && filter.is_ignored(dir) {
        return Ok(());
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if is_root => {
            return Err(io::Error::new(
                err.kind(),
                format!("Error reading directory {}: {}", dir.display(), err),
            ));
        }
        Err(err) => {
            warn!("Skipping directory {}: {}", dir.display(), err);
            return Ok(());
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(err) => {
                warn!("Error reading entry in directory {}: {}", dir.display(), err);
                None
            }
        })
        .collect();
    paths.sort();

    for path in paths {
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Error getting metadata for {}: {}", path.display(), err);
                continue;
            }
        };

        if metadata.file_type().is_symlink() {
            continue;
        }
        if metadata.is_dir() {
            visit_dirs(&path, filter, found, false)?;
        } else if metadata.len() > 0 && filter.accepts(&path) {
            found.push(path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn filter() -> WalkFilter {
        WalkFilter::new(
            &[".srt".to_string(), "mkv".to_string()],
            &["*sample*".to_string(), "*.tmp".to_string()],
        )
    }

    #[test]
    fn test_collects_allowed_extensions_only() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Show/Season 1")).unwrap();
        fs::create_dir_all(root.join("Sample")).unwrap();
        fs::write(root.join("Show/Season 1/e01.srt"), "x").unwrap();
        fs::write(root.join("Show/Season 1/e01.MKV"), "x").unwrap();
        fs::write(root.join("Show/notes.txt"), "x").unwrap();
        fs::write(root.join("Show/empty.srt"), "").unwrap();
        fs::write(root.join("Show/movie-sample.srt"), "x").unwrap();

        let found = collect_candidates(root, &filter()).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["e01.MKV", "e01.srt"]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(collect_candidates(&dir.path().join("gone"), &filter()).is_err());
    }
}
