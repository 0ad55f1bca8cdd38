//! Image locator: find the file behind an author-written image path.
//!
//! Candidates are tried in a fixed order and the first existing file wins:
//!
//! 1. the path relative to the source document's directory
//! 2. the path relative to the working directory
//! 3. the file name inside an assets-like subdirectory of the source directory
//! 4. the file name inside an assets-like subdirectory of the working directory
//! 5. the file name inside any assets-like directory found by a depth-bounded
//!    walk of the working directory, visited in lexical order
//!
//! The walk follows symlinks; walkdir's loop detection drops entries that
//! would revisit an ancestor, and the depth limit bounds the rest.

use crate::config::{ConversionConfig, ReportingLevel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Which candidate rule located a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Candidate {
    SourceRelative,
    WorkingRelative,
    SourceAssets,
    WorkingAssets,
    Walk,
}

/// A located image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub path: PathBuf,
    pub candidate: Candidate,
}

/// Searches the candidate directories for image files.
#[derive(Debug, Clone)]
pub struct ImageLocator {
    source_dir: PathBuf,
    working_dir: PathBuf,
    asset_dir_names: Vec<String>,
    walk_depth: usize,
    reporting: ReportingLevel,
}

impl ImageLocator {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        config: &ConversionConfig,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            working_dir: working_dir.into(),
            asset_dir_names: config.asset_dir_names.clone(),
            walk_depth: config.walk_depth,
            reporting: config.reporting,
        }
    }

    /// Locator whose working directory is `config.working_dir`, falling back
    /// to the process's current directory.
    pub fn for_source(source_dir: impl Into<PathBuf>, config: &ConversionConfig) -> Self {
        let cwd = config
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(source_dir, cwd, config)
    }

    /// Return the first existing candidate for `written`, or `None`.
    pub fn locate(&self, written: &str) -> Option<Located> {
        let written = written.trim().trim_start_matches('<').trim_end_matches('>');
        if written.is_empty() || is_remote(written) {
            return None;
        }
        let rel = Path::new(written);
        let file_name = rel.file_name()?;

        let fixed = [
            (self.source_dir.join(rel), Candidate::SourceRelative),
            (self.working_dir.join(rel), Candidate::WorkingRelative),
        ];
        for (path, candidate) in fixed {
            if path.is_file() {
                return Some(self.found(written, path, candidate));
            }
        }

        for (root, candidate) in [
            (&self.source_dir, Candidate::SourceAssets),
            (&self.working_dir, Candidate::WorkingAssets),
        ] {
            for name in &self.asset_dir_names {
                let path = root.join(name).join(file_name);
                if path.is_file() {
                    return Some(self.found(written, path, candidate));
                }
            }
        }

        self.walk(file_name.as_ref())
            .map(|path| self.found(written, path, Candidate::Walk))
    }

    fn found(&self, written: &str, path: PathBuf, candidate: Candidate) -> Located {
        self.reporting.note(format_args!(
            "Located '{}' via {:?}: {}",
            written,
            candidate,
            path.display()
        ));
        Located { path, candidate }
    }

    fn walk(&self, file_name: &Path) -> Option<PathBuf> {
        if self.walk_depth == 0 {
            return None;
        }
        WalkDir::new(&self.working_dir)
            .max_depth(self.walk_depth)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_dir() && self.is_asset_dir(e))
            .map(|e| e.path().join(file_name))
            .find(|candidate| candidate.is_file())
    }

    fn is_asset_dir(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        self.asset_dir_names.iter().any(|n| n == name.as_ref())
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// `http://`, `https://` and `data:` references are never looked up on disk.
pub fn is_remote(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://") || path.starts_with("data:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn locator(src: &Path, cwd: &Path) -> ImageLocator {
        ImageLocator::new(src, cwd, &ConversionConfig::default())
    }

    #[test]
    fn source_relative_beats_walk() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("doc");
        touch(&src.join("img/chart.png"));
        touch(&tmp.path().join("deep/nested/assets/chart.png"));

        let found = locator(&src, tmp.path()).locate("img/chart.png").unwrap();
        assert_eq!(found.candidate, Candidate::SourceRelative);
        assert_eq!(found.path, src.join("img/chart.png"));
    }

    #[test]
    fn working_relative_second() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("doc");
        fs::create_dir_all(&src).unwrap();
        touch(&tmp.path().join("img/chart.png"));

        let found = locator(&src, tmp.path()).locate("img/chart.png").unwrap();
        assert_eq!(found.candidate, Candidate::WorkingRelative);
    }

    #[test]
    fn asset_dir_of_source_by_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("doc");
        touch(&src.join("assets/chart.png"));

        let found = locator(&src, tmp.path()).locate("old/location/chart.png").unwrap();
        assert_eq!(found.candidate, Candidate::SourceAssets);
        assert_eq!(found.path, src.join("assets/chart.png"));
    }

    #[test]
    fn asset_dir_of_working_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("doc");
        fs::create_dir_all(&src).unwrap();
        touch(&tmp.path().join("images/chart.png"));

        let found = locator(&src, tmp.path()).locate("chart.png").unwrap();
        assert_eq!(found.candidate, Candidate::WorkingAssets);
    }

    #[test]
    fn walk_finds_nested_asset_dir_in_lexical_order() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("doc");
        fs::create_dir_all(&src).unwrap();
        touch(&tmp.path().join("b/pics/chart.png"));
        touch(&tmp.path().join("a/figures/chart.png"));

        let found = locator(&src, tmp.path()).locate("chart.png").unwrap();
        assert_eq!(found.candidate, Candidate::Walk);
        assert_eq!(found.path, tmp.path().join("a/figures/chart.png"));
    }

    #[test]
    fn walk_respects_depth_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("doc");
        fs::create_dir_all(&src).unwrap();
        touch(&tmp.path().join("l1/l2/l3/pics/chart.png"));

        let config = ConversionConfig::builder().walk_depth(2).build().unwrap();
        let shallow = ImageLocator::new(&src, tmp.path(), &config);
        assert!(shallow.locate("chart.png").is_none());

        let config = ConversionConfig::builder().walk_depth(4).build().unwrap();
        let deep = ImageLocator::new(&src, tmp.path(), &config);
        assert!(deep.locate("chart.png").is_some());
    }

    #[test]
    fn hidden_directories_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("doc");
        fs::create_dir_all(&src).unwrap();
        touch(&tmp.path().join(".cache/pics/chart.png"));

        assert!(locator(&src, tmp.path()).locate("chart.png").is_none());
    }

    #[test]
    fn remote_and_empty_paths_are_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let loc = locator(tmp.path(), tmp.path());
        assert!(loc.locate("https://example.org/a.png").is_none());
        assert!(loc.locate("").is_none());
        assert!(loc.locate("   ").is_none());
    }
}
