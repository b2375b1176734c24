// Output collection after a pipeline run

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Enumerates the artifacts a pipeline published
///
/// Symlinked directories are not descended into.
#[derive(Debug, Clone, Default)]
pub struct OutputCollector;

impl OutputCollector {
    pub fn new() -> Self {
        Self
    }

    /// Every regular file under `output_dir`, sorted
    ///
    /// Directories are traversed but not listed. A missing or unreadable
    /// directory yields an empty list; unreadable entries below it are skipped.
    pub fn collect(&self, output_dir: &Path) -> Vec<PathBuf> {
        if !output_dir.is_dir() {
            tracing::warn!("Output directory not found: {}", output_dir.display());
            return Vec::new();
        }

        let mut files: Vec<PathBuf> = WalkDir::new(output_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Skipping unreadable output entry: {}", e);
                    None
                },
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();

        files.sort();
        tracing::debug!("Collected {} output files from {}", files.len(), output_dir.display());
        files
    }
}
