//! File discovery module for finding encodable files.
//!
//! Scans the top level of the provided directory for files with a
//! processable container extension (case-insensitive). Subdirectories are
//! not searched.

use crate::encode::is_processable_file;
use crate::error::{CoreError, CoreResult};

use std::path::{Path, PathBuf};

/// Finds files eligible for encoding in the specified directory.
///
/// Results are sorted for deterministic submission order. Returns
/// `CoreError::NoFilesFound` when the directory holds no processable file.
pub fn find_processable_files(input_dir: &Path) -> CoreResult<Vec<PathBuf>> {
    let read_dir = std::fs::read_dir(input_dir)?;
    let mut files: Vec<PathBuf> = read_dir
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            is_processable_file(&path).then_some(path)
        })
        .collect();
    files.sort();

    if files.is_empty() {
        Err(CoreError::NoFilesFound)
    } else {
        Ok(files)
    }
}
