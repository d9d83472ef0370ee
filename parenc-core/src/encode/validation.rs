//! Input validation for encode runs.

use std::path::{Path, PathBuf};

/// Extensions the encode path accepts, matched case-insensitively.
pub const PROCESSABLE_EXTENSIONS: &[&str] = &["mkv", "mp4", "mov"];

/// Checks that the given path is an existing file with a processable
/// container extension.
#[must_use]
pub fn is_processable_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                PROCESSABLE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
            .unwrap_or(false)
}

/// Splits a candidate file list into encodable inputs and rejected names.
pub trait FileValidator {
    /// Returns `(valid_paths, invalid_names)`.
    fn validate(&self) -> (Vec<PathBuf>, Vec<String>);
}

/// [`FileValidator`] over an explicit file list, accepting existing files
/// with a known container extension.
pub struct ExtensionValidator {
    files: Vec<PathBuf>,
}

impl ExtensionValidator {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }
}

impl FileValidator for ExtensionValidator {
    fn validate(&self) -> (Vec<PathBuf>, Vec<String>) {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for path in &self.files {
            if is_processable_file(path) {
                valid.push(path.clone());
            } else {
                invalid.push(path.display().to_string());
            }
        }
        (valid, invalid)
    }
}
