use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::record::Record;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("cannot scan {path:?}: {source}")]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path:?} is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Text that marks a line as one occurrence.
    pub marker: String,
    /// File extensions to look at, without the leading dot.
    pub extensions: Vec<String>,
    /// Joins the components of the emitted relative paths.
    pub separator: char,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            marker: "* @todo".to_string(),
            extensions: vec!["cpp".to_string()],
            separator: '/',
        }
    }
}

impl ScanOptions {
    fn wants(&self, path: &Path) -> bool {
        let Some(extension) = path.extension().and_then(OsStr::to_str) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|wanted| wanted.trim_start_matches('.') == extension)
    }
}

/// Walks `root` and returns one record per matching file that contains the
/// marker at least once. Records come out sorted by path.
pub fn scan(root: &Path, options: &ScanOptions) -> Result<Vec<Record>, ScanError> {
    let metadata = std::fs::metadata(root).map_err(|source| ScanError::Root {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() || !options.wants(entry.path()) {
            continue;
        }

        let bytes = std::fs::read(entry.path()).map_err(|source| ScanError::Read {
            path: entry.path().to_path_buf(),
            source,
        })?;
        let count = count_markers(&String::from_utf8_lossy(&bytes), &options.marker);
        if count == 0 {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let path = join_components(relative, options.separator);
        debug!(path = %path, count, "found markers");
        records.push(Record::new(path, count as i64));
    }

    Ok(records)
}

/// Number of lines in `content` that contain `marker`.
pub fn count_markers(content: &str, marker: &str) -> usize {
    content.lines().filter(|line| line.contains(marker)).count()
}

fn join_components(path: &Path, separator: char) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join(&separator.to_string())
}
