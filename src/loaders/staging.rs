use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{RagError, Result};

/// An uploaded file written to the staging directory.
///
/// The backing file is removed when this value is dropped, whatever happened
/// to the load in between.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    file_name: String,
}

impl StagedUpload {
    #[inline]
    pub fn write(staging_dir: &Path, file_name: &str, bytes: &[u8]) -> Result<Self> {
        let file_name = sanitize_file_name(file_name)?;
        fs::create_dir_all(staging_dir)?;

        let suffix = Path::new(&file_name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(staging_dir)?;
        file.write_all(bytes)?;
        file.flush()?;

        debug!(
            "Staged {} ({} bytes) at {}",
            file_name,
            bytes.len(),
            file.path().display()
        );
        Ok(Self { file, file_name })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// The client-supplied name, stripped of any directory components
    #[inline]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Copy the staged bytes to `dir/<file name>`, replacing an older copy
    #[inline]
    pub fn retain_in(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let target = dir.join(&self.file_name);
        fs::copy(self.path(), &target)?;
        debug!("Retained upload as {}", target.display());
        Ok(target)
    }
}

/// Reduce a client-supplied name to a bare file name
#[inline]
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." {
        return Err(RagError::load_failure(name, "invalid file name"));
    }
    Ok(base.to_string())
}
