//! Persisted plot artifacts.
//!
//! The latest vector document and toolpath live at fixed names inside
//! one directory and are replaced wholesale on every successful run.
//! Writes go to a temporary file in the same directory which is then
//! renamed over the target, so readers never observe a partial file and
//! a failed run leaves the previous artifact in place.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Default artifact directory, relative to the working directory.
pub const DEFAULT_ARTIFACT_DIR: &str = "assets/created";
/// File name of the vector path document.
pub const SVG_FILE_NAME: &str = "processed_image.svg";
/// File name of the toolpath program.
pub const GCODE_FILE_NAME: &str = "processed_image.gcode";

/// Errors reading or writing artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// A filesystem operation failed.
    #[error("{action} {path}: {source}")]
    Io {
        /// What was being attempted.
        action: &'static str,
        /// The file or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ArtifactError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Location of the SVG and G-code artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new(DEFAULT_ARTIFACT_DIR)
    }
}

impl ArtifactStore {
    /// Store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The artifact directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the vector path document.
    #[must_use]
    pub fn svg_path(&self) -> PathBuf {
        self.dir.join(SVG_FILE_NAME)
    }

    /// Path of the toolpath program.
    #[must_use]
    pub fn gcode_path(&self) -> PathBuf {
        self.dir.join(GCODE_FILE_NAME)
    }

    /// Atomically replace the vector path document.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] if the directory cannot be created
    /// or the file cannot be written.
    pub fn write_svg(&self, svg: &str) -> Result<PathBuf, ArtifactError> {
        let path = self.svg_path();
        self.write_atomic(&path, svg.as_bytes())?;
        Ok(path)
    }

    /// Atomically replace the toolpath program.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] if the directory cannot be created
    /// or the file cannot be written.
    pub fn write_gcode(&self, gcode: &str) -> Result<PathBuf, ArtifactError> {
        let path = self.gcode_path();
        self.write_atomic(&path, gcode.as_bytes())?;
        Ok(path)
    }

    /// Read the vector path document, or `None` if none was written yet.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] for read failures other than a
    /// missing file.
    pub fn read_svg(&self) -> Result<Option<String>, ArtifactError> {
        read_optional(&self.svg_path())
    }

    /// Read the toolpath program, or `None` if none was written yet.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] for read failures other than a
    /// missing file.
    pub fn read_gcode(&self) -> Result<Option<String>, ArtifactError> {
        read_optional(&self.gcode_path())
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| ArtifactError::io("creating", &self.dir, e))?;

        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| ArtifactError::io("creating temporary file in", &self.dir, e))?;
        tmp.write_all(bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| ArtifactError::io("writing", tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| ArtifactError::io("replacing", path, e.error))?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "artifact written");
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, ArtifactError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ArtifactError::io("reading", path, e)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn fixed_file_names() {
        let store = ArtifactStore::new("/tmp/plots");
        assert_eq!(store.svg_path(), PathBuf::from("/tmp/plots/processed_image.svg"));
        assert_eq!(store.gcode_path(), PathBuf::from("/tmp/plots/processed_image.gcode"));
        assert_eq!(ArtifactStore::default().dir(), Path::new("assets/created"));
    }

    #[test]
    fn missing_artifacts_read_as_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.read_svg().unwrap().is_none());
        assert!(store.read_gcode().unwrap().is_none());
    }

    #[test]
    fn writes_replace_previous_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("nested/created"));
        store.write_gcode("G0 X1\n").unwrap();
        store.write_gcode("G0 X2\n").unwrap();
        assert_eq!(store.read_gcode().unwrap().as_deref(), Some("G0 X2\n"));

        // Only the two artifact names remain; no temporary files linger.
        store.write_svg("<svg/>").unwrap();
        let mut names: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![GCODE_FILE_NAME, SVG_FILE_NAME]);
    }
}
