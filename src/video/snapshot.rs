//! Snapshot files: a timestamped copy plus a fixed `snapshot.jpg`

use std::path::{Path, PathBuf};

use crate::error::VideoError;

const LATEST_FILE: &str = "snapshot.jpg";

pub struct SnapshotWriter {
    directory: PathBuf,
}

impl SnapshotWriter {
    /// Create the writer, making the directory if needed
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, VideoError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .map_err(|e| VideoError::Snapshot(format!("{}: {}", directory.display(), e)))?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Write `jpeg` to both files and return their paths
    pub fn write(&self, jpeg: &[u8]) -> Result<[PathBuf; 2], VideoError> {
        let stamped = format!("{}.jpg", chrono::Local::now().format("%Y%m%d-%H%M%S"));
        let paths = [self.directory.join(stamped), self.directory.join(LATEST_FILE)];
        for path in &paths {
            std::fs::write(path, jpeg)
                .map_err(|e| VideoError::Snapshot(format!("{}: {}", path.display(), e)))?;
            tracing::info!("Snapshot saved: {}", path.display());
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_both_files() {
        let dir = std::env::temp_dir().join(format!("dronelink-snap-{}", std::process::id()));
        let writer = SnapshotWriter::new(&dir).unwrap();
        let [stamped, latest] = writer.write(b"\xff\xd8jpeg").unwrap();

        assert_eq!(std::fs::read(&latest).unwrap(), b"\xff\xd8jpeg");
        assert_eq!(std::fs::read(&stamped).unwrap(), b"\xff\xd8jpeg");
        assert!(latest.ends_with("snapshot.jpg"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
