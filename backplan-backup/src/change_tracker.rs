//! File change detection
//!
//! Decides whether a source file needs copying into a new snapshot by
//! comparing modification times against the previous snapshot. Content is
//! never hashed, so an edit that does not advance the mtime goes unnoticed.

use chrono::{DateTime, Utc};
use std::io;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn new() -> Self {
        Self
    }

    /// Whether `source_file` must be copied, given the folder of the
    /// previous snapshot (if there is one).
    pub async fn should_copy(
        &self,
        source_file: &Path,
        previous_snapshot: Option<&Path>,
    ) -> Result<bool> {
        let Some(previous_snapshot) = previous_snapshot else {
            return Ok(true);
        };
        let Some(file_name) = source_file.file_name() else {
            return Ok(true);
        };

        let source_mtime = modified_utc(source_file).await?;
        let previous_file = previous_snapshot.join(file_name);

        let previous_mtime = match modified_utc(&previous_file).await {
            Ok(mtime) => Some(mtime),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(
                    "Cannot read previous copy {}, copying again: {}",
                    previous_file.display(),
                    e
                );
                None
            }
        };

        let copy = is_newer(source_mtime, previous_mtime);
        debug!(
            "{}: source {} vs previous {:?} -> {}",
            source_file.display(),
            source_mtime,
            previous_mtime,
            if copy { "copy" } else { "unchanged" }
        );
        Ok(copy)
    }
}

/// The copy rule on its own: copy unless a previous copy exists whose mtime
/// is at least the source's.
pub fn is_newer(source: DateTime<Utc>, previous: Option<DateTime<Utc>>) -> bool {
    match previous {
        Some(previous) => source > previous,
        None => true,
    }
}

async fn modified_utc(path: &Path) -> io::Result<DateTime<Utc>> {
    let metadata = fs::metadata(path).await?;
    Ok(DateTime::<Utc>::from(metadata.modified()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use filetime::{set_file_mtime, FileTime};
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct TestEnv {
        source: TempDir,
        previous: TempDir,
    }

    impl TestEnv {
        fn new() -> Self {
            Self {
                source: TempDir::new().unwrap(),
                previous: TempDir::new().unwrap(),
            }
        }

        fn source_file(&self, name: &str, mtime_secs: i64) -> PathBuf {
            write_with_mtime(&self.source.path().join(name), mtime_secs)
        }

        fn previous_file(&self, name: &str, mtime_secs: i64) -> PathBuf {
            write_with_mtime(&self.previous.path().join(name), mtime_secs)
        }
    }

    fn write_with_mtime(path: &Path, mtime_secs: i64) -> PathBuf {
        std::fs::write(path, b"content").unwrap();
        set_file_mtime(path, FileTime::from_unix_time(mtime_secs, 0)).unwrap();
        path.to_path_buf()
    }

    #[tokio::test]
    async fn test_no_previous_snapshot_always_copies() {
        let env = TestEnv::new();
        let detector = ChangeDetector::new();
        for (i, name) in ["a.txt", "b.bin", "c"].iter().enumerate() {
            let file = env.source_file(name, 1_000 + i as i64);
            assert!(detector.should_copy(&file, None).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_missing_in_previous_snapshot_copies() {
        let env = TestEnv::new();
        let file = env.source_file("new.txt", 1_700_000_000);
        env.previous_file("other.txt", 1_800_000_000);

        let copy = ChangeDetector::new()
            .should_copy(&file, Some(env.previous.path()))
            .await
            .unwrap();
        assert!(copy);
    }

    #[tokio::test]
    async fn test_mtime_comparison() {
        let env = TestEnv::new();
        let detector = ChangeDetector::new();
        env.previous_file("doc.txt", 1_700_000_000);

        let older = env.source_file("doc.txt", 1_699_999_999);
        assert!(!detector.should_copy(&older, Some(env.previous.path())).await.unwrap());

        let equal = env.source_file("doc.txt", 1_700_000_000);
        assert!(!detector.should_copy(&equal, Some(env.previous.path())).await.unwrap());

        let newer = env.source_file("doc.txt", 1_700_000_001);
        assert!(detector.should_copy(&newer, Some(env.previous.path())).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_source_is_an_error() {
        let env = TestEnv::new();
        let ghost = env.source.path().join("ghost.txt");
        let result = ChangeDetector::new()
            .should_copy(&ghost, Some(env.previous.path()))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_is_newer() {
        let t = Utc::now();
        assert!(is_newer(t, None));
        assert!(is_newer(t, Some(t - Duration::seconds(1))));
        assert!(!is_newer(t, Some(t)));
        assert!(!is_newer(t, Some(t + Duration::seconds(1))));
    }
}
