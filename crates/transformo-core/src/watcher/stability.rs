use std::path::Path;
use std::time::Duration;

use crate::fsutil;

/// Result of watching a file's size for a while.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Stable { len: u64 },
    /// The size changed between samples
    Unstable,
    /// The file disappeared or could not be read
    Vanished,
}

/// Decides when a newly-appeared file has finished being written.
///
/// The size is sampled `checks` times, `interval` apart, and compared against
/// the size seen when the check started. Any difference means the writer is
/// still going.
#[derive(Debug, Clone, Copy)]
pub struct StabilityGate {
    checks: u32,
    interval: Duration,
}

impl StabilityGate {
    pub fn new(checks: u32, interval: Duration) -> Self {
        Self { checks, interval }
    }

    pub async fn wait(&self, path: &Path) -> Stability {
        let Ok(initial) = fsutil::file_len(path) else {
            return Stability::Vanished;
        };

        for sample in 0..self.checks {
            tokio::time::sleep(self.interval).await;
            match fsutil::file_len(path) {
                Ok(len) if len == initial => {}
                Ok(len) => {
                    tracing::debug!(
                        path = %path.display(),
                        sample,
                        initial,
                        len,
                        "File size changed"
                    );
                    return Stability::Unstable;
                }
                Err(_) => return Stability::Vanished,
            }
        }

        Stability::Stable { len: initial }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn gate() -> StabilityGate {
        StabilityGate::new(3, Duration::from_millis(30))
    }

    #[tokio::test]
    async fn test_untouched_file_is_stable() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("a.pdf");
        std::fs::write(&path, b"12345").unwrap();

        assert_eq!(gate().wait(&path).await, Stability::Stable { len: 5 });
    }

    #[tokio::test]
    async fn test_growing_file_is_unstable() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("a.pdf");
        std::fs::write(&path, b"start").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..6 {
                tokio::time::sleep(Duration::from_millis(15)).await;
                let mut file = std::fs::OpenOptions::new()
                    .append(true)
                    .open(&writer_path)
                    .unwrap();
                file.write_all(b"more").unwrap();
            }
        });

        assert_eq!(gate().wait(&path).await, Stability::Unstable);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_vanished() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert_eq!(
            gate().wait(&temp_dir.path().join("gone.pdf")).await,
            Stability::Vanished
        );
    }

    #[tokio::test]
    async fn test_deleted_during_check_vanished() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("a.pdf");
        std::fs::write(&path, b"x").unwrap();

        let remove_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            std::fs::remove_file(remove_path).unwrap();
        });

        assert_eq!(gate().wait(&path).await, Stability::Vanished);
    }

    #[tokio::test]
    async fn test_zero_checks_is_immediate() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("a.pdf");
        std::fs::write(&path, b"").unwrap();

        let gate = StabilityGate::new(0, Duration::from_secs(60));
        assert_eq!(gate.wait(&path).await, Stability::Stable { len: 0 });
    }
}
