//! Persistence of the resume offset across restarts.

use std::path::PathBuf;

use tracing::warn;

/// ASCII offset stored at a configured lock path; written atomically
/// via a temp file and rename.
pub struct SkipFile {
    path: PathBuf,
}

impl SkipFile {
    pub fn new(path: PathBuf) -> Self {
        SkipFile { path }
    }

    /// Load the persisted offset; absent or malformed files read as 0.
    pub fn load(&self) -> u64 {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => text.trim().parse().unwrap_or(0),
            Err(_) => 0,
        }
    }

    pub fn store(&self, offset: u64) {
        let tmp = self.path.with_extension("tmp");
        let result = std::fs::write(&tmp, offset.to_string())
            .and_then(|()| std::fs::rename(&tmp, &self.path));
        if let Err(err) = result {
            warn!(path = %self.path.display(), %err, "failed to persist skip offset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let skip = SkipFile::new(dir.path().join("input.lock"));

        assert_eq!(skip.load(), 0);
        skip.store(188 * 1234);
        assert_eq!(skip.load(), 188 * 1234);
        skip.store(0);
        assert_eq!(skip.load(), 0);
    }

    #[test]
    fn test_malformed_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.lock");
        std::fs::write(&path, "not a number").unwrap();
        assert_eq!(SkipFile::new(path).load(), 0);
    }
}
