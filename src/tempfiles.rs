use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Scratch files created while processing one request. Every registered path
/// is removed when the set drops, so cleanup runs on every exit path of the
/// handler, including errors and timeouts.
#[derive(Debug, Default)]
pub struct TempFileSet {
    paths: Vec<PathBuf>,
}

impl TempFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a path that must be deleted at the end of the request.
    pub fn register(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    /// Write `data` to a fresh scratch file and register it for cleanup.
    /// Returns the path and the byte count written.
    pub fn spool(&mut self, data: &[u8]) -> std::io::Result<(PathBuf, u64)> {
        let mut file = tempfile::Builder::new()
            .prefix("inkflow-upload-")
            .tempfile()?;
        file.write_all(data)?;
        let (_, path) = file
            .keep()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.register(path.clone());
        Ok((path, data.len() as u64))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Drop for TempFileSet {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed scratch file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch file")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spooled_files_removed_on_drop() {
        let mut set = TempFileSet::new();
        let (path, len) = set.spool(b"binary blob").unwrap();
        assert_eq!(len, 11);
        assert!(path.exists());
        assert_eq!(set.len(), 1);
        drop(set);
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_does_not_panic() {
        let mut set = TempFileSet::new();
        let (path, _) = set.spool(b"x").unwrap();
        fs::remove_file(&path).unwrap();
        drop(set);
    }
}
