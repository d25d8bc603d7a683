//! The measures payload sent to every client.
//!
//! The file is read once at startup, checked to be UTF-8 text and kept as
//! immutable [`Bytes`]. Cloning a [`Measures`] shares the same allocation.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::string::FromUtf8Error;

/// Immutable in-memory copy of the measures file.
#[derive(Debug, Clone)]
pub struct Measures {
    payload: Bytes,
}

impl Measures {
    /// Read the whole file at `path`. The file handle is closed before returning.
    ///
    /// An empty file is refused: a zero-length write never reaches the socket,
    /// so a session could not notice its peer leaving.
    pub fn load(path: &Path) -> Result<Self, MeasuresError> {
        let raw = std::fs::read(path).map_err(|e| MeasuresError::Read(path.to_path_buf(), e))?;
        let text =
            String::from_utf8(raw).map_err(|e| MeasuresError::Encoding(path.to_path_buf(), e))?;
        let measures = Self::from(text);
        if measures.is_empty() {
            return Err(MeasuresError::Empty(path.to_path_buf()));
        }
        Ok(measures)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl From<String> for Measures {
    fn from(text: String) -> Self {
        Self {
            payload: Bytes::from(text),
        }
    }
}

/// Measures loading errors
#[derive(Debug)]
pub enum MeasuresError {
    Read(PathBuf, std::io::Error),
    Encoding(PathBuf, FromUtf8Error),
    Empty(PathBuf),
}

impl std::fmt::Display for MeasuresError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeasuresError::Read(path, e) => {
                write!(f, "Failed to read measures file '{}': {}", path.display(), e)
            }
            MeasuresError::Encoding(path, e) => {
                write!(f, "Measures file '{}' is not UTF-8: {}", path.display(), e)
            }
            MeasuresError::Empty(path) => {
                write!(f, "Measures file '{}' is empty", path.display())
            }
        }
    }
}

impl std::error::Error for MeasuresError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Write `contents` to a fresh file under the system temp dir.
    fn temp_file(contents: &[u8]) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let name = format!(
            "measures-repeater-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load() {
        let path = temp_file(b"RANGE:120cm\n");
        let measures = Measures::load(&path).unwrap();
        assert_eq!(measures.as_bytes(), b"RANGE:120cm\n");
        assert_eq!(measures.len(), 12);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_rejects_empty_file() {
        let path = temp_file(b"");
        let err = Measures::load(&path).unwrap_err();
        assert!(matches!(err, MeasuresError::Empty(ref p) if *p == path));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let err = Measures::load(Path::new("/nonexistent/measures")).unwrap_err();
        match err {
            MeasuresError::Read(path, e) => {
                assert_eq!(path, PathBuf::from("/nonexistent/measures"));
                assert_eq!(e.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_non_utf8() {
        let path = temp_file(&[b'R', 0xff, 0xfe, b'\n']);
        let err = Measures::load(&path).unwrap_err();
        assert!(matches!(err, MeasuresError::Encoding(..)));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_clone_shares_payload() {
        let measures = Measures::from(String::from("theta: 12.5 dist: 830.25\n"));
        let copy = measures.clone();
        assert_eq!(measures.as_bytes().as_ptr(), copy.as_bytes().as_ptr());
    }
}
