//! Input validation: make sure the path names a readable PDF before pdfium
//! sees it.
//!
//! Checking the `%PDF` magic up front turns "wrong file" into a clear error
//! instead of an opaque pdfium failure halfway through a run.

use crate::error::OcrSuiteError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate `path` and return it unchanged.
pub fn resolve_input(path: &Path) -> Result<PathBuf, OcrSuiteError> {
    let path = path.to_path_buf();

    if !path.is_file() {
        return Err(OcrSuiteError::FileNotFound { path });
    }

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(OcrSuiteError::PermissionDenied { path });
        }
        Err(_) => return Err(OcrSuiteError::FileNotFound { path }),
    };

    let mut magic = [0u8; 4];
    let mut read = 0;
    while read < magic.len() {
        match file.read(&mut magic[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) => {
                return Err(OcrSuiteError::CorruptPdf {
                    path,
                    detail: e.to_string(),
                })
            }
        }
    }
    if &magic != b"%PDF" {
        return Err(OcrSuiteError::NotAPdf { path, magic });
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

/// Source file stem used to name every output (`report` for `report.pdf`).
pub fn source_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_pdf_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.7\n...").unwrap();
        assert_eq!(resolve_input(&path).unwrap(), path);
    }

    #[test]
    fn missing_file() {
        let err = resolve_input(Path::new("/no/such/file.pdf")).unwrap_err();
        assert!(matches!(err, OcrSuiteError::FileNotFound { .. }));
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_input(dir.path()).unwrap_err();
        assert!(matches!(err, OcrSuiteError::FileNotFound { .. }));
    }

    #[test]
    fn rejects_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"PK\x03\x04zip").unwrap();
        match resolve_input(&path).unwrap_err() {
            OcrSuiteError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.pdf");
        std::fs::write(&path, b"%P").unwrap();
        assert!(matches!(
            resolve_input(&path).unwrap_err(),
            OcrSuiteError::NotAPdf { .. }
        ));
    }

    #[test]
    fn stem_of_source() {
        assert_eq!(source_stem(Path::new("/in/report.final.pdf")), "report.final");
        assert_eq!(source_stem(Path::new("/")), "document");
    }
}
