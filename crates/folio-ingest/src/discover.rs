//! Resolving the command-line input into the list of PDFs to process.

use std::path::{Path, PathBuf};

use crate::IngestError;

/// Whether `path` has a `.pdf` extension (any case).
pub fn is_pdf_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// PDFs named by `input`.
///
/// A file is returned as-is whatever its extension, so an explicitly named
/// non-PDF still gets a record (as unreadable) instead of vanishing. A
/// directory yields its `*.pdf` files in path order, descending into
/// subdirectories when `recursive` is set. Hidden entries are skipped.
pub fn discover(input: &Path, recursive: bool) -> Result<Vec<PathBuf>, IngestError> {
    let meta = std::fs::metadata(input).map_err(|source| IngestError::Io {
        path: input.to_path_buf(),
        source,
    })?;

    if meta.is_file() {
        if !is_pdf_path(input) {
            tracing::warn!(path = %input.display(), "input does not have a .pdf extension");
        }
        return Ok(vec![input.to_path_buf()]);
    }
    if !meta.is_dir() {
        return Err(IngestError::UnsupportedInput(input.to_path_buf()));
    }

    let mut found = Vec::new();
    walk(input, recursive, &mut found)?;
    found.sort();
    tracing::debug!(dir = %input.display(), count = found.len(), "discovered PDFs");
    Ok(found)
}

fn walk(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<(), IngestError> {
    let io_err = |source| IngestError::Io {
        path: dir.to_path_buf(),
        source,
    };
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        if is_hidden(&path) {
            continue;
        }
        let file_type = entry.file_type().map_err(io_err)?;
        if file_type.is_dir() {
            if recursive {
                walk(&path, recursive, out)?;
            }
        } else if is_pdf_path(&path) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"%PDF-1.4").unwrap();
    }

    #[test]
    fn pdf_extension_is_case_insensitive() {
        assert!(is_pdf_path(Path::new("a/B.PDF")));
        assert!(is_pdf_path(Path::new("report.pdf")));
        assert!(!is_pdf_path(Path::new("report.pdf.txt")));
        assert!(!is_pdf_path(Path::new("README")));
    }

    #[test]
    fn directory_lists_pdfs_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.pdf"));
        touch(&dir.path().join("a.PDF"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join(".hidden.pdf"));
        touch(&dir.path().join("sub").join("c.pdf"));

        let found = discover(dir.path(), false).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf"]);
    }

    #[test]
    fn recursive_descends_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.pdf"));
        touch(&dir.path().join("sub").join("deeper").join("c.pdf"));
        touch(&dir.path().join(".git").join("x.pdf"));

        let found = discover(dir.path(), true).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|p| p.ends_with("sub/deeper/c.pdf")));
    }

    #[test]
    fn single_file_is_returned_even_without_pdf_extension() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.bin");
        touch(&file);
        assert_eq!(discover(&file, false).unwrap(), vec![file]);
    }

    #[test]
    fn missing_input_is_an_error() {
        let err = discover(Path::new("/nonexistent/folio-input"), false).unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
    }

    #[test]
    fn empty_directory_is_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(dir.path(), true).unwrap().is_empty());
    }
}
