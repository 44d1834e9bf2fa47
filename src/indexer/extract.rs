//! Turning raw file bytes into indexable text

use crate::error::IndexingError;

/// Byte-order mark some editors prepend to UTF-8 files
const UTF8_BOM: &str = "\u{feff}";

/// Whether the path names a PDF document
pub fn is_pdf(relative_path: &str) -> bool {
    relative_path
        .rsplit('.')
        .next()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        && relative_path.contains('.')
}

/// Extract the text of a file
///
/// PDFs go through `pdf-extract`; everything else must be valid UTF-8.
pub fn extract_text(relative_path: &str, bytes: &[u8]) -> Result<String, IndexingError> {
    if is_pdf(relative_path) {
        return extract_pdf(relative_path, bytes);
    }

    let text = std::str::from_utf8(bytes).map_err(|e| {
        IndexingError::InvalidUtf8(format!(
            "{} (invalid byte at offset {})",
            relative_path,
            e.valid_up_to()
        ))
    })?;

    Ok(text.strip_prefix(UTF8_BOM).unwrap_or(text).to_string())
}

fn extract_pdf(relative_path: &str, bytes: &[u8]) -> Result<String, IndexingError> {
    let raw = pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
        IndexingError::ExtractionFailed {
            file: relative_path.to_string(),
            reason: e.to_string(),
        }
    })?;

    Ok(normalize_extracted(&raw))
}

/// Tidy text pulled out of a PDF
///
/// Trims trailing spaces, drops form feeds and folds runs of blank lines into
/// a single paragraph break so the chunker sees clean paragraph boundaries.
fn normalize_extracted(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0usize;

    for line in raw.lines() {
        let line = line.replace('\u{c}', "");
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            continue;
        }

        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        blank_run = 0;
        out.push_str(line);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pdf() {
        assert!(is_pdf("reports/q1.pdf"));
        assert!(is_pdf("SCAN.PDF"));
        assert!(!is_pdf("notes.txt"));
        assert!(!is_pdf("pdf"));
    }

    #[test]
    fn test_extract_plain_text() {
        let text = extract_text("a.txt", "Vacation policy".as_bytes()).unwrap();
        assert_eq!(text, "Vacation policy");
    }

    #[test]
    fn test_extract_strips_bom() {
        let bytes = "\u{feff}hello".as_bytes();
        assert_eq!(extract_text("a.txt", bytes).unwrap(), "hello");
    }

    #[test]
    fn test_invalid_utf8_is_error() {
        let err = extract_text("bad.txt", &[0x66, 0x6f, 0xff, 0xfe]).unwrap_err();
        match err {
            IndexingError::InvalidUtf8(msg) => {
                assert!(msg.contains("bad.txt"));
                assert!(msg.contains("offset 2"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_garbage_pdf_is_extraction_error() {
        let err = extract_text("broken.pdf", b"not a pdf at all").unwrap_err();
        assert!(matches!(err, IndexingError::ExtractionFailed { .. }));
    }

    #[test]
    fn test_normalize_extracted() {
        let raw = "Title  \n\n\n\nFirst line\nSecond line\u{c}\n \nEnd";
        assert_eq!(
            normalize_extracted(raw),
            "Title\n\nFirst line\nSecond line\n\nEnd"
        );
    }
}
