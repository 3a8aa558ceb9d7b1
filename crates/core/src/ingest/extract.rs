use crate::domain::contract::truncate_chars;
use crate::ingest::types::StagedFile;
use anyhow::{Context, Result};

/// Ceiling applied to every text fallback so a single document cannot swamp the prompt.
pub const TEXT_CEILING_CHARS: usize = 50_000;

pub fn is_text_mime(mime: &str) -> bool {
    mime.starts_with("text/")
}

/// Plain text for a staged PDF or text file, truncated to [`TEXT_CEILING_CHARS`].
pub async fn extract_text(file: &StagedFile) -> Result<String> {
    let bytes = tokio::fs::read(&file.path)
        .await
        .with_context(|| format!("failed to read staged {}", file.filename))?;

    let text = if file.mime_type == "application/pdf" {
        let filename = file.filename.clone();
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .context("pdf extraction task panicked")?
            .with_context(|| format!("failed to extract text from {filename}"))?
    } else if is_text_mime(&file.mime_type) {
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        anyhow::bail!(
            "no text extraction for {} ({})",
            file.filename,
            file.mime_type
        );
    };

    let text = text.trim();
    anyhow::ensure!(!text.is_empty(), "{} contains no text", file.filename);
    Ok(truncate_chars(text, TEXT_CEILING_CHARS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn staged(dir: &Path, name: &str, mime: &str, bytes: &[u8]) -> StagedFile {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        StagedFile {
            filename: name.to_string(),
            mime_type: mime.to_string(),
            path,
            size: bytes.len(),
        }
    }

    #[tokio::test]
    async fn reads_csv_and_truncates_to_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let small = staged(dir.path(), "levels.csv", "text/csv", b"price,label\n5000,pivot\n");
        assert_eq!(extract_text(&small).await.unwrap(), "price,label\n5000,pivot");

        let long = "x".repeat(TEXT_CEILING_CHARS + 10);
        let big = staged(dir.path(), "big.txt", "text/plain", long.as_bytes());
        assert_eq!(
            extract_text(&big).await.unwrap().chars().count(),
            TEXT_CEILING_CHARS
        );
    }

    #[tokio::test]
    async fn invalid_utf8_is_read_lossily() {
        let dir = tempfile::tempdir().unwrap();
        let f = staged(dir.path(), "odd.txt", "text/plain", &[b'o', b'k', 0xff]);
        assert_eq!(extract_text(&f).await.unwrap(), "ok\u{fffd}");
    }

    #[tokio::test]
    async fn images_and_empty_files_have_no_text() {
        let dir = tempfile::tempdir().unwrap();
        let img = staged(dir.path(), "a.png", "image/png", &[0x89, b'P', b'N', b'G']);
        assert!(extract_text(&img).await.is_err());

        let empty = staged(dir.path(), "e.txt", "text/plain", b"  \n");
        assert!(extract_text(&empty).await.is_err());
    }

    #[tokio::test]
    async fn garbage_pdf_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let f = staged(dir.path(), "bad.pdf", "application/pdf", b"not a pdf");
        assert!(extract_text(&f).await.is_err());
    }
}
