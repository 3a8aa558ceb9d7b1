use crate::ingest::types::{StagedFile, UploadedFile};
use crate::pipeline::PipelineError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const SUPPORTED: [(&str, &str); 9] = [
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("pdf", "application/pdf"),
    ("csv", "text/csv"),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
];

pub fn max_upload_bytes() -> usize {
    std::env::var("MAX_UPLOAD_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES)
}

fn is_supported(mime: &str) -> bool {
    SUPPORTED.iter().any(|(_, m)| *m == mime)
}

/// Declared type wins when it is one we handle; generic or missing types fall back to the
/// file extension.
pub fn infer_mime(filename: &str, declared: Option<&str>) -> Option<String> {
    let declared = declared
        .map(|m| m.split(';').next().unwrap_or(m).trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty());
    if let Some(m) = declared.as_deref() {
        if is_supported(m) {
            return Some(m.to_string());
        }
    }

    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)?;
    SUPPORTED
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, m)| m.to_string())
}

/// Keeps only characters that are safe in a single path component.
fn sanitize(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Per-request staging directory. Removed by `close` or, failing that, on drop.
#[derive(Debug)]
pub struct ScratchDir {
    dir: tempfile::TempDir,
}

impl ScratchDir {
    pub fn create(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("failed to create scratch root {}", root.display()))?;
        let dir = tempfile::Builder::new()
            .prefix("journal-upload-")
            .tempdir_in(root)
            .with_context(|| format!("failed to create scratch dir in {}", root.display()))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Validates size and type, then writes the bytes under the scratch dir.
    pub async fn stage(
        &self,
        index: usize,
        file: &UploadedFile,
        max_bytes: usize,
    ) -> Result<StagedFile> {
        let size = file.bytes.len();
        if size > max_bytes {
            return Err(PipelineError::FileTooLarge {
                filename: file.filename.clone(),
                size,
                limit: max_bytes,
            }
            .into());
        }

        let Some(mime_type) = infer_mime(&file.filename, file.declared_mime.as_deref()) else {
            return Err(PipelineError::UnsupportedFile {
                filename: file.filename.clone(),
                mime: file
                    .declared_mime
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            }
            .into());
        };

        let path: PathBuf = self
            .dir
            .path()
            .join(format!("{index:02}-{}", sanitize(&file.filename)));
        tokio::fs::write(&path, &file.bytes)
            .await
            .with_context(|| format!("failed to stage {}", file.filename))?;

        Ok(StagedFile {
            filename: file.filename.clone(),
            mime_type,
            path,
            size,
        })
    }

    pub async fn stage_all(
        &self,
        files: &[UploadedFile],
        max_bytes: usize,
    ) -> Result<Vec<StagedFile>> {
        let mut staged = Vec::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            staged.push(self.stage(i, file, max_bytes).await?);
        }
        Ok(staged)
    }

    /// Best-effort removal; callers log the error rather than fail the request.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("failed to remove scratch dir {}", path.display()))
    }
}
