use std::path::PathBuf;

/// A file as received from the caller, before staging.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub declared_mime: Option<String>,
    pub bytes: Vec<u8>,
}

/// A file written to the scratch directory with its resolved MIME type.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub filename: String,
    pub mime_type: String,
    pub path: PathBuf,
    pub size: usize,
}

impl StagedFile {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}
