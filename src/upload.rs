//! Validation and storage of an extracted upload, and the hand-off to the
//! host's import pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::UploadError;
use crate::helpers::traits::http_request::MultipartPart;
use crate::ServerConfig;

pub const AUDIO_MIME_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/mpeg3",
    "audio/x-mpeg-3",
    "audio/wav",
    "audio/wave",
    "audio/x-wav",
    "audio/vnd.wave",
    "audio/aac",
    "audio/x-aac",
    "audio/aacp",
    "audio/mp4",
    "audio/m4a",
    "audio/x-m4a",
    "audio/flac",
    "audio/x-flac",
    "audio/ogg",
    "audio/vorbis",
    "application/ogg",
];

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "aac", "m4a", "flac", "ogg"];

const UNSAFE_FILENAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// A stored upload as handed to the [`UploadHandler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: usize,
    pub mime_type: String,
}

/// Receives every accepted upload exactly once.
///
/// Calls may arrive concurrently from different connections.
#[async_trait]
pub trait UploadHandler: Send + Sync {
    async fn on_upload(&self, file: &UploadedFile);
}

#[async_trait]
impl<F> UploadHandler for F
where
    F: Fn(&UploadedFile) + Send + Sync,
{
    async fn on_upload(&self, file: &UploadedFile) {
        self(file)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub success: bool,
    pub temp_file_path: Option<PathBuf>,
    pub filename: String,
    pub size_bytes: usize,
    pub mime_type: String,
    pub message: String,
}

impl UploadResult {
    fn stored(file: &UploadedFile) -> Self {
        Self {
            success: true,
            temp_file_path: Some(file.path.clone()),
            filename: file.filename.clone(),
            size_bytes: file.size_bytes,
            mime_type: file.mime_type.clone(),
            message: "upload complete".into(),
        }
    }

    fn failed(part: &MultipartPart, mime_type: String, error: &UploadError) -> Self {
        Self {
            success: false,
            temp_file_path: None,
            filename: part.filename.clone(),
            size_bytes: part.payload.len(),
            mime_type,
            message: error.to_string(),
        }
    }
}

pub struct UploadSink {
    config: Arc<ServerConfig>,
    handler: Arc<dyn UploadHandler>,
}

impl UploadSink {
    pub fn new(config: Arc<ServerConfig>, handler: Arc<dyn UploadHandler>) -> Self {
        Self { config, handler }
    }

    /// Validates and stores `part`, then notifies the handler.
    ///
    /// Same-named uploads share one path in the upload directory; the last
    /// write wins.
    pub async fn accept(&self, part: MultipartPart) -> UploadResult {
        let mime_type = effective_mime_type(&part.declared_content_type, &part.filename);

        match self.store(&part, &mime_type).await {
            Ok(file) => {
                tracing::info!(
                    path = %file.path.display(),
                    size = file.size_bytes,
                    mime = %file.mime_type,
                    "upload stored"
                );
                self.handler.on_upload(&file).await;
                UploadResult::stored(&file)
            }
            Err(e) => {
                tracing::warn!(filename = %part.filename, error = %e, "upload rejected");
                UploadResult::failed(&part, mime_type, &e)
            }
        }
    }

    async fn store(
        &self,
        part: &MultipartPart,
        mime_type: &str,
    ) -> Result<UploadedFile, UploadError> {
        let size = part.payload.len();
        if size < self.config.min_upload_size {
            return Err(UploadError::TooSmall { size });
        }
        if size > self.config.max_upload_size {
            return Err(UploadError::TooLarge {
                size,
                limit: self.config.max_upload_size,
            });
        }
        if !is_audio_mime_type(mime_type) {
            if !has_audio_extension(&part.filename) {
                return Err(UploadError::UnsupportedType {
                    mime: mime_type.to_string(),
                });
            }
            tracing::debug!(
                mime = %mime_type,
                filename = %part.filename,
                "accepting by file extension"
            );
        }

        match audio_signature(&part.payload) {
            Some(format) => tracing::debug!(format, "audio signature recognised"),
            None => tracing::warn!(filename = %part.filename, "payload does not look like audio"),
        }

        let filename = sanitize_filename(&part.filename, self.config.max_filename_length);
        let path = self.config.upload_dir.join(&filename);
        if let Err(e) = write_upload(&self.config.upload_dir, &path, &part.payload).await {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                if let Err(remove_error) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(
                        path = %path.display(),
                        error = %remove_error,
                        "failed to remove partial upload"
                    );
                }
            }
            return Err(e.into());
        }

        Ok(UploadedFile {
            path,
            filename,
            size_bytes: size,
            mime_type: mime_type.to_string(),
        })
    }
}

async fn write_upload(dir: &Path, path: &Path, payload: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, payload).await
}

/// The declared part type, or a guess from the file extension when the
/// browser sent none or a generic one.
pub fn effective_mime_type(declared: &str, filename: &str) -> String {
    let declared = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if !declared.is_empty() && declared != "application/octet-stream" {
        return declared;
    }
    mime_guess::from_path(filename)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

pub fn is_audio_mime_type(mime: &str) -> bool {
    AUDIO_MIME_TYPES.iter().any(|allowed| mime.eq_ignore_ascii_case(allowed))
}

pub fn has_audio_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Replaces path and shell-unsafe characters with `_` and caps the length at
/// `max_len` characters, keeping the extension.
pub fn sanitize_filename(name: &str, max_len: usize) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if UNSAFE_FILENAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let cleaned = if cleaned.chars().all(|c| c == '.') {
        "upload".to_string()
    } else {
        cleaned
    };

    if cleaned.chars().count() <= max_len {
        return cleaned;
    }

    match cleaned.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.chars().count() < max_len => {
            let keep = max_len - ext.chars().count() - 1;
            let stem: String = stem.chars().take(keep).collect();
            format!("{}.{}", stem, ext)
        }
        _ => cleaned.chars().take(max_len).collect(),
    }
}

/// Coarse container/codec sniffing, used for logging only.
pub fn audio_signature(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [b'I', b'D', b'3', ..] => Some("id3"),
        [0xFF, second, ..] if second & 0xE0 == 0xE0 => Some("mpeg"),
        [b'f', b'L', b'a', b'C', ..] => Some("flac"),
        [b'O', b'g', b'g', b'S', ..] => Some("ogg"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Some("wav"),
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some("mp4"),
        _ => None,
    }
}
