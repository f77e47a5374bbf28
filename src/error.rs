use std::io;

use thiserror::Error;

/// Failure to obtain a request from an accepted connection.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("empty request")]
    Empty,
    #[error("missing HTTP version in request line")]
    MissingVersion,
    #[error("failed to read request: {0}")]
    Io(#[from] io::Error),
}

/// Reasons a POST body does not yield a usable file part.
///
/// The `Display` text is shown to the browser on the error page.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("need multipart/form-data request")]
    NotMultipart,
    #[error("missing multipart boundary")]
    MissingBoundary,
    #[error("multipart boundary not found in body")]
    BoundaryNotFound,
    #[error("malformed multipart part headers")]
    MissingHeaderSeparator,
    #[error("no file name in upload")]
    MissingFilename,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file too small or incomplete ({size} bytes)")]
    TooSmall { size: usize },
    #[error("file too large ({size} bytes, limit {limit} bytes)")]
    TooLarge { size: usize, limit: usize },
    #[error("unsupported file type: {mime}")]
    UnsupportedType { mime: String },
    #[error("failed to store upload: {0}")]
    Io(#[from] io::Error),
}
