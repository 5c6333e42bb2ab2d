//! Client-side limits on outbound payloads.

/// Maximum text message length, in characters.
pub const MAX_TEXT_CHARS: usize = 10_000;
/// Maximum audio chunk size.
pub const MAX_AUDIO_BYTES: usize = 1024 * 1024;
/// Maximum file upload size.
pub const MAX_BLOB_BYTES: usize = 10 * 1024 * 1024;
/// MIME prefixes accepted for file uploads.
pub const ALLOWED_MIME_PREFIXES: &[&str] = &["image/", "text/", "application/pdf", "application/json"];

/// An outbound payload rejected before it reached the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("text message is empty")]
    EmptyText,
    #[error("text message has {0} characters, limit is {limit}", limit = MAX_TEXT_CHARS)]
    TextTooLong(usize),
    #[error("audio chunk is empty")]
    EmptyAudio,
    #[error("audio chunk is {0} bytes, limit is {limit}", limit = MAX_AUDIO_BYTES)]
    AudioTooLarge(usize),
    #[error("video frame is empty")]
    EmptyVideoFrame,
    #[error("file is {0} bytes, limit is {limit}", limit = MAX_BLOB_BYTES)]
    BlobTooLarge(usize),
    #[error("unsupported file type: {0}")]
    UnsupportedMime(String),
}

/// Validate a text message, returning the trimmed text to send.
pub fn text(text: &str) -> Result<&str, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    let len = text.chars().count();
    if len > MAX_TEXT_CHARS {
        return Err(ValidationError::TextTooLong(len));
    }
    Ok(trimmed)
}

pub fn audio(bytes: &[u8]) -> Result<(), ValidationError> {
    match bytes.len() {
        0 => Err(ValidationError::EmptyAudio),
        n if n > MAX_AUDIO_BYTES => Err(ValidationError::AudioTooLarge(n)),
        _ => Ok(()),
    }
}

pub fn video(frame: &str) -> Result<(), ValidationError> {
    if frame.is_empty() {
        return Err(ValidationError::EmptyVideoFrame);
    }
    Ok(())
}

pub fn blob(bytes: &[u8], mime: &str) -> Result<(), ValidationError> {
    if bytes.len() > MAX_BLOB_BYTES {
        return Err(ValidationError::BlobTooLarge(bytes.len()));
    }
    if !ALLOWED_MIME_PREFIXES.iter().any(|p| mime.starts_with(p)) {
        return Err(ValidationError::UnsupportedMime(mime.to_string()));
    }
    Ok(())
}
