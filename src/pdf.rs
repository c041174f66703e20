use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use thiserror::Error;

/// Inline transfers above this size always go through the download path.
pub const MAX_INLINE_BYTES: u64 = 1024 * 1024;

/// Base64 inputs longer than this are decoded chunk-wise to stay clear of
/// allocator spikes on large documents.
const CHUNK_DECODE_THRESHOLD: usize = 1_000_000;
const DECODE_CHUNK_CHARS: usize = 100 * 1024;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("document is too large for inline transfer ({0} bytes)")]
    TooLarge(u64),
    #[error("payload is not valid base64")]
    InvalidBase64,
    #[error("decoded bytes are not a PDF document")]
    NotAPdf,
    #[error("{0}")]
    Backend(String),
}

/// A verified PDF ready to hand to the viewer. The viewer takes sole
/// ownership of the bytes once opened.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    pub id: String,
    pub title: String,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mimetype: String,
}

/// JSON payload of `GET /documents/{id}/view`.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewPayload {
    pub base64: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    pub filename: Option<String>,
    pub mimetype: Option<String>,
    #[serde(default)]
    pub use_download: bool,
    pub error: Option<String>,
}

fn is_valid_base64(input: &str) -> bool {
    if input.is_empty() || input.len() % 4 != 0 {
        return false;
    }
    let bytes = input.as_bytes();
    let padding = bytes.iter().rev().take_while(|&&b| b == b'=').count();
    if padding > 2 {
        return false;
    }
    bytes[..bytes.len() - padding]
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

fn decode_base64(input: &str) -> Result<Vec<u8>, PdfError> {
    if !is_valid_base64(input) {
        return Err(PdfError::InvalidBase64);
    }
    if input.len() <= CHUNK_DECODE_THRESHOLD {
        return STANDARD.decode(input).map_err(|_| PdfError::InvalidBase64);
    }

    // Chunk boundaries stay on 4-char groups, so each slice decodes
    // independently and padding only ever appears in the final chunk.
    let mut bytes = Vec::with_capacity(input.len() / 4 * 3);
    let raw = input.as_bytes();
    for chunk in raw.chunks(DECODE_CHUNK_CHARS) {
        let decoded = STANDARD.decode(chunk).map_err(|_| PdfError::InvalidBase64)?;
        bytes.extend_from_slice(&decoded);
    }
    Ok(bytes)
}

fn verify_magic(bytes: &[u8]) -> Result<(), PdfError> {
    if bytes.len() < PDF_MAGIC.len() || &bytes[..PDF_MAGIC.len()] != PDF_MAGIC {
        return Err(PdfError::NotAPdf);
    }
    Ok(())
}

/// Inline (base64) path: build a verified document from the view payload.
pub fn assemble_inline(
    doc_id: &str,
    title: &str,
    payload: ViewPayload,
) -> Result<PdfDocument, PdfError> {
    if let Some(error) = payload.error {
        return Err(PdfError::Backend(error));
    }
    if payload.use_download {
        return Err(PdfError::TooLarge(payload.file_size));
    }
    // Client-enforced ceiling, independent of the server's own signal.
    if payload.file_size > MAX_INLINE_BYTES {
        return Err(PdfError::TooLarge(payload.file_size));
    }
    let encoded = payload
        .base64
        .ok_or_else(|| PdfError::Backend("response carried no inline payload".to_string()))?;

    let bytes = decode_base64(&encoded)?;
    verify_magic(&bytes)?;

    Ok(PdfDocument {
        id: doc_id.to_string(),
        title: title.to_string(),
        filename: payload
            .filename
            .unwrap_or_else(|| format!("{}.pdf", title)),
        bytes,
        mimetype: payload
            .mimetype
            .unwrap_or_else(|| "application/pdf".to_string()),
    })
}

/// Download (binary) fallback: same magic verification over raw bytes.
pub fn assemble_download(
    doc_id: &str,
    title: &str,
    filename: Option<String>,
    bytes: Vec<u8>,
) -> Result<PdfDocument, PdfError> {
    verify_magic(&bytes)?;
    Ok(PdfDocument {
        id: doc_id.to_string(),
        title: title.to_string(),
        filename: filename.unwrap_or_else(|| format!("{}.pdf", title)),
        bytes,
        mimetype: "application/pdf".to_string(),
    })
}
