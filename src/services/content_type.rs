use serde::{Deserialize, Serialize};

/// Number of leading bytes inspected when detecting a content type
pub const SNIFF_LEN: usize = 512;

/// How finalization reconciles the declared content type with the detected one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentTypePolicy {
    /// Keep the declared type and only log a mismatch
    #[default]
    TrustClient,
    /// Replace the declared type with the detected one
    PreferDetected,
    /// Fail finalization when the types disagree
    RejectMismatch,
}

impl ContentTypePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trust_client" => Some(ContentTypePolicy::TrustClient),
            "prefer_detected" => Some(ContentTypePolicy::PreferDetected),
            "reject_mismatch" => Some(ContentTypePolicy::RejectMismatch),
            _ => None,
        }
    }
}

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
    (b"OggS", "audio/ogg"),
    (b"ID3", "audio/mpeg"),
    (b"\x1aE\xdf\xa3", "video/webm"),
    (b"<?xml", "application/xml"),
];

/// Detect a content type from the first bytes of a payload.
///
/// Binary formats are recognised by magic number. Text payloads are refined by
/// the file name when it names a textual type. Returns `None` for binary data
/// that matches no known signature.
pub fn detect(prefix: &[u8], name: &str) -> Option<String> {
    for (magic, mime) in SIGNATURES {
        if prefix.starts_with(magic) {
            return Some(mime.to_string());
        }
    }

    if prefix.len() >= 12 && &prefix[0..4] == b"RIFF" {
        match &prefix[8..12] {
            b"WEBP" => return Some("image/webp".to_string()),
            b"WAVE" => return Some("audio/wav".to_string()),
            _ => {}
        }
    }
    if prefix.len() >= 12 && &prefix[4..8] == b"ftyp" {
        return Some("video/mp4".to_string());
    }

    if looks_like_text(prefix) {
        let guessed = mime_guess::from_path(name).first();
        return Some(match guessed {
            Some(mime) if is_textual(mime.essence_str()) => mime.essence_str().to_string(),
            _ => "text/plain".to_string(),
        });
    }

    None
}

fn looks_like_text(prefix: &[u8]) -> bool {
    if prefix.is_empty() || prefix.contains(&0) {
        return false;
    }
    match std::str::from_utf8(prefix) {
        Ok(_) => true,
        // The sniff window may cut a multi-byte character in half
        Err(e) => e.error_len().is_none(),
    }
}

fn is_textual(mime: &str) -> bool {
    mime.starts_with("text/")
        || mime.ends_with("+xml")
        || mime.ends_with("+json")
        || matches!(
            mime,
            "application/json" | "application/xml" | "application/javascript" | "application/x-sh"
        )
}

/// Media type without parameters, lowercased
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Whether a declared type agrees with a detected one
pub fn same_type(declared: &str, detected: &str) -> bool {
    essence(declared) == essence(detected)
}
