//! Inbound media normalization
//!
//! Clients embed images and audio in several historical shapes: a data-URI
//! string, or an object carrying a MIME type and base64 payload under one of
//! a handful of field names. Everything is resolved here, once, into the
//! canonical [`MediaItem`] - nothing deeper in the pipeline branches on
//! inbound shape.
//!
//! Size limits are enforced without ever decoding the payload: the decoded
//! byte count is derived from the base64 length and padding.

use serde::Serialize;
use serde_json::Value;

/// Marker prefix for data-URI encoded media
pub const DATA_URI_PREFIX: &str = "data:";

/// Accepted field names for the MIME type on object-shaped media
const MIME_ALIASES: &[&str] = &["mimeType", "mime_type", "type", "contentType", "content_type"];
/// Accepted field names for the base64 payload on object-shaped media
const PAYLOAD_ALIASES: &[&str] = &["data", "payload", "base64", "content"];
/// Accepted field names for a nested inline-data object
const NESTED_ALIASES: &[&str] = &["inlineData", "inline_data"];

const IMAGE_MIME_ALLOWED: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/webp",
    "image/gif",
    "image/heic",
    "image/heif",
];

const AUDIO_MIME_ALLOWED: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/x-wav",
    "audio/ogg",
    "audio/webm",
    "audio/aac",
    "audio/flac",
    "audio/mp4",
    "audio/m4a",
    "audio/x-m4a",
];

/// Canonical inline media payload
///
/// The payload stays base64-encoded for its whole lifetime; it is forwarded
/// to the upstream API as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaItem {
    pub mime_type: String,
    pub data: String,
}

/// Whether a slot expects image or audio content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
}

/// Why a media item was excluded from the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// MIME type missing, unparseable, or outside the allow-list
    #[serde(rename = "type")]
    Type,
    /// Item alone exceeds the per-item ceiling
    #[serde(rename = "per-part")]
    PerPart,
    /// Item would push the request over the aggregate ceiling
    #[serde(rename = "total")]
    Total,
}

impl RejectReason {
    /// Stable label used in envelopes and metrics
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::Type => "type",
            RejectReason::PerPart => "per-part",
            RejectReason::Total => "total",
        }
    }
}

/// A rejected media item, reported back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct MediaRejection {
    /// Where in the request the item appeared, e.g. `messages[1].images[0]`
    pub slot: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub reason: RejectReason,
}

/// Approximate decoded size of a base64 payload, without materializing it
pub fn approx_decoded_len(payload: &str) -> u64 {
    let len = payload.len() as u64;
    let padding = payload.bytes().rev().take_while(|b| *b == b'=').count() as u64;
    ((len / 4) * 3).saturating_sub(padding.min(2))
}

/// Pull (mime type, payload) out of any accepted inbound shape
///
/// Returns `None` when the value is not recognizably media at all; MIME
/// allow-listing happens later so the rejection can carry the stated type.
pub fn coerce_media(value: &Value) -> Option<(String, String)> {
    match value {
        Value::String(s) => parse_data_uri(s),
        Value::Object(obj) => {
            // A nested inlineData object wins over top-level aliases
            for key in NESTED_ALIASES {
                if let Some(nested) = obj.get(*key) {
                    if let Some(found) = coerce_media(nested) {
                        return Some(found);
                    }
                }
            }

            let payload = PAYLOAD_ALIASES
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_str))?;

            // Payload may itself be a data URI carrying its own MIME type
            if let Some(parsed) = parse_data_uri(payload) {
                return Some(parsed);
            }

            let mime = MIME_ALIASES
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_str))?;
            Some((mime.trim().to_string(), payload.to_string()))
        }
        _ => None,
    }
}

fn parse_data_uri(s: &str) -> Option<(String, String)> {
    let rest = s.strip_prefix(DATA_URI_PREFIX)?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64").unwrap_or(header);
    if mime.is_empty() || payload.is_empty() {
        return None;
    }
    Some((mime.trim().to_string(), payload.to_string()))
}

fn mime_allowed(kind: MediaKind, mime: &str) -> bool {
    let mime = mime.to_ascii_lowercase();
    let allowed = match kind {
        MediaKind::Image => IMAGE_MIME_ALLOWED,
        MediaKind::Audio => AUDIO_MIME_ALLOWED,
    };
    allowed.contains(&mime.as_str())
}

/// Request-scoped media admission
///
/// One normalizer exists per request; it tracks the running aggregate size
/// and collects rejections across every media slot so the caller can report
/// exactly which items failed and why.
#[derive(Debug)]
pub struct MediaNormalizer {
    per_item_ceiling: u64,
    total_ceiling: u64,
    used: u64,
    supplied: usize,
    accepted: usize,
    rejected: Vec<MediaRejection>,
}

impl MediaNormalizer {
    pub fn new(limits: &crate::config::LimitsConfig) -> Self {
        Self {
            per_item_ceiling: limits.media_item_bytes,
            total_ceiling: limits.media_total_bytes,
            used: 0,
            supplied: 0,
            accepted: 0,
            rejected: Vec::new(),
        }
    }

    /// Admit one media value, in request order
    ///
    /// Validation order: MIME allow-list, then per-item ceiling, then
    /// aggregate ceiling. Items are admitted in the order supplied, so an
    /// item rejected for the aggregate does not block later, smaller items.
    pub fn admit(&mut self, kind: MediaKind, slot: String, value: &Value) -> Option<MediaItem> {
        self.supplied += 1;

        let Some((mime_type, data)) = coerce_media(value) else {
            self.reject(slot, None, RejectReason::Type);
            return None;
        };

        if !mime_allowed(kind, &mime_type) {
            self.reject(slot, Some(mime_type), RejectReason::Type);
            return None;
        }

        let size = approx_decoded_len(&data);
        if size > self.per_item_ceiling {
            self.reject(slot, Some(mime_type), RejectReason::PerPart);
            return None;
        }
        if self.used + size > self.total_ceiling {
            self.reject(slot, Some(mime_type), RejectReason::Total);
            return None;
        }

        self.used += size;
        self.accepted += 1;
        Some(MediaItem { mime_type, data })
    }

    fn reject(&mut self, slot: String, mime_type: Option<String>, reason: RejectReason) {
        tracing::debug!(slot = %slot, reason = reason.label(), "media item rejected");
        self.rejected.push(MediaRejection {
            slot,
            mime_type,
            reason,
        });
    }

    /// Number of media values seen, accepted or not
    pub fn supplied(&self) -> usize {
        self.supplied
    }

    /// Number of media values admitted
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// True when media was supplied and every item of it was rejected
    ///
    /// Callers must fail the whole request in that case: silently proceeding
    /// text-only invites the model to hallucinate an analysis of media it
    /// never saw.
    pub fn all_rejected(&self) -> bool {
        self.supplied > 0 && self.accepted == 0
    }

    pub fn rejections(&self) -> &[MediaRejection] {
        &self.rejected
    }

    pub fn into_rejections(self) -> Vec<MediaRejection> {
        self.rejected
    }
}
