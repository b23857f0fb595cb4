//! Picks which encoding of a media item to download and whether it has to be
//! re-encoded to fit the delivery size limit.
//!
//! Bitrate is the only figure every catalog entry carries; byte length is
//! frequently missing and then estimated from bitrate and duration. The policy
//! is "largest entry that fits, otherwise the smallest one plus a recomputed
//! target bitrate", so an oversized file is never published unmodified.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Every kbps figure in the crate, reported or computed, uses binary kilobits.
pub const BITS_PER_KBIT: i64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFamily {
    Audio,
    Video,
}

impl MediaFamily {
    pub fn from_want_video(want_video: bool) -> Self {
        if want_video {
            MediaFamily::Video
        } else {
            MediaFamily::Audio
        }
    }

    fn mime_prefix(self) -> &'static str {
        match self {
            MediaFamily::Audio => "audio/mp4",
            MediaFamily::Video => "video/mp4",
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            MediaFamily::Audio => "m4a",
            MediaFamily::Video => "mp4",
        }
    }
}

impl fmt::Display for MediaFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaFamily::Audio => f.write_str("audio"),
            MediaFamily::Video => f.write_str("video"),
        }
    }
}

/// One retrievable representation of a media item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EncodingDescriptor {
    pub format_id: String,
    pub mime_type: String,
    pub has_audio: bool,
    pub has_video: bool,
    pub quality_label: Option<String>,
    /// Bits per second.
    pub bitrate: i64,
    /// Zero when the source does not report it.
    pub content_length: i64,
    pub language: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub url: String,
}

impl EncodingDescriptor {
    pub fn estimated_size(&self, duration_seconds: i64) -> i64 {
        if self.content_length > 0 {
            self.content_length
        } else {
            self.bitrate / 8 * duration_seconds
        }
    }

    pub fn bitrate_kbps(&self) -> i64 {
        self.bitrate / BITS_PER_KBIT
    }

    fn matches_family(&self, family: MediaFamily) -> bool {
        if !self.has_audio || self.bitrate <= 0 {
            return false;
        }
        if !self.mime_type.starts_with(family.mime_prefix()) {
            return false;
        }
        match family {
            MediaFamily::Audio => true,
            MediaFamily::Video => {
                self.has_video
                    && self
                        .quality_label
                        .as_deref()
                        .is_some_and(|label| !label.is_empty())
            }
        }
    }

    fn language_allowed(&self, allowed: &[String]) -> bool {
        let Some(language) = self.language.as_deref() else {
            return true;
        };
        let language = language.to_lowercase();
        if language.is_empty() {
            return true;
        }
        allowed
            .iter()
            .any(|candidate| language.contains(&candidate.to_lowercase()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryBudget {
    pub max_size_bytes: i64,
    pub reserved_audio_kbps: i64,
}

impl DeliveryBudget {
    pub fn new(max_size_bytes: i64, reserved_audio_kbps: i64) -> Self {
        Self {
            max_size_bytes,
            reserved_audio_kbps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub encoding: EncodingDescriptor,
    pub family: MediaFamily,
    /// Zero means the encoding is published as downloaded.
    pub target_bitrate_kbps: i64,
}

impl Selection {
    pub fn needs_transcode(&self) -> bool {
        self.target_bitrate_kbps > 0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no {family} encoding available")]
    NoEncodingAvailable { family: MediaFamily },
    #[error("{duration_seconds}s of media cannot fit {max_size_bytes} bytes")]
    BudgetTooSmall {
        duration_seconds: i64,
        max_size_bytes: i64,
    },
}

pub fn select(
    catalog: &[EncodingDescriptor],
    family: MediaFamily,
    budget: &DeliveryBudget,
    duration_seconds: i64,
    allowed_languages: &[String],
) -> Result<Selection, SelectError> {
    let mut smallest: Option<&EncodingDescriptor> = None;
    let mut fitting: Option<&EncodingDescriptor> = None;

    let candidates = catalog
        .iter()
        .filter(|encoding| encoding.matches_family(family))
        .filter(|encoding| encoding.language_allowed(allowed_languages));
    for encoding in candidates {
        if smallest.map_or(true, |current| encoding.bitrate < current.bitrate) {
            smallest = Some(encoding);
        }
        let fits = encoding.estimated_size(duration_seconds) < budget.max_size_bytes;
        if fits && fitting.map_or(true, |current| encoding.bitrate > current.bitrate) {
            fitting = Some(encoding);
        }
    }

    if let Some(encoding) = fitting {
        return Ok(Selection {
            encoding: encoding.clone(),
            family,
            target_bitrate_kbps: 0,
        });
    }

    let encoding = smallest.ok_or(SelectError::NoEncodingAvailable { family })?;
    let target_bitrate_kbps = target_bitrate_kbps(family, budget, duration_seconds);
    if target_bitrate_kbps <= 0 {
        return Err(SelectError::BudgetTooSmall {
            duration_seconds,
            max_size_bytes: budget.max_size_bytes,
        });
    }
    Ok(Selection {
        encoding: encoding.clone(),
        family,
        target_bitrate_kbps,
    })
}

/// The extra second keeps near-zero durations finite and rounds the estimate
/// down rather than over the limit.
pub fn target_bitrate_kbps(
    family: MediaFamily,
    budget: &DeliveryBudget,
    duration_seconds: i64,
) -> i64 {
    let span = duration_seconds.max(0) + 1;
    match family {
        MediaFamily::Video => {
            let reserved_bytes = budget.reserved_audio_kbps * BITS_PER_KBIT * span / 8;
            let video_bytes = budget.max_size_bytes - reserved_bytes;
            video_bytes * 8 / span / BITS_PER_KBIT
        }
        MediaFamily::Audio => budget.max_size_bytes * 8 / span / BITS_PER_KBIT,
    }
}
