use std::fmt::Write as _;
use std::time::Duration;

use crate::selector::{MediaFamily, Selection};
use crate::source::{MediaMetadata, MediaReference};

/// Renders whole seconds as `1h2m3s`, `3m32s` or `45s`.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (hours, minutes, secs) = (seconds / 3600, seconds % 3600 / 60, seconds % 60);
    let mut rendered = String::new();
    if hours > 0 {
        let _ = write!(rendered, "{hours}h");
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(rendered, "{minutes}m");
    }
    let _ = write!(rendered, "{secs}s");
    rendered
}

/// `"<pos+1>/<size> <title> \n"` when the reference carries a complete
/// playlist context.
pub fn playlist_prefix(reference: &MediaReference) -> Option<String> {
    let context = reference.playlist.as_ref().filter(|ctx| ctx.is_complete())?;
    Some(format!(
        "{}/{} {} \n",
        context.position + 1,
        context.size,
        context.title
    ))
}

/// Quality label for video, `<kbps>kbps` for audio.
pub fn quality(selection: &Selection) -> String {
    match selection.family {
        MediaFamily::Video => selection
            .encoding
            .quality_label
            .clone()
            .unwrap_or_else(|| format!("{}kbps", selection.encoding.bitrate_kbps())),
        MediaFamily::Audio => format!("{}kbps", selection.encoding.bitrate_kbps()),
    }
}

fn summary_line(metadata: &MediaMetadata, selection: &Selection) -> String {
    format!(
        "{} {} {}",
        metadata.canonical_url(),
        format_duration(metadata.duration_seconds),
        quality(selection)
    )
}

pub fn caption(
    reference: &MediaReference,
    metadata: &MediaMetadata,
    selection: &Selection,
    transcoded: Option<TranscodeTarget>,
) -> String {
    let mut text = playlist_prefix(reference).unwrap_or_default();
    text.push_str(&metadata.title);
    if let Some(date) = metadata.publish_date {
        let _ = write!(text, " {}", date.format("%Y/%m/%d"));
    }
    text.push('\n');
    text.push_str(&summary_line(metadata, selection));
    if let Some(target) = transcoded {
        let _ = write!(text, "\n(transcoded to {target})");
    }
    text
}

/// Bitrates a transcode was asked for; a zero video rate means audio only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeTarget {
    pub video_kbps: i64,
    pub audio_kbps: i64,
}

impl TranscodeTarget {
    pub fn for_selection(selection: &Selection, reserved_audio_kbps: i64) -> Option<Self> {
        if !selection.needs_transcode() {
            return None;
        }
        Some(match selection.family {
            MediaFamily::Video => Self {
                video_kbps: selection.target_bitrate_kbps,
                audio_kbps: reserved_audio_kbps,
            },
            MediaFamily::Audio => Self {
                video_kbps: 0,
                audio_kbps: selection.target_bitrate_kbps,
            },
        })
    }

    /// Artifact name fragment, e.g. `v580k.a60k` or `a13k`.
    pub fn file_label(&self) -> String {
        if self.video_kbps > 0 {
            format!("v{}k.a{}k", self.video_kbps, self.audio_kbps)
        } else {
            format!("a{}k", self.audio_kbps)
        }
    }
}

impl std::fmt::Display for TranscodeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.video_kbps > 0 {
            write!(f, "video:{}kbps audio:{}kbps", self.video_kbps, self.audio_kbps)
        } else {
            write!(f, "audio:{}kbps", self.audio_kbps)
        }
    }
}

pub fn downloading_notice(
    reference: &MediaReference,
    metadata: &MediaMetadata,
    selection: &Selection,
) -> String {
    format!(
        "{}{}\n{}\ndownloading",
        playlist_prefix(reference).unwrap_or_default(),
        metadata.title,
        summary_line(metadata, selection)
    )
}

pub fn downloaded_notice(
    metadata: &MediaMetadata,
    selection: &Selection,
    elapsed: Duration,
    planned: Option<TranscodeTarget>,
) -> String {
    let mut text = format!(
        "{}\n{}\ndownloaded {} in {}",
        metadata.title,
        summary_line(metadata, selection),
        selection.family,
        format_duration(elapsed.as_secs() as i64)
    );
    if let Some(target) = planned {
        let _ = write!(text, "\ntranscoding to {target}");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::EncodingDescriptor;
    use crate::source::PlaylistContext;
    use chrono::NaiveDate;

    fn metadata() -> MediaMetadata {
        MediaMetadata {
            id: "dQw4w9WgXcQ".into(),
            title: "Never Gonna".into(),
            author: "Rick".into(),
            publish_date: NaiveDate::from_ymd_opt(2009, 10, 25),
            duration_seconds: 212,
        }
    }

    fn audio_selection(target: i64) -> Selection {
        Selection {
            encoding: EncodingDescriptor {
                mime_type: "audio/mp4".into(),
                has_audio: true,
                bitrate: 131_072,
                ..Default::default()
            },
            family: MediaFamily::Audio,
            target_bitrate_kbps: target,
        }
    }

    #[test]
    fn durations_render_compactly() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(212), "3m32s");
        assert_eq!(format_duration(3605), "1h0m5s");
    }

    #[test]
    fn audio_caption_without_playlist() {
        let text = caption(
            &MediaReference::single("dQw4w9WgXcQ"),
            &metadata(),
            &audio_selection(0),
            None,
        );
        assert_eq!(text, "Never Gonna 2009/10/25\nyoutu.be/dQw4w9WgXcQ 3m32s 128kbps");
    }

    #[test]
    fn playlist_prefix_and_transcode_note() {
        let reference = MediaReference {
            id: "dQw4w9WgXcQ".into(),
            playlist: Some(PlaylistContext {
                playlist_id: "PL1".into(),
                position: 2,
                size: 9,
                title: "Mix".into(),
            }),
        };
        let selection = audio_selection(640);
        let target = TranscodeTarget::for_selection(&selection, 60);
        let text = caption(&reference, &metadata(), &selection, target);
        assert!(text.starts_with("3/9 Mix \nNever Gonna"));
        assert!(text.ends_with("\n(transcoded to audio:640kbps)"));
    }

    #[test]
    fn incomplete_playlist_context_has_no_prefix() {
        let reference = MediaReference {
            id: "x".into(),
            playlist: Some(PlaylistContext {
                playlist_id: "PL1".into(),
                position: 0,
                size: 1,
                title: String::new(),
            }),
        };
        assert_eq!(playlist_prefix(&reference), None);
    }

    #[test]
    fn playlist_without_size_has_no_prefix() {
        let reference = MediaReference {
            id: "x".into(),
            playlist: Some(PlaylistContext {
                playlist_id: "PL1".into(),
                position: 0,
                size: 0,
                title: "Mix".into(),
            }),
        };
        assert_eq!(playlist_prefix(&reference), None);
    }

    #[test]
    fn video_target_mentions_both_rates() {
        let target = TranscodeTarget {
            video_kbps: 580,
            audio_kbps: 60,
        };
        assert_eq!(target.to_string(), "video:580kbps audio:60kbps");
    }
}
