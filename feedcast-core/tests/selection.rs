use feedcast_core::selector::target_bitrate_kbps;
use feedcast_core::{select, DeliveryBudget, EncodingDescriptor, MediaFamily, SelectError};

const MB: i64 = 1 << 20;

fn audio(format_id: &str, bitrate: i64, size: i64, language: Option<&str>) -> EncodingDescriptor {
    EncodingDescriptor {
        format_id: format_id.into(),
        mime_type: "audio/mp4; codecs=\"mp4a.40.2\"".into(),
        has_audio: true,
        bitrate,
        content_length: size,
        language: language.map(str::to_string),
        ..EncodingDescriptor::default()
    }
}

fn english() -> Vec<String> {
    vec!["english".to_string()]
}

#[test]
fn largest_fitting_encoding_wins_untouched() {
    let catalog = vec![
        audio("128k", 128 * 1024, 40 * MB, None),
        audio("256k", 256 * 1024, 80 * MB, None),
    ];

    let selection = select(
        &catalog,
        MediaFamily::Audio,
        &DeliveryBudget::new(64 * MB, 60),
        600,
        &english(),
    )
    .unwrap();

    assert_eq!(selection.encoding.format_id, "128k");
    assert_eq!(selection.target_bitrate_kbps, 0);
    assert!(!selection.needs_transcode());
}

#[test]
fn oversized_catalog_falls_back_to_smallest_with_target() {
    let budget = DeliveryBudget::new(47 * MB, 60);
    let catalog = vec![
        audio("96k", 96 * 1024, 120 * MB, None),
        audio("64k", 64 * 1024, 90 * MB, None),
    ];

    let selection = select(&catalog, MediaFamily::Audio, &budget, 600, &english()).unwrap();

    assert_eq!(selection.encoding.format_id, "64k");
    let target = selection.target_bitrate_kbps;
    assert!(target > 0);
    assert!(target * 1024 / 8 * 601 <= budget.max_size_bytes);
}

#[test]
fn video_target_leaves_room_for_reserved_audio() {
    let budget = DeliveryBudget::new(47 * MB, 60);
    let video = target_bitrate_kbps(MediaFamily::Video, &budget, 600);
    let audio = target_bitrate_kbps(MediaFamily::Audio, &budget, 600);

    assert_eq!(video, 580);
    assert_eq!(audio, 640);
    assert!((video + 60) * 1024 / 8 * 601 <= budget.max_size_bytes);
}

#[test]
fn language_filter_is_a_case_insensitive_substring_match() {
    let catalog = vec![
        audio("de", 160 * 1024, MB, Some("German (de)")),
        audio("en", 128 * 1024, MB, Some("English (en)")),
        audio("orig", 64 * 1024, MB, Some("")),
    ];

    let selection = select(
        &catalog,
        MediaFamily::Audio,
        &DeliveryBudget::new(64 * MB, 60),
        300,
        &english(),
    )
    .unwrap();

    assert_eq!(selection.encoding.format_id, "en");
}

#[test]
fn filtered_out_catalog_reports_no_encoding() {
    let catalog = vec![audio("de", 160 * 1024, MB, Some("German (de)"))];

    let err = select(
        &catalog,
        MediaFamily::Audio,
        &DeliveryBudget::new(64 * MB, 60),
        300,
        &english(),
    )
    .unwrap_err();

    assert_eq!(
        err,
        SelectError::NoEncodingAvailable {
            family: MediaFamily::Audio
        }
    );
}

#[test]
fn missing_content_length_is_estimated_from_bitrate() {
    // 128 KiB/s for an hour is ~56 MiB, over a 50 MiB budget.
    let catalog = vec![audio("128k", 128 * 1024, 0, None)];

    let selection = select(
        &catalog,
        MediaFamily::Audio,
        &DeliveryBudget::new(50 * MB, 60),
        3600,
        &english(),
    )
    .unwrap();

    assert!(selection.needs_transcode());
    assert_eq!(selection.target_bitrate_kbps, 50 * MB * 8 / 3601 / 1024);
}
