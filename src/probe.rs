#![forbid(unsafe_code)]

//! Structural model of the resolver's `--dump-single-json` payload and the
//! availability probing that decides which catalog labels a given video can
//! actually deliver without server-side muxing.

use serde::{Deserialize, Serialize};

use crate::catalog::QualityLabel;

/// Containers we serve directly. Everything else (storyboards, 3gp relics)
/// never satisfies a video label.
const PLAYABLE_CONTAINERS: [&str; 2] = ["mp4", "webm"];

/// One rendition advertised by the probe. Everything is optional because the
/// tool's output varies wildly between sites and video ages; missing fields
/// simply disqualify a descriptor from the checks that need them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub format_id: Option<String>,
    /// Human-readable summary, e.g. `"137 - 1920x1080 (1080p)"`. The tool
    /// calls this field `format`.
    #[serde(rename(deserialize = "format", serialize = "format_label"))]
    pub format_label: Option<String>,
    pub format_note: Option<String>,
    pub ext: Option<String>,
    pub protocol: Option<String>,
    pub container: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<f64>,
    pub resolution: Option<String>,
    pub aspect_ratio: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub audio_ext: Option<String>,
    pub video_ext: Option<String>,
    pub dynamic_range: Option<String>,
    pub tbr: Option<f64>,
    pub vbr: Option<f64>,
    pub abr: Option<f64>,
    pub asr: Option<i64>,
    pub audio_channels: Option<i64>,
    pub filesize: Option<i64>,
    pub filesize_approx: Option<i64>,
    pub quality: Option<f64>,
    #[serde(default)]
    pub has_drm: bool,
    pub source_preference: Option<i64>,
    pub url: Option<String>,
}

impl FormatDescriptor {
    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio() && !self.has_video()
    }

    /// True for plain progressive transports that can be range-addressed as a
    /// single resource. Segmented playlist transports report `m3u8…` or
    /// `…dash…` protocols and are never direct.
    pub fn is_direct(&self) -> bool {
        matches!(self.protocol.as_deref(), Some("http" | "https"))
    }

    fn is_playable_combined(&self) -> bool {
        self.has_video()
            && self.has_audio()
            && self.is_direct()
            && self
                .ext
                .as_deref()
                .is_some_and(|ext| PLAYABLE_CONTAINERS.contains(&ext))
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    codec.is_some_and(|value| !value.is_empty() && value != "none")
}

/// One thumbnail variant with its URL and optional dimensions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThumbnailInfo {
    pub id: Option<String>,
    pub url: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub resolution: Option<String>,
    pub preference: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapPoint {
    pub start_time: f64,
    pub end_time: f64,
    pub value: f64,
}

/// Fields that arrive as a scalar on most sites but as a list on a few.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn first(&self) -> Option<&T> {
        match self {
            OneOrMany::One(value) => Some(value),
            OneOrMany::Many(values) => values.first(),
        }
    }
}

/// Full probe payload. Only a subset of fields are read but everything is
/// left optional because older videos may lack metadata.
#[derive(Debug, Default, Deserialize)]
pub struct VideoProbe {
    pub id: Option<String>,
    pub title: Option<String>,
    pub alt_title: Option<String>,
    pub webpage_url: Option<String>,
    pub original_url: Option<String>,
    pub extractor: Option<String>,
    pub channel: Option<OneOrMany<String>>,
    pub channel_id: Option<OneOrMany<String>>,
    pub channel_url: Option<OneOrMany<String>>,
    pub channel_follower_count: Option<i64>,
    pub uploader: Option<String>,
    pub artists: Option<Vec<String>>,
    pub creators: Option<Vec<String>>,
    pub description: Option<String>,
    pub categories: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub album: Option<String>,
    pub track: Option<String>,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
    pub comment_count: Option<i64>,
    pub age_limit: Option<i64>,
    pub availability: Option<String>,
    pub duration: Option<i64>,
    pub duration_string: Option<String>,
    pub upload_date: Option<String>,
    pub release_date: Option<String>,
    pub release_year: Option<i64>,
    pub timestamp: Option<i64>,
    pub thumbnail: Option<String>,
    pub is_live: Option<bool>,
    pub was_live: Option<bool>,
    pub live_status: Option<String>,
    pub media_type: Option<String>,
    pub playable_in_embed: Option<bool>,
    pub heatmap: Option<Vec<HeatmapPoint>>,
    pub formats: Option<Vec<FormatDescriptor>>,
    pub thumbnails: Option<Vec<ThumbnailInfo>>,
}

/// Which catalog labels this format listing can deliver, in canonical order.
///
/// Video labels key off the tallest directly-playable combined stream: a
/// target height T is satisfied when the tallest survivor H is within 10%
/// (`10·H ≥ 9·T`, kept in integers so the boundary is exact). Audio labels
/// key off their bitrate bucket. The result is independent of input order.
pub fn available_qualities(formats: &[FormatDescriptor]) -> Vec<QualityLabel> {
    let max_height = formats
        .iter()
        .filter(|descriptor| descriptor.is_playable_combined())
        .filter_map(|descriptor| descriptor.height)
        .max()
        .unwrap_or(0);

    QualityLabel::ALL
        .iter()
        .copied()
        .filter(|label| {
            if let Some(target) = label.target_height() {
                max_height > 0 && max_height.saturating_mul(10) >= 9 * i64::from(target)
            } else if let Some(bucket) = label.audio_bucket() {
                formats.iter().any(|descriptor| {
                    descriptor.is_audio_only()
                        && descriptor.is_direct()
                        && descriptor
                            .ext
                            .as_deref()
                            .zip(descriptor.abr)
                            .is_some_and(|(ext, abr)| bucket.contains(ext, abr))
                })
            } else {
                false
            }
        })
        .collect()
}

/// Highest-average-bitrate audio-only stream on a direct transport, or `None`
/// when the listing has nothing a transcoder could pull from.
pub fn best_audio_stream(formats: &[FormatDescriptor]) -> Option<&FormatDescriptor> {
    formats
        .iter()
        .filter(|descriptor| {
            descriptor.is_audio_only() && descriptor.is_direct() && descriptor.url.is_some()
        })
        .max_by(|a, b| a.abr.unwrap_or(0.0).total_cmp(&b.abr.unwrap_or(0.0)))
}

/// Largest thumbnail by pixel area, tie-broken by the source preference
/// score. Entries without a URL are useless and skipped.
pub fn best_thumbnail(thumbnails: &[ThumbnailInfo]) -> Option<&ThumbnailInfo> {
    thumbnails
        .iter()
        .filter(|thumbnail| thumbnail.url.is_some())
        .max_by_key(|thumbnail| {
            let area = thumbnail
                .width
                .unwrap_or(0)
                .saturating_mul(thumbnail.height.unwrap_or(0));
            (area, thumbnail.preference.unwrap_or(i64::MIN))
        })
}
