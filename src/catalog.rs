#![forbid(unsafe_code)]

//! The quality catalog: a closed set of caller-facing quality labels, each
//! bound to one format-selector string in the resolver's selector grammar.
//!
//! Video labels are keyed by target vertical resolution, audio labels by
//! container family plus an average-bitrate bucket. The catalog never grows
//! at runtime; unknown labels are rejected at the HTTP boundary and cannot be
//! represented internally.

use std::fmt;

/// Selector used when the caller omits a quality: best combined mp4 stream,
/// falling back to any directly-playable container.
pub const BEST_SELECTOR: &str = "best[ext=mp4][protocol!*=m3u8][vcodec!=none][acodec!=none]/best[protocol!*=m3u8][vcodec!=none][acodec!=none]";

/// One deliverable rendition the caller can ask for by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityLabel {
    Video144,
    Video240,
    Video360,
    Video480,
    Video720,
    Video1080,
    Video1440,
    Video2160,
    M4a48,
    M4a128,
    Opus50,
    Opus70,
    Opus160,
}

/// Bitrate bucket an audio label accepts: lower bound exclusive, upper bound
/// inclusive (or unbounded).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioBucket {
    pub container: &'static str,
    pub min_exclusive: f64,
    pub max_inclusive: Option<f64>,
}

impl AudioBucket {
    pub fn contains(&self, container: &str, abr: f64) -> bool {
        container == self.container
            && abr > self.min_exclusive
            && self.max_inclusive.is_none_or(|max| abr <= max)
    }
}

impl QualityLabel {
    /// Every label in canonical order: ascending video resolution, then AAC
    /// audio ascending bitrate, then Opus audio ascending bitrate.
    pub const ALL: [QualityLabel; 13] = [
        QualityLabel::Video144,
        QualityLabel::Video240,
        QualityLabel::Video360,
        QualityLabel::Video480,
        QualityLabel::Video720,
        QualityLabel::Video1080,
        QualityLabel::Video1440,
        QualityLabel::Video2160,
        QualityLabel::M4a48,
        QualityLabel::M4a128,
        QualityLabel::Opus50,
        QualityLabel::Opus70,
        QualityLabel::Opus160,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "144p" => Some(Self::Video144),
            "240p" => Some(Self::Video240),
            "360p" => Some(Self::Video360),
            "480p" => Some(Self::Video480),
            "720p" => Some(Self::Video720),
            "1080p" => Some(Self::Video1080),
            "1440p" => Some(Self::Video1440),
            "2160p" => Some(Self::Video2160),
            "m4a-48k" => Some(Self::M4a48),
            "m4a-128k" => Some(Self::M4a128),
            "opus-50k" => Some(Self::Opus50),
            "opus-70k" => Some(Self::Opus70),
            "opus-160k" => Some(Self::Opus160),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video144 => "144p",
            Self::Video240 => "240p",
            Self::Video360 => "360p",
            Self::Video480 => "480p",
            Self::Video720 => "720p",
            Self::Video1080 => "1080p",
            Self::Video1440 => "1440p",
            Self::Video2160 => "2160p",
            Self::M4a48 => "m4a-48k",
            Self::M4a128 => "m4a-128k",
            Self::Opus50 => "opus-50k",
            Self::Opus70 => "opus-70k",
            Self::Opus160 => "opus-160k",
        }
    }

    /// The format-selector string for this label. Each selector carries a
    /// fallback alternative after `/` that drops the container constraint, so
    /// resolution still succeeds when the preferred container is missing but
    /// an equivalent stream in another container exists.
    pub fn selector(self) -> &'static str {
        match self {
            Self::Video144 => {
                "best[ext=mp4][protocol!*=m3u8][height<=144][vcodec!=none][acodec!=none]/best[protocol!*=m3u8][height<=144][vcodec!=none][acodec!=none]"
            }
            Self::Video240 => {
                "best[ext=mp4][protocol!*=m3u8][height<=240][vcodec!=none][acodec!=none]/best[protocol!*=m3u8][height<=240][vcodec!=none][acodec!=none]"
            }
            Self::Video360 => {
                "best[ext=mp4][protocol!*=m3u8][height<=360][vcodec!=none][acodec!=none]/best[protocol!*=m3u8][height<=360][vcodec!=none][acodec!=none]"
            }
            Self::Video480 => {
                "best[ext=mp4][protocol!*=m3u8][height<=480][vcodec!=none][acodec!=none]/best[protocol!*=m3u8][height<=480][vcodec!=none][acodec!=none]"
            }
            Self::Video720 => {
                "best[ext=mp4][protocol!*=m3u8][height<=720][vcodec!=none][acodec!=none]/best[protocol!*=m3u8][height<=720][vcodec!=none][acodec!=none]"
            }
            Self::Video1080 => {
                "best[ext=mp4][protocol!*=m3u8][height<=1080][vcodec!=none][acodec!=none]/best[protocol!*=m3u8][height<=1080][vcodec!=none][acodec!=none]"
            }
            Self::Video1440 => {
                "best[ext=mp4][protocol!*=m3u8][height<=1440][vcodec!=none][acodec!=none]/best[protocol!*=m3u8][height<=1440][vcodec!=none][acodec!=none]"
            }
            Self::Video2160 => {
                "best[ext=mp4][protocol!*=m3u8][height<=2160][vcodec!=none][acodec!=none]/best[protocol!*=m3u8][height<=2160][vcodec!=none][acodec!=none]"
            }
            Self::M4a48 => {
                "bestaudio[ext=m4a][protocol!*=m3u8][abr<=64]/bestaudio[protocol!*=m3u8][abr<=64]"
            }
            Self::M4a128 => {
                "bestaudio[ext=m4a][protocol!*=m3u8][abr>64]/bestaudio[protocol!*=m3u8][abr>64]"
            }
            Self::Opus50 => {
                "bestaudio[ext=webm][protocol!*=m3u8][abr<=60]/bestaudio[protocol!*=m3u8][abr<=60]"
            }
            Self::Opus70 => {
                "bestaudio[ext=webm][protocol!*=m3u8][abr>60][abr<=100]/bestaudio[protocol!*=m3u8][abr>60][abr<=100]"
            }
            Self::Opus160 => {
                "bestaudio[ext=webm][protocol!*=m3u8][abr>100]/bestaudio[protocol!*=m3u8][abr>100]"
            }
        }
    }

    /// Target vertical resolution for video labels, `None` for audio labels.
    pub fn target_height(self) -> Option<u32> {
        match self {
            Self::Video144 => Some(144),
            Self::Video240 => Some(240),
            Self::Video360 => Some(360),
            Self::Video480 => Some(480),
            Self::Video720 => Some(720),
            Self::Video1080 => Some(1080),
            Self::Video1440 => Some(1440),
            Self::Video2160 => Some(2160),
            _ => None,
        }
    }

    /// Bitrate bucket for audio labels, `None` for video labels.
    pub fn audio_bucket(self) -> Option<AudioBucket> {
        let bucket = match self {
            Self::M4a48 => AudioBucket {
                container: "m4a",
                min_exclusive: 0.0,
                max_inclusive: Some(64.0),
            },
            Self::M4a128 => AudioBucket {
                container: "m4a",
                min_exclusive: 64.0,
                max_inclusive: None,
            },
            Self::Opus50 => AudioBucket {
                container: "webm",
                min_exclusive: 0.0,
                max_inclusive: Some(60.0),
            },
            Self::Opus70 => AudioBucket {
                container: "webm",
                min_exclusive: 60.0,
                max_inclusive: Some(100.0),
            },
            Self::Opus160 => AudioBucket {
                container: "webm",
                min_exclusive: 100.0,
                max_inclusive: None,
            },
            _ => return None,
        };
        Some(bucket)
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comma-joined list of every valid label, for diagnostics on rejected input.
pub fn label_list() -> String {
    QualityLabel::ALL
        .iter()
        .map(|label| label.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
