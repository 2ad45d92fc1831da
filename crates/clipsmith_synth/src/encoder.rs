use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthError};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    Opus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Quality {
    Draft,
    Standard,
    High,
    Custom { crf: u8 },
}

/// Abstract quality options a job carries. Every recognized field is
/// enumerated here; there is no pass-through bag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EncoderOptions {
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub quality: Quality,
    pub audio_bitrate_kbps: u32,
    pub sample_rate: u32,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            quality: Quality::Standard,
            audio_bitrate_kbps: 192,
            sample_rate: 48000,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Concrete encoder parameter set. Pure value object with no identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderSettings {
    pub video_codec: String,
    pub preset: Option<String>,
    pub profile: Option<String>,
    pub crf: u8,
    /// Constrained-quality codecs want an explicit zero target bitrate.
    pub video_bitrate: Option<String>,
    pub pixel_format: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub sample_rate: u32,
}

impl EncoderSettings {
    /// Encoder flags in assembly order.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.video_codec.clone()];
        if let Some(preset) = &self.preset {
            args.push("-preset".to_string());
            args.push(preset.clone());
        }
        if let Some(profile) = &self.profile {
            args.push("-profile:v".to_string());
            args.push(profile.clone());
        }
        args.push("-crf".to_string());
        args.push(self.crf.to_string());
        if let Some(bitrate) = &self.video_bitrate {
            args.push("-b:v".to_string());
            args.push(bitrate.clone());
        }
        args.push("-pix_fmt".to_string());
        args.push(self.pixel_format.clone());
        args.push("-c:a".to_string());
        args.push(self.audio_codec.clone());
        args.push("-b:a".to_string());
        args.push(self.audio_bitrate.clone());
        args.push("-ar".to_string());
        args.push(self.sample_rate.to_string());
        args
    }
}

// ---------------------------------------------------------------------------
// Profile building
// ---------------------------------------------------------------------------

const SUPPORTED_SAMPLE_RATES: &[u32] = &[44100, 48000];

/// Map abstract options to a concrete parameter set. Pure function; the
/// only failure path is an out-of-range or unsupported combination.
pub fn build_settings(options: &EncoderOptions) -> Result<EncoderSettings> {
    match (options.video_codec, options.audio_codec) {
        (VideoCodec::H264, AudioCodec::Aac) => {}
        (VideoCodec::H265, AudioCodec::Aac) => {}
        (VideoCodec::Vp9, AudioCodec::Opus) => {}
        (VideoCodec::Vp9, AudioCodec::Aac) => {
            return Err(SynthError::UnsupportedFormat(
                "vp9 output requires opus audio".to_string(),
            ));
        }
        (VideoCodec::H264 | VideoCodec::H265, AudioCodec::Opus) => {
            return Err(SynthError::UnsupportedFormat(
                "opus audio requires the vp9 codec".to_string(),
            ));
        }
    }

    let crf = match (options.video_codec, options.quality) {
        (VideoCodec::Vp9, Quality::Draft) => 40,
        (VideoCodec::Vp9, Quality::Standard) => 33,
        (VideoCodec::Vp9, Quality::High) => 24,
        (_, Quality::Draft) => 28,
        (_, Quality::Standard) => 23,
        (_, Quality::High) => 18,
        (codec, Quality::Custom { crf }) => {
            let max = if codec == VideoCodec::Vp9 { 63 } else { 51 };
            if crf > max {
                return Err(SynthError::UnsupportedFormat(format!(
                    "crf {crf} out of range 0..={max}"
                )));
            }
            crf
        }
    };

    if !(32..=512).contains(&options.audio_bitrate_kbps) {
        return Err(SynthError::UnsupportedFormat(format!(
            "audio bitrate {}k out of range 32k..=512k",
            options.audio_bitrate_kbps
        )));
    }
    if !SUPPORTED_SAMPLE_RATES.contains(&options.sample_rate) {
        return Err(SynthError::UnsupportedFormat(format!(
            "sample rate {} not supported",
            options.sample_rate
        )));
    }

    let preset = match options.video_codec {
        VideoCodec::Vp9 => None,
        _ => Some(
            match options.quality {
                Quality::Draft => "veryfast",
                Quality::High => "slow",
                _ => "medium",
            }
            .to_string(),
        ),
    };

    Ok(EncoderSettings {
        video_codec: match options.video_codec {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Vp9 => "libvpx-vp9",
        }
        .to_string(),
        preset,
        profile: match options.video_codec {
            VideoCodec::H264 => Some("high".to_string()),
            _ => None,
        },
        crf,
        video_bitrate: match options.video_codec {
            VideoCodec::Vp9 => Some("0".to_string()),
            _ => None,
        },
        pixel_format: "yuv420p".to_string(),
        audio_codec: match options.audio_codec {
            AudioCodec::Aac => "aac",
            AudioCodec::Opus => "libopus",
        }
        .to_string(),
        audio_bitrate: format!("{}k", options.audio_bitrate_kbps),
        sample_rate: options.sample_rate,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
