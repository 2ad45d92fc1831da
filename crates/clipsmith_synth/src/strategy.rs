use std::collections::HashMap;
use std::path::PathBuf;

use clipsmith_core::types::{Clip, Composition, MediaInfo, ScaleMode, SourceRef, StreamInfo, TimeUs};
use serde::{Deserialize, Serialize};

use crate::graph::FilterGraph;
use crate::security::escape_concat_path;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// How a composition reaches the output container: lossless stream copy
/// through the concat demuxer, or the general filter-graph re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FastCopy,
    FilterGraph,
}

/// The plan carried through hardening and assembly.
#[derive(Debug, Clone)]
pub enum RenderPlan {
    /// Clip sources in playback order; duplicates allowed (a source played
    /// twice appears twice in the list).
    FastCopy { clips: Vec<SourceRef> },
    /// Compiled graph plus its `-i` inputs in pad-index order.
    Graph {
        graph: FilterGraph,
        inputs: Vec<SourceRef>,
    },
}

/// Decide the path once per build, deterministically, from composition and
/// probe metadata alone. Stream copy is rigid: any transition, overlay,
/// audio layer, transform, partial trim, or format mismatch forces the
/// re-encode path.
pub fn select(composition: &Composition, media: &HashMap<SourceRef, MediaInfo>) -> Strategy {
    let clips: Vec<&Clip> = composition
        .tracks
        .iter()
        .flat_map(|t| t.clips.iter())
        .collect();

    if clips.is_empty()
        || composition.has_transitions()
        || !composition.overlays.is_empty()
        || !composition.audio_layers.is_empty()
    {
        return Strategy::FilterGraph;
    }

    for clip in &clips {
        if clip.scale_mode != ScaleMode::None || clip.speed != 1.0 || clip.source.is_remote() {
            return Strategy::FilterGraph;
        }
        let Some(info) = media.get(&clip.source) else {
            return Strategy::FilterGraph;
        };
        // Stream copy cannot honor sub-file trims.
        if clip.source_in != TimeUs::ZERO || clip.source_out != info.duration {
            return Strategy::FilterGraph;
        }
    }

    let mut signature: Option<(StreamSig, Option<StreamSig>)> = None;
    for clip in &clips {
        let info = &media[&clip.source];
        let Some(video) = info.video().map(StreamSig::from) else {
            return Strategy::FilterGraph;
        };
        let audio = info.audio().map(StreamSig::from);
        match &signature {
            None => signature = Some((video, audio)),
            Some((first_video, first_audio)) => {
                if &video != first_video || &audio != first_audio {
                    return Strategy::FilterGraph;
                }
            }
        }
    }

    Strategy::FastCopy
}

/// Comparable stream parameters. Frame rates are compared with a small
/// tolerance so 30000/1001 probed twice stays equal.
#[derive(Debug, Clone, PartialEq)]
enum StreamSig {
    Video {
        codec: String,
        width: u32,
        height: u32,
        frame_rate_mhz: i64,
        pixel_format: String,
    },
    Audio {
        codec: String,
        sample_rate: u32,
        channels: u32,
    },
}

impl From<&StreamInfo> for StreamSig {
    fn from(stream: &StreamInfo) -> Self {
        match stream {
            StreamInfo::Video {
                codec,
                width,
                height,
                frame_rate,
                pixel_format,
            } => StreamSig::Video {
                codec: codec.clone(),
                width: *width,
                height: *height,
                frame_rate_mhz: (frame_rate * 1000.0).round() as i64,
                pixel_format: pixel_format.clone(),
            },
            StreamInfo::Audio {
                codec,
                sample_rate,
                channels,
            } => StreamSig::Audio {
                codec: codec.clone(),
                sample_rate: *sample_rate,
                channels: *channels,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Concat list
// ---------------------------------------------------------------------------

/// Sidecar file for the concat demuxer. The engine produces the path and
/// contents; writing the file is the caller's job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcatList {
    pub path: PathBuf,
    pub contents: String,
}

impl ConcatList {
    /// One `file '<absolute-path>'` line per clip, in playback order.
    pub fn from_paths(path: PathBuf, entries: &[String]) -> Self {
        let contents: String = entries
            .iter()
            .map(|entry| format!("file '{}'\n", escape_concat_path(entry)))
            .collect();
        Self { path, contents }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
