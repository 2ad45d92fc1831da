use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TimeUs
// ---------------------------------------------------------------------------

/// Time value in microseconds. Used for both timestamps and durations.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeUs(pub i64);

impl TimeUs {
    pub const ZERO: Self = Self(0);

    pub fn from_seconds(s: f64) -> Self {
        Self((s * 1_000_000.0).round() as i64)
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms * 1_000)
    }

    pub fn as_seconds(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn as_millis(&self) -> i64 {
        self.0 / 1_000
    }

    /// Multiply by a floating-point factor, rounding to the nearest microsecond.
    pub fn scaled(&self, factor: f64) -> Self {
        Self((self.0 as f64 * factor).round() as i64)
    }

    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }
}

impl Add for TimeUs {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for TimeUs {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl std::iter::Sum for TimeUs {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.map(|t| t.0).sum())
    }
}

impl fmt::Display for TimeUs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_ms = self.0.unsigned_abs() / 1_000;
        let ms = total_ms % 1_000;
        let total_secs = total_ms / 1_000;
        let secs = total_secs % 60;
        let mins = (total_secs / 60) % 60;
        let hours = total_secs / 3_600;
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{sign}{hours:02}:{mins:02}:{secs:02}.{ms:03}")
    }
}

// ---------------------------------------------------------------------------
// SourceRef
// ---------------------------------------------------------------------------

/// Reference to one media source: a local path or a remote URL.
/// Opaque to the composition model; the synthesis engine resolves and
/// sandboxes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceRef(String);

impl SourceRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self(path.as_ref().to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Remote references carry a scheme separator; everything else is a path.
    pub fn is_remote(&self) -> bool {
        self.0.contains("://")
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// StreamInfo / MediaInfo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

/// Technical metadata for one stream of a probed source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StreamInfo {
    Video {
        codec: String,
        width: u32,
        height: u32,
        frame_rate: f64,
        pixel_format: String,
    },
    Audio {
        codec: String,
        sample_rate: u32,
        channels: u32,
    },
}

impl StreamInfo {
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamInfo::Video { .. } => StreamKind::Video,
            StreamInfo::Audio { .. } => StreamKind::Audio,
        }
    }
}

/// Resolved metadata for one source. Immutable once probed; owned by a
/// single build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    pub source: SourceRef,
    pub duration: TimeUs,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub fn video(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.kind() == StreamKind::Video)
    }

    pub fn audio(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.kind() == StreamKind::Audio)
    }

    pub fn has_video(&self) -> bool {
        self.video().is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio().is_some()
    }
}

// ---------------------------------------------------------------------------
// Clip
// ---------------------------------------------------------------------------

/// How a clip is mapped onto the canvas when its dimensions differ.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScaleMode {
    /// Source already matches the canvas; no scaling node is emitted.
    #[default]
    None,
    /// Scale to fit inside the canvas, pad the remainder (letterbox).
    Fit,
    /// Scale to cover the canvas, crop the overflow.
    Fill,
    /// Scale to the canvas ignoring aspect ratio.
    Stretch,
}

/// One clip on a track: a trim window into a source, placed on the
/// output timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clip {
    pub id: Uuid,
    pub source: SourceRef,
    /// Trim window [source_in, source_out) in source time.
    pub source_in: TimeUs,
    pub source_out: TimeUs,
    pub timeline_start: TimeUs,
    /// Playback speed factor; display length is trim length / speed.
    pub speed: f64,
    pub scale_mode: ScaleMode,
}

impl Clip {
    pub fn new(source: SourceRef, source_in: TimeUs, source_out: TimeUs, timeline_start: TimeUs) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            source_in,
            source_out,
            timeline_start,
            speed: 1.0,
            scale_mode: ScaleMode::None,
        }
    }

    /// Length of the trim window in source time.
    pub fn trim_len(&self) -> TimeUs {
        self.source_out - self.source_in
    }

    /// Length the clip occupies on the output timeline.
    pub fn display_len(&self) -> TimeUs {
        self.trim_len().scaled(1.0 / self.speed)
    }

    pub fn timeline_end(&self) -> TimeUs {
        self.timeline_start + self.display_len()
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransitionKind {
    /// Hard cut; consumes no time from either neighbor.
    Cut,
    Crossfade,
    FadeToBlack,
    FadeToWhite,
    Dissolve,
    WipeLeft,
    WipeRight,
    WipeUp,
    WipeDown,
    SlideLeft,
    SlideRight,
    CircleOpen,
    CircleClose,
}

/// A transition anchored at the boundary after clip `after_clip` of a track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub id: Uuid,
    pub kind: TransitionKind,
    pub duration: TimeUs,
    pub after_clip: usize,
}

impl Transition {
    pub fn new(kind: TransitionKind, duration: TimeUs, after_clip: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            duration,
            after_clip,
        }
    }

    /// Timeline span the transition consumes from its neighbors.
    pub fn consumed(&self) -> TimeUs {
        match self.kind {
            TransitionKind::Cut => TimeUs::ZERO,
            _ => self.duration,
        }
    }
}

// ---------------------------------------------------------------------------
// TextOverlay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Position {
    Absolute { x: i32, y: i32 },
    Anchored(Anchor),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextStyle {
    /// Font file on disk; must live inside the engine sandbox.
    pub font_file: Option<PathBuf>,
    pub size: u32,
    /// Hex color, with or without a leading `#`.
    pub color: String,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_file: None,
            size: 36,
            color: "#ffffff".to_string(),
        }
    }
}

/// Fade-in/out animation for a text overlay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Fade {
    pub fade_in: TimeUs,
    pub fade_out: TimeUs,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextOverlay {
    pub id: Uuid,
    pub text: String,
    pub style: TextStyle,
    pub position: Position,
    pub start: TimeUs,
    pub duration: TimeUs,
    pub fade: Option<Fade>,
}

impl TextOverlay {
    pub fn new(text: impl Into<String>, position: Position, start: TimeUs, duration: TimeUs) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            style: TextStyle::default(),
            position,
            start,
            duration,
            fade: None,
        }
    }

    pub fn end(&self) -> TimeUs {
        self.start + self.duration
    }
}

// ---------------------------------------------------------------------------
// AudioLayer
// ---------------------------------------------------------------------------

/// A free-standing audio source mixed under the output, independent of
/// the video tracks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioLayer {
    pub id: Uuid,
    pub source: SourceRef,
    pub gain: f64,
    pub offset: TimeUs,
    pub duration: TimeUs,
}

impl AudioLayer {
    pub fn new(source: SourceRef, gain: f64, offset: TimeUs, duration: TimeUs) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            gain,
            offset,
            duration,
        }
    }

    pub fn end(&self) -> TimeUs {
        self.offset + self.duration
    }
}

// ---------------------------------------------------------------------------
// Track
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: Uuid,
    pub clips: Vec<Clip>,
    pub transitions: Vec<Transition>,
}

impl Track {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            clips: vec![],
            transitions: vec![],
        }
    }

    pub fn transition_after(&self, clip_index: usize) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.after_clip == clip_index)
    }

    /// Track length on the output timeline: display windows joined at
    /// their boundaries, each transition overlapping both neighbors once.
    pub fn duration(&self) -> TimeUs {
        let clips: TimeUs = self.clips.iter().map(|c| c.display_len()).sum();
        let consumed: TimeUs = self.transitions.iter().map(|t| t.consumed()).sum();
        clips - consumed
    }
}

impl Default for Track {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Canvas
// ---------------------------------------------------------------------------

/// Output canvas every clip is normalized toward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub sample_rate: u32,
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// A full composition: sequential tracks, text overlays, audio layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Composition {
    pub id: Uuid,
    pub name: String,
    pub canvas: Canvas,
    pub tracks: Vec<Track>,
    pub overlays: Vec<TextOverlay>,
    pub audio_layers: Vec<AudioLayer>,
}

impl Composition {
    /// Total output duration: tracks play back to back.
    pub fn total_duration(&self) -> TimeUs {
        self.tracks.iter().map(|t| t.duration()).sum()
    }

    /// Unique sources in deterministic order: clips in track order first,
    /// then audio layers.
    pub fn sources(&self) -> Vec<SourceRef> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        let clip_sources = self
            .tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .map(|c| &c.source);
        let layer_sources = self.audio_layers.iter().map(|l| &l.source);
        for source in clip_sources.chain(layer_sources) {
            if seen.insert(source.clone()) {
                out.push(source.clone());
            }
        }
        out
    }

    pub fn has_transitions(&self) -> bool {
        self.tracks
            .iter()
            .any(|t| t.transitions.iter().any(|tr| tr.kind != TransitionKind::Cut))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_us_conversions() {
        let t = TimeUs::from_seconds(2.5);
        assert_eq!(t, TimeUs(2_500_000));
        assert!((t.as_seconds() - 2.5).abs() < 1e-9);
        assert_eq!(TimeUs::from_millis(1500), TimeUs(1_500_000));
        assert_eq!(TimeUs(2_500_000).as_millis(), 2500);
    }

    #[test]
    fn time_us_arithmetic() {
        let a = TimeUs(5_000_000);
        let b = TimeUs(3_000_000);
        assert_eq!(a + b, TimeUs(8_000_000));
        assert_eq!(a - b, TimeUs(2_000_000));
        assert_eq!(vec![a, b].into_iter().sum::<TimeUs>(), TimeUs(8_000_000));
    }

    #[test]
    fn time_us_scaled_rounds() {
        assert_eq!(TimeUs(3_000_000).scaled(0.5), TimeUs(1_500_000));
        assert_eq!(TimeUs(1_000_000).scaled(1.0 / 3.0), TimeUs(333_333));
    }

    #[test]
    fn time_us_display() {
        assert_eq!(TimeUs::ZERO.to_string(), "00:00:00.000");
        assert_eq!(TimeUs(1_500_000).to_string(), "00:00:01.500");
        assert_eq!(TimeUs::from_seconds(3661.5).to_string(), "01:01:01.500");
        assert_eq!(TimeUs(-1_000_000).to_string(), "-00:00:01.000");
    }

    #[test]
    fn source_ref_remote_detection() {
        assert!(SourceRef::new("https://cdn.example.com/a.mp4").is_remote());
        assert!(!SourceRef::new("/srv/media/a.mp4").is_remote());
        assert!(!SourceRef::from_path("clips/a.mp4").is_remote());
    }

    #[test]
    fn media_info_stream_lookup() {
        let info = MediaInfo {
            source: SourceRef::new("/srv/media/a.mp4"),
            duration: TimeUs::from_seconds(10.0),
            streams: vec![
                StreamInfo::Video {
                    codec: "h264".into(),
                    width: 1920,
                    height: 1080,
                    frame_rate: 30.0,
                    pixel_format: "yuv420p".into(),
                },
                StreamInfo::Audio {
                    codec: "aac".into(),
                    sample_rate: 48000,
                    channels: 2,
                },
            ],
        };
        assert!(info.has_video());
        assert!(info.has_audio());
        assert_eq!(info.video().unwrap().kind(), StreamKind::Video);
    }

    #[test]
    fn clip_display_len_accounts_for_speed() {
        let mut clip = Clip::new(
            SourceRef::new("/srv/media/a.mp4"),
            TimeUs::from_seconds(1.0),
            TimeUs::from_seconds(5.0),
            TimeUs::ZERO,
        );
        assert_eq!(clip.trim_len(), TimeUs::from_seconds(4.0));
        assert_eq!(clip.display_len(), TimeUs::from_seconds(4.0));

        clip.speed = 2.0;
        assert_eq!(clip.display_len(), TimeUs::from_seconds(2.0));
        assert_eq!(clip.timeline_end(), TimeUs::from_seconds(2.0));
    }

    #[test]
    fn track_duration_subtracts_transition_overlap() {
        let mut track = Track::new();
        let src = SourceRef::new("/srv/media/a.mp4");
        track.clips.push(Clip::new(
            src.clone(),
            TimeUs::ZERO,
            TimeUs::from_seconds(4.0),
            TimeUs::ZERO,
        ));
        track.clips.push(Clip::new(
            src,
            TimeUs::ZERO,
            TimeUs::from_seconds(6.0),
            TimeUs::from_seconds(4.0),
        ));
        assert_eq!(track.duration(), TimeUs::from_seconds(10.0));

        track.transitions.push(Transition::new(
            TransitionKind::Crossfade,
            TimeUs::from_seconds(1.0),
            0,
        ));
        assert_eq!(track.duration(), TimeUs::from_seconds(9.0));
    }

    #[test]
    fn cut_transition_consumes_nothing() {
        let cut = Transition::new(TransitionKind::Cut, TimeUs::from_seconds(1.0), 0);
        assert_eq!(cut.consumed(), TimeUs::ZERO);
    }

    #[test]
    fn composition_sources_deduplicated_in_order() {
        let src_a = SourceRef::new("/srv/media/a.mp4");
        let src_b = SourceRef::new("/srv/media/b.mp4");
        let src_music = SourceRef::new("/srv/media/music.flac");

        let mut track = Track::new();
        track.clips.push(Clip::new(
            src_a.clone(),
            TimeUs::ZERO,
            TimeUs::from_seconds(2.0),
            TimeUs::ZERO,
        ));
        track.clips.push(Clip::new(
            src_b.clone(),
            TimeUs::ZERO,
            TimeUs::from_seconds(2.0),
            TimeUs::from_seconds(2.0),
        ));
        track.clips.push(Clip::new(
            src_a.clone(),
            TimeUs::from_seconds(3.0),
            TimeUs::from_seconds(5.0),
            TimeUs::from_seconds(4.0),
        ));

        let comp = Composition {
            id: Uuid::new_v4(),
            name: "test".into(),
            canvas: Canvas {
                width: 1920,
                height: 1080,
                fps: 30.0,
                sample_rate: 48000,
            },
            tracks: vec![track],
            overlays: vec![],
            audio_layers: vec![AudioLayer::new(
                src_music.clone(),
                0.5,
                TimeUs::ZERO,
                TimeUs::from_seconds(4.0),
            )],
        };

        assert_eq!(comp.sources(), vec![src_a, src_b, src_music]);
    }

    #[test]
    fn serde_roundtrip_composition() {
        let comp = Composition {
            id: Uuid::new_v4(),
            name: "promo".into(),
            canvas: Canvas {
                width: 1280,
                height: 720,
                fps: 25.0,
                sample_rate: 44100,
            },
            tracks: vec![Track::new()],
            overlays: vec![TextOverlay::new(
                "Hello",
                Position::Anchored(Anchor::BottomCenter),
                TimeUs::ZERO,
                TimeUs::from_seconds(3.0),
            )],
            audio_layers: vec![],
        };
        let json = serde_json::to_string(&comp).unwrap();
        let back: Composition = serde_json::from_str(&json).unwrap();
        assert_eq!(comp, back);
    }

    #[test]
    fn serde_roundtrip_media_info() {
        let info = MediaInfo {
            source: SourceRef::new("/srv/media/a.mp4"),
            duration: TimeUs::from_seconds(12.0),
            streams: vec![StreamInfo::Audio {
                codec: "opus".into(),
                sample_rate: 48000,
                channels: 2,
            }],
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: MediaInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info, back);
    }
}
