use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clipsmith_core::types::{MediaInfo, SourceRef, StreamInfo, TimeUs};
use serde::Deserialize;
use thiserror::Error;

use crate::error::{Result, SourceFailure, SynthError};

// ---------------------------------------------------------------------------
// Prober trait
// ---------------------------------------------------------------------------

/// Typed failure for one source. Carried per source inside
/// `SynthError::InputResolution`.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to execute ffprobe: {0}")]
    Exec(String),

    #[error("ffprobe failed: {0}")]
    Failed(String),

    #[error("malformed probe output: {0}")]
    Malformed(String),

    #[error("source has no streams")]
    NoStreams,

    #[error("no metadata registered for source")]
    Unresolved,
}

/// The probing collaborator: turns one source reference into technical
/// metadata. The engine's only suspension point goes through here.
pub trait Prober {
    fn probe(&mut self, source: &SourceRef) -> std::result::Result<MediaInfo, ProbeError>;
}

// ---------------------------------------------------------------------------
// FfprobeProber
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    pix_fmt: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Probes sources by shelling out to ffprobe and parsing its JSON output.
pub struct FfprobeProber {
    binary: PathBuf,
}

impl FfprobeProber {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffprobe"),
        }
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober for FfprobeProber {
    fn probe(&mut self, source: &SourceRef) -> std::result::Result<MediaInfo, ProbeError> {
        if !source.is_remote() {
            let path = Path::new(source.as_str());
            if !path.exists() {
                return Err(ProbeError::FileNotFound(path.to_path_buf()));
            }
        }

        tracing::debug!("probing source {source}");
        let output = std::process::Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(source.as_str())
            .output()
            .map_err(|e| ProbeError::Exec(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Failed(stderr.into_owned()));
        }

        let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| ProbeError::Malformed(e.to_string()))?;
        parse_probe_output(source, &probe)
    }
}

fn parse_probe_output(
    source: &SourceRef,
    probe: &FfprobeOutput,
) -> std::result::Result<MediaInfo, ProbeError> {
    let mut streams = Vec::new();
    for stream in &probe.streams {
        match stream.codec_type.as_str() {
            "video" => streams.push(StreamInfo::Video {
                codec: stream.codec_name.clone().unwrap_or_default(),
                width: stream.width.unwrap_or(0),
                height: stream.height.unwrap_or(0),
                frame_rate: stream
                    .r_frame_rate
                    .as_deref()
                    .and_then(parse_frame_rate)
                    .unwrap_or(0.0),
                pixel_format: stream.pix_fmt.clone().unwrap_or_default(),
            }),
            "audio" => streams.push(StreamInfo::Audio {
                codec: stream.codec_name.clone().unwrap_or_default(),
                sample_rate: stream
                    .sample_rate
                    .as_deref()
                    .and_then(|r| r.parse().ok())
                    .unwrap_or(0),
                channels: stream.channels.unwrap_or(0),
            }),
            // Data/subtitle streams are irrelevant to synthesis.
            _ => {}
        }
    }

    if streams.is_empty() {
        return Err(ProbeError::NoStreams);
    }

    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .map(TimeUs::from_seconds)
        .unwrap_or(TimeUs::ZERO);

    Ok(MediaInfo {
        source: source.clone(),
        duration,
        streams,
    })
}

/// Parse an ffprobe frame rate string like "30000/1001" or "30/1".
fn parse_frame_rate(rate: &str) -> Option<f64> {
    if let Some((num, den)) = rate.split_once('/') {
        let n: f64 = num.parse().ok()?;
        let d: f64 = den.parse().ok()?;
        if d == 0.0 {
            return None;
        }
        Some(n / d)
    } else {
        rate.parse().ok()
    }
}

// ---------------------------------------------------------------------------
// StaticProber
// ---------------------------------------------------------------------------

/// In-memory prober backed by pre-resolved metadata. Used by tests and by
/// callers that cache probe results outside the engine.
#[derive(Debug, Default)]
pub struct StaticProber {
    entries: HashMap<SourceRef, MediaInfo>,
}

impl StaticProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: MediaInfo) {
        self.entries.insert(info.source.clone(), info);
    }

    pub fn with(mut self, info: MediaInfo) -> Self {
        self.insert(info);
        self
    }
}

impl Prober for StaticProber {
    fn probe(&mut self, source: &SourceRef) -> std::result::Result<MediaInfo, ProbeError> {
        self.entries
            .get(source)
            .cloned()
            .ok_or(ProbeError::Unresolved)
    }
}

// ---------------------------------------------------------------------------
// InputResolver
// ---------------------------------------------------------------------------

/// Resolves every unique source exactly once per build, collecting all
/// failures so the caller sees every bad reference in one response.
pub struct InputResolver<'p> {
    prober: &'p mut dyn Prober,
    cache: HashMap<SourceRef, MediaInfo>,
}

impl<'p> InputResolver<'p> {
    pub fn new(prober: &'p mut dyn Prober) -> Self {
        Self {
            prober,
            cache: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, sources: &[SourceRef]) -> Result<HashMap<SourceRef, MediaInfo>> {
        let mut failures = Vec::new();

        for source in sources {
            if self.cache.contains_key(source) {
                continue;
            }
            match self.prober.probe(source) {
                Ok(info) => {
                    self.cache.insert(source.clone(), info);
                }
                Err(cause) => failures.push(SourceFailure {
                    source: source.clone(),
                    cause,
                }),
            }
        }

        if !failures.is_empty() {
            return Err(SynthError::InputResolution(failures));
        }

        Ok(sources
            .iter()
            .map(|s| (s.clone(), self.cache[s].clone()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> std::result::Result<MediaInfo, ProbeError> {
        let output: FfprobeOutput = serde_json::from_str(json).unwrap();
        parse_probe_output(&SourceRef::new("/srv/media/a.mp4"), &output)
    }

    #[test]
    fn parse_frame_rate_fraction() {
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("24/1").unwrap() - 24.0).abs() < f64::EPSILON);
        assert!(parse_frame_rate("30/0").is_none());
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn parse_probe_output_video_and_audio() {
        let info = parse(
            r#"{
                "streams": [
                    {
                        "codec_type": "video",
                        "codec_name": "h264",
                        "width": 1920,
                        "height": 1080,
                        "r_frame_rate": "30/1",
                        "pix_fmt": "yuv420p"
                    },
                    {
                        "codec_type": "audio",
                        "codec_name": "aac",
                        "channels": 2,
                        "sample_rate": "48000"
                    }
                ],
                "format": { "duration": "10.5" }
            }"#,
        )
        .unwrap();

        assert_eq!(info.duration, TimeUs::from_seconds(10.5));
        assert_eq!(info.streams.len(), 2);
        match info.video().unwrap() {
            StreamInfo::Video {
                codec,
                width,
                height,
                frame_rate,
                pixel_format,
            } => {
                assert_eq!(codec, "h264");
                assert_eq!((*width, *height), (1920, 1080));
                assert!((frame_rate - 30.0).abs() < f64::EPSILON);
                assert_eq!(pixel_format, "yuv420p");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn parse_probe_output_audio_only() {
        let info = parse(
            r#"{
                "streams": [
                    {
                        "codec_type": "audio",
                        "codec_name": "flac",
                        "channels": 2,
                        "sample_rate": "44100"
                    }
                ],
                "format": { "duration": "180.0" }
            }"#,
        )
        .unwrap();

        assert!(!info.has_video());
        assert!(info.has_audio());
        assert_eq!(info.duration, TimeUs::from_seconds(180.0));
    }

    #[test]
    fn parse_probe_output_ignores_data_streams() {
        let info = parse(
            r#"{
                "streams": [
                    { "codec_type": "data" },
                    {
                        "codec_type": "audio",
                        "codec_name": "aac",
                        "channels": 2,
                        "sample_rate": "48000"
                    }
                ],
                "format": {}
            }"#,
        )
        .unwrap();
        assert_eq!(info.streams.len(), 1);
        assert_eq!(info.duration, TimeUs::ZERO);
    }

    #[test]
    fn parse_probe_output_no_streams_is_an_error() {
        let result = parse(r#"{ "streams": [], "format": {} }"#);
        assert!(matches!(result, Err(ProbeError::NoStreams)));
    }

    #[test]
    fn ffprobe_prober_rejects_missing_file() {
        let mut prober = FfprobeProber::new();
        let result = prober.probe(&SourceRef::new("/tmp/clipsmith-does-not-exist.mp4"));
        assert!(matches!(result, Err(ProbeError::FileNotFound(_))));
    }

    fn stub_info(source: &SourceRef, duration_s: f64) -> MediaInfo {
        MediaInfo {
            source: source.clone(),
            duration: TimeUs::from_seconds(duration_s),
            streams: vec![StreamInfo::Video {
                codec: "h264".into(),
                width: 1920,
                height: 1080,
                frame_rate: 30.0,
                pixel_format: "yuv420p".into(),
            }],
        }
    }

    #[test]
    fn resolver_memoizes_per_source() {
        struct CountingProber {
            calls: usize,
            inner: StaticProber,
        }
        impl Prober for CountingProber {
            fn probe(&mut self, source: &SourceRef) -> std::result::Result<MediaInfo, ProbeError> {
                self.calls += 1;
                self.inner.probe(source)
            }
        }

        let src = SourceRef::new("/srv/media/a.mp4");
        let mut prober = CountingProber {
            calls: 0,
            inner: StaticProber::new().with(stub_info(&src, 10.0)),
        };

        let mut resolver = InputResolver::new(&mut prober);
        resolver.resolve(&[src.clone()]).unwrap();
        resolver.resolve(&[src.clone()]).unwrap();
        assert_eq!(prober.calls, 1);
    }

    #[test]
    fn resolver_collects_all_failures() {
        let good = SourceRef::new("/srv/media/a.mp4");
        let bad_one = SourceRef::new("/srv/media/missing1.mp4");
        let bad_two = SourceRef::new("/srv/media/missing2.mp4");

        let mut prober = StaticProber::new().with(stub_info(&good, 10.0));
        let mut resolver = InputResolver::new(&mut prober);

        let err = resolver
            .resolve(&[good, bad_one.clone(), bad_two.clone()])
            .unwrap_err();
        match err {
            SynthError::InputResolution(failures) => {
                let sources: Vec<&SourceRef> = failures.iter().map(|f| &f.source).collect();
                assert_eq!(sources, vec![&bad_one, &bad_two]);
            }
            other => panic!("expected InputResolution, got {other}"),
        }
    }
}
