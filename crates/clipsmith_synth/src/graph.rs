use clipsmith_core::types::{StreamKind, TransitionKind};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::security::escape_filter_text;

// ---------------------------------------------------------------------------
// Pads
// ---------------------------------------------------------------------------

/// Unique name for one filter output within a build, e.g. `v3` or `a1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PadLabel(pub String);

impl fmt::Display for PadLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A filter input: either a raw stream of one of the command's inputs, or
/// the labeled output of an earlier node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PadRef {
    Stream { input: usize, kind: StreamKind },
    Node(PadLabel),
}

impl fmt::Display for PadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PadRef::Stream { input, kind } => {
                let k = match kind {
                    StreamKind::Video => "v",
                    StreamKind::Audio => "a",
                };
                write!(f, "[{input}:{k}]")
            }
            PadRef::Node(label) => write!(f, "[{label}]"),
        }
    }
}

/// Per-build pad label counter, prefixed by stream kind. Owned by one
/// build context; never shared across builds.
#[derive(Debug, Default)]
pub struct LabelGen {
    video: u32,
    audio: u32,
}

impl LabelGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, kind: StreamKind) -> PadLabel {
        match kind {
            StreamKind::Video => {
                let n = self.video;
                self.video += 1;
                PadLabel(format!("v{n}"))
            }
            StreamKind::Audio => {
                let n = self.audio;
                self.audio += 1;
                PadLabel(format!("a{n}"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Filter operations
// ---------------------------------------------------------------------------

/// X/Y placement of drawn text: a pixel offset or one of the fixed anchor
/// expressions from the builder's table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TextCoord {
    Px(i32),
    Expr(String),
}

impl fmt::Display for TextCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextCoord::Px(v) => write!(f, "{v}"),
            TextCoord::Expr(e) => f.write_str(e),
        }
    }
}

/// Alpha ramp for a faded text overlay, in output-timeline seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FadeWindow {
    pub start: f64,
    pub end: f64,
    pub fade_in: f64,
    pub fade_out: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrawTextParams {
    pub text: String,
    pub font_file: Option<String>,
    pub font_size: u32,
    /// Hex color without the leading `#`.
    pub color: String,
    pub x: TextCoord,
    pub y: TextCoord,
    /// Display window in output-timeline seconds.
    pub enable: (f64, f64),
    pub fade: Option<FadeWindow>,
}

/// One filter operation. Closed set: every recognized operation and its
/// exact parameters are enumerated here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FilterOp {
    Trim { start: f64, end: f64 },
    SetPts { speed: f64 },
    Scale { width: u32, height: u32 },
    ScaleFit { width: u32, height: u32 },
    ScaleCover { width: u32, height: u32 },
    Pad { width: u32, height: u32 },
    Crop { width: u32, height: u32 },
    SetSar,
    Fps { fps: f64 },
    ATrim { start: f64, end: f64 },
    ASetPts,
    Atempo { factor: f64 },
    AResample { sample_rate: u32 },
    Xfade { kind: TransitionKind, duration: f64, offset: f64 },
    ACrossfade { duration: f64 },
    Concat { n: usize, video: bool, audio: bool },
    DrawText(DrawTextParams),
    Volume { gain: f64 },
    ADelay { ms: i64 },
    AFadeIn { duration: f64 },
    AFadeOut { start: f64, duration: f64 },
    AMix { inputs: usize },
}

/// xfade transition names as the tool spells them.
pub fn xfade_name(kind: TransitionKind) -> &'static str {
    match kind {
        TransitionKind::Cut => "fade",
        TransitionKind::Crossfade => "fade",
        TransitionKind::FadeToBlack => "fadeblack",
        TransitionKind::FadeToWhite => "fadewhite",
        TransitionKind::Dissolve => "dissolve",
        TransitionKind::WipeLeft => "wipeleft",
        TransitionKind::WipeRight => "wiperight",
        TransitionKind::WipeUp => "wipeup",
        TransitionKind::WipeDown => "wipedown",
        TransitionKind::SlideLeft => "slideleft",
        TransitionKind::SlideRight => "slideright",
        TransitionKind::CircleOpen => "circleopen",
        TransitionKind::CircleClose => "circleclose",
    }
}

/// Render a second count the way the tool reads it: integral values bare,
/// fractional values in shortest round-trip form.
fn fmt_num(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

impl FilterOp {
    /// Exact textual form of this operation in the filter-graph language.
    pub fn render(&self) -> String {
        match self {
            FilterOp::Trim { start, end } => {
                format!("trim=start={}:end={}", fmt_num(*start), fmt_num(*end))
            }
            FilterOp::SetPts { speed } => {
                if (*speed - 1.0).abs() < f64::EPSILON {
                    "setpts=PTS-STARTPTS".to_string()
                } else {
                    format!("setpts=(PTS-STARTPTS)/{}", fmt_num(*speed))
                }
            }
            FilterOp::Scale { width, height } => format!("scale={width}:{height}"),
            FilterOp::ScaleFit { width, height } => {
                format!("scale={width}:{height}:force_original_aspect_ratio=decrease")
            }
            FilterOp::ScaleCover { width, height } => {
                format!("scale={width}:{height}:force_original_aspect_ratio=increase")
            }
            FilterOp::Pad { width, height } => {
                format!("pad={width}:{height}:(ow-iw)/2:(oh-ih)/2")
            }
            FilterOp::Crop { width, height } => format!("crop={width}:{height}"),
            FilterOp::SetSar => "setsar=1".to_string(),
            FilterOp::Fps { fps } => format!("fps={}", fmt_num(*fps)),
            FilterOp::ATrim { start, end } => {
                format!("atrim=start={}:end={}", fmt_num(*start), fmt_num(*end))
            }
            FilterOp::ASetPts => "asetpts=PTS-STARTPTS".to_string(),
            FilterOp::Atempo { factor } => format!("atempo={}", fmt_num(*factor)),
            FilterOp::AResample { sample_rate } => format!("aresample={sample_rate}"),
            FilterOp::Xfade {
                kind,
                duration,
                offset,
            } => format!(
                "xfade=transition={}:duration={}:offset={}",
                xfade_name(*kind),
                fmt_num(*duration),
                fmt_num(*offset)
            ),
            FilterOp::ACrossfade { duration } => {
                format!("acrossfade=d={}", fmt_num(*duration))
            }
            FilterOp::Concat { n, video, audio } => format!(
                "concat=n={n}:v={}:a={}",
                u8::from(*video),
                u8::from(*audio)
            ),
            FilterOp::DrawText(params) => render_drawtext(params),
            FilterOp::Volume { gain } => format!("volume={}", fmt_num(*gain)),
            FilterOp::ADelay { ms } => format!("adelay={ms}|{ms}"),
            FilterOp::AFadeIn { duration } => format!("afade=t=in:d={}", fmt_num(*duration)),
            FilterOp::AFadeOut { start, duration } => {
                format!("afade=t=out:st={}:d={}", fmt_num(*start), fmt_num(*duration))
            }
            FilterOp::AMix { inputs } => {
                format!("amix=inputs={inputs}:duration=longest:dropout_transition=0")
            }
        }
    }
}

fn render_drawtext(params: &DrawTextParams) -> String {
    let mut out = format!("drawtext=text={}", escape_filter_text(&params.text));
    if let Some(font) = &params.font_file {
        out.push_str(&format!(":fontfile={}", escape_filter_text(font)));
    }
    out.push_str(&format!(
        ":fontsize={}:fontcolor=0x{}:x={}:y={}",
        params.font_size, params.color, params.x, params.y
    ));
    if let Some(fade) = &params.fade {
        out.push_str(&format!(":alpha='{}'", render_alpha(fade)));
    }
    let (start, end) = params.enable;
    out.push_str(&format!(
        ":enable='between(t,{},{})'",
        fmt_num(start),
        fmt_num(end)
    ));
    out
}

fn render_alpha(fade: &FadeWindow) -> String {
    let s = fmt_num(fade.start);
    let e = fmt_num(fade.end);
    let fi = fmt_num(fade.fade_in);
    let fo = fmt_num(fade.fade_out);
    match (fade.fade_in > 0.0, fade.fade_out > 0.0) {
        (true, true) => format!(
            "if(lt(t,{s}+{fi}),(t-{s})/{fi},if(gt(t,{e}-{fo}),({e}-t)/{fo},1))"
        ),
        (true, false) => format!("if(lt(t,{s}+{fi}),(t-{s})/{fi},1)"),
        (false, true) => format!("if(gt(t,{e}-{fo}),({e}-t)/{fo},1)"),
        (false, false) => "1".to_string(),
    }
}

// ---------------------------------------------------------------------------
// FilterGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterNode {
    pub op: FilterOp,
    pub inputs: Vec<PadRef>,
    pub output: PadLabel,
}

/// Arena of filter nodes in emission order, plus the pads selected for
/// output. Index-addressed and serializable so builds stay shareable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterGraph {
    pub nodes: Vec<FilterNode>,
    /// Number of `-i` inputs the graph's stream pads may reference.
    pub input_count: usize,
    pub video_out: PadLabel,
    pub audio_out: Option<PadLabel>,
}

impl FilterGraph {
    pub fn new(input_count: usize) -> Self {
        Self {
            nodes: vec![],
            input_count,
            video_out: PadLabel(String::new()),
            audio_out: None,
        }
    }

    /// Append a node and return a reference to its output pad.
    pub fn push(&mut self, op: FilterOp, inputs: Vec<PadRef>, output: PadLabel) -> PadRef {
        let pad = PadRef::Node(output.clone());
        self.nodes.push(FilterNode { op, inputs, output });
        pad
    }

    /// Linearize to the single textual graph description the tool consumes.
    pub fn render(&self) -> String {
        self.nodes
            .iter()
            .map(|node| {
                let inputs: String = node.inputs.iter().map(|p| p.to_string()).collect();
                format!("{inputs}{}[{}]", node.op.render(), node.output)
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
