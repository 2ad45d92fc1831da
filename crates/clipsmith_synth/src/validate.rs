use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

use crate::graph::{FilterGraph, FilterOp, PadLabel, PadRef, TextCoord};

const MAX_SECONDS: f64 = 86_400.0;

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum StructuralViolation {
    #[error("pad label {label} produced more than once")]
    DuplicatePadLabel { label: String },

    #[error("node {node} reads pad {pad} before any node produces it")]
    UndefinedPad { node: usize, pad: String },

    #[error("node {node} reads input stream {index} but only {count} inputs exist")]
    InputIndexOutOfRange {
        node: usize,
        index: usize,
        count: usize,
    },

    #[error("declared input {index} is never referenced")]
    UnreferencedInput { index: usize },

    #[error("selected video output pad {label} is not produced by any node")]
    MissingVideoOutput { label: String },

    #[error("selected audio output pad {label} is not produced by any node")]
    MissingAudioOutput { label: String },

    #[error("node {node}: {detail}")]
    ParameterOutOfRange { node: usize, detail: String },
}

/// Every violation found, in check order. Batch-reported: the caller sees
/// all findings in one pass, like a parser reporting every syntax error.
#[derive(Debug, Default, PartialEq)]
pub struct ValidationReport {
    pub violations: Vec<StructuralViolation>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "structural validation failed with {} violation(s): ",
            self.violations.len()
        )?;
        let items: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        f.write_str(&items.join("; "))
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Static consistency check over a built graph. Order: pad uniqueness,
/// topological producedness, input coverage, output selection, numeric
/// bounds. A graph with any violation never reaches security hardening.
pub fn validate(graph: &FilterGraph) -> ValidationReport {
    let mut report = ValidationReport::default();

    check_pad_uniqueness(graph, &mut report);
    check_topology(graph, &mut report);
    check_input_coverage(graph, &mut report);
    check_outputs(graph, &mut report);
    check_bounds(graph, &mut report);

    report
}

fn check_pad_uniqueness(graph: &FilterGraph, report: &mut ValidationReport) {
    let mut seen: HashSet<&PadLabel> = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(&node.output) {
            report.violations.push(StructuralViolation::DuplicatePadLabel {
                label: node.output.to_string(),
            });
        }
    }
}

/// Emission order is the topological order: every referenced pad must have
/// been produced by an earlier node. This also excludes cycles, which would
/// need a forward reference somewhere.
fn check_topology(graph: &FilterGraph, report: &mut ValidationReport) {
    let mut produced: HashSet<&PadLabel> = HashSet::new();
    for (i, node) in graph.nodes.iter().enumerate() {
        for input in &node.inputs {
            match input {
                PadRef::Node(label) => {
                    if !produced.contains(label) {
                        report.violations.push(StructuralViolation::UndefinedPad {
                            node: i,
                            pad: label.to_string(),
                        });
                    }
                }
                PadRef::Stream { input: index, .. } => {
                    if *index >= graph.input_count {
                        report
                            .violations
                            .push(StructuralViolation::InputIndexOutOfRange {
                                node: i,
                                index: *index,
                                count: graph.input_count,
                            });
                    }
                }
            }
        }
        produced.insert(&node.output);
    }
}

fn check_input_coverage(graph: &FilterGraph, report: &mut ValidationReport) {
    let mut referenced: HashSet<usize> = HashSet::new();
    for node in &graph.nodes {
        for input in &node.inputs {
            if let PadRef::Stream { input: index, .. } = input {
                referenced.insert(*index);
            }
        }
    }
    for index in 0..graph.input_count {
        if !referenced.contains(&index) {
            report
                .violations
                .push(StructuralViolation::UnreferencedInput { index });
        }
    }
}

fn check_outputs(graph: &FilterGraph, report: &mut ValidationReport) {
    let produced: HashSet<&PadLabel> = graph.nodes.iter().map(|n| &n.output).collect();
    if !produced.contains(&graph.video_out) {
        report.violations.push(StructuralViolation::MissingVideoOutput {
            label: graph.video_out.to_string(),
        });
    }
    if let Some(audio_out) = &graph.audio_out {
        if !produced.contains(audio_out) {
            report.violations.push(StructuralViolation::MissingAudioOutput {
                label: audio_out.to_string(),
            });
        }
    }
}

fn check_bounds(graph: &FilterGraph, report: &mut ValidationReport) {
    for (i, node) in graph.nodes.iter().enumerate() {
        let mut flag = |detail: String| {
            report
                .violations
                .push(StructuralViolation::ParameterOutOfRange { node: i, detail });
        };

        match &node.op {
            FilterOp::Trim { start, end } | FilterOp::ATrim { start, end } => {
                if !(0.0..=MAX_SECONDS).contains(start) || *end <= *start || *end > MAX_SECONDS {
                    flag(format!("trim window [{start}, {end}) out of bounds"));
                }
            }
            FilterOp::SetPts { speed } => {
                if !(0.1..=100.0).contains(speed) {
                    flag(format!("setpts speed {speed} out of range 0.1..=100"));
                }
            }
            FilterOp::Scale { width, height }
            | FilterOp::ScaleFit { width, height }
            | FilterOp::ScaleCover { width, height }
            | FilterOp::Pad { width, height }
            | FilterOp::Crop { width, height } => {
                if !(16..=8192).contains(width) || !(16..=8192).contains(height) {
                    flag(format!("dimensions {width}x{height} out of range 16..=8192"));
                }
            }
            FilterOp::SetSar => {}
            FilterOp::Fps { fps } => {
                if !(1.0..=240.0).contains(fps) {
                    flag(format!("frame rate {fps} out of range 1..=240"));
                }
            }
            FilterOp::ASetPts => {}
            FilterOp::Atempo { factor } => {
                if !(0.5..=2.0).contains(factor) {
                    flag(format!("atempo factor {factor} out of range 0.5..=2"));
                }
            }
            FilterOp::AResample { sample_rate } => {
                if !(8_000..=192_000).contains(sample_rate) {
                    flag(format!("sample rate {sample_rate} out of range"));
                }
            }
            FilterOp::Xfade {
                duration, offset, ..
            } => {
                if !(*duration > 0.0 && *duration <= 60.0) {
                    flag(format!("xfade duration {duration} out of range"));
                }
                if !(0.0..=MAX_SECONDS).contains(offset) {
                    flag(format!("xfade offset {offset} out of range"));
                }
            }
            FilterOp::ACrossfade { duration } => {
                if !(*duration > 0.0 && *duration <= 60.0) {
                    flag(format!("acrossfade duration {duration} out of range"));
                }
            }
            FilterOp::Concat { n, .. } => {
                if !(2..=64).contains(n) {
                    flag(format!("concat over {n} segments out of range 2..=64"));
                }
            }
            FilterOp::DrawText(params) => {
                if !(8..=512).contains(&params.font_size) {
                    flag(format!("font size {} out of range 8..=512", params.font_size));
                }
                for coord in [&params.x, &params.y] {
                    if let TextCoord::Px(v) = coord {
                        if v.abs() > 16_384 {
                            flag(format!("text coordinate {v} out of range"));
                        }
                    }
                }
                let (start, end) = params.enable;
                if !(0.0..=MAX_SECONDS).contains(&start) || end <= start || end > MAX_SECONDS {
                    flag(format!("enable window [{start}, {end}) out of bounds"));
                }
                if let Some(fade) = &params.fade {
                    if fade.fade_in < 0.0 || fade.fade_out < 0.0 {
                        flag("negative fade duration".to_string());
                    }
                }
            }
            FilterOp::Volume { gain } => {
                if !(0.0..=16.0).contains(gain) {
                    flag(format!("gain {gain} out of range 0..=16"));
                }
            }
            FilterOp::ADelay { ms } => {
                if !(0..=86_400_000).contains(ms) {
                    flag(format!("delay {ms}ms out of range"));
                }
            }
            FilterOp::AFadeIn { duration } => {
                if !(*duration > 0.0 && *duration <= 3_600.0) {
                    flag(format!("afade duration {duration} out of range"));
                }
            }
            FilterOp::AFadeOut { start, duration } => {
                if *start < 0.0 || !(*duration > 0.0 && *duration <= 3_600.0) {
                    flag(format!("afade window {start}+{duration} out of range"));
                }
            }
            FilterOp::AMix { inputs } => {
                if !(2..=64).contains(inputs) {
                    flag(format!("amix over {inputs} inputs out of range 2..=64"));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
