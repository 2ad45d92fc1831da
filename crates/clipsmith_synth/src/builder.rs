use std::collections::HashMap;

use clipsmith_core::types::{
    Anchor, AudioLayer, Canvas, Clip, Composition, MediaInfo, Position, ScaleMode, SourceRef,
    StreamInfo, StreamKind, TextOverlay, TimeUs, Track, TransitionKind,
};

use crate::error::{Result, SynthError};
use crate::graph::{
    DrawTextParams, FadeWindow, FilterGraph, FilterOp, LabelGen, PadRef, TextCoord,
};

/// One partially assembled stretch of output: its video pad, its audio pad
/// when every contributing source carries audio, and its length in seconds.
struct Segment {
    video: PadRef,
    audio: Option<PadRef>,
    len: f64,
}

struct BuildCtx<'a> {
    graph: FilterGraph,
    labels: LabelGen,
    index: HashMap<SourceRef, usize>,
    media: &'a HashMap<SourceRef, MediaInfo>,
    canvas: &'a Canvas,
    include_audio: bool,
}

/// Compile a composition into a filter graph plus its input list in pad
/// order. The caller has already resolved all media and enforced the
/// duration ceiling.
pub fn build(
    composition: &Composition,
    media: &HashMap<SourceRef, MediaInfo>,
) -> Result<(FilterGraph, Vec<SourceRef>)> {
    let clip_count: usize = composition.tracks.iter().map(|t| t.clips.len()).sum();
    if clip_count == 0 {
        return Err(SynthError::InvalidTimeline(
            "composition has no clips".to_string(),
        ));
    }

    check_timeline(composition, media)?;

    let inputs = composition.sources();
    let include_audio = composition
        .tracks
        .iter()
        .flat_map(|t| t.clips.iter())
        .all(|c| media[&c.source].has_audio());

    let mut ctx = BuildCtx {
        graph: FilterGraph::new(inputs.len()),
        labels: LabelGen::new(),
        index: inputs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect(),
        media,
        canvas: &composition.canvas,
        include_audio,
    };

    let mut track_segments = Vec::new();
    for track in composition.tracks.iter().filter(|t| !t.clips.is_empty()) {
        track_segments.push(ctx.build_track(track)?);
    }
    let joined = ctx.join_sequential(track_segments);

    let video = ctx.apply_overlays(joined.video, &composition.overlays);
    let audio = ctx.mix_audio_layers(joined.audio, &composition.audio_layers)?;

    let (graph, node_count) = ctx.finish(video, audio)?;
    tracing::debug!(
        nodes = node_count,
        inputs = inputs.len(),
        "filter graph built"
    );
    Ok((graph, inputs))
}

impl BuildCtx<'_> {
    fn push(&mut self, kind: StreamKind, op: FilterOp, inputs: Vec<PadRef>) -> PadRef {
        let label = self.labels.next(kind);
        self.graph.push(op, inputs, label)
    }

    fn build_track(&mut self, track: &Track) -> Result<Segment> {
        let mut segments = Vec::with_capacity(track.clips.len());
        for clip in &track.clips {
            segments.push(self.build_clip(clip)?);
        }

        let mut iter = segments.into_iter();
        let mut current = iter.next().expect("track has clips");
        for (boundary, next) in iter.enumerate() {
            let transition = track
                .transition_after(boundary)
                .filter(|t| t.kind != TransitionKind::Cut);
            current = match transition {
                Some(t) => self.join_transition(current, next, t.kind, t.duration.as_seconds()),
                None => self.join_concat(vec![current, next]),
            };
        }
        Ok(current)
    }

    fn build_clip(&mut self, clip: &Clip) -> Result<Segment> {
        let input = self.index[&clip.source];
        let info = &self.media[&clip.source];
        let start = clip.source_in.as_seconds();
        let end = clip.source_out.as_seconds();

        let mut video = PadRef::Stream {
            input,
            kind: StreamKind::Video,
        };
        video = self.push(StreamKind::Video, FilterOp::Trim { start, end }, vec![video]);
        video = self.push(
            StreamKind::Video,
            FilterOp::SetPts { speed: clip.speed },
            vec![video],
        );
        video = self.normalize_frame(video, clip, info);
        video = self.push(StreamKind::Video, FilterOp::SetSar, vec![video]);
        video = self.push(
            StreamKind::Video,
            FilterOp::Fps {
                fps: self.canvas.fps,
            },
            vec![video],
        );

        let audio = if self.include_audio {
            let mut audio = PadRef::Stream {
                input,
                kind: StreamKind::Audio,
            };
            audio = self.push(StreamKind::Audio, FilterOp::ATrim { start, end }, vec![audio]);
            audio = self.push(StreamKind::Audio, FilterOp::ASetPts, vec![audio]);
            if (clip.speed - 1.0).abs() > f64::EPSILON {
                audio = self.push(
                    StreamKind::Audio,
                    FilterOp::Atempo { factor: clip.speed },
                    vec![audio],
                );
            }
            audio = self.push(
                StreamKind::Audio,
                FilterOp::AResample {
                    sample_rate: self.canvas.sample_rate,
                },
                vec![audio],
            );
            Some(audio)
        } else {
            None
        };

        Ok(Segment {
            video,
            audio,
            len: clip.display_len().as_seconds(),
        })
    }

    /// Rescale toward the canvas. `ScaleMode::None` still normalizes when
    /// the source dimensions disagree with the canvas, so every concat and
    /// xfade input shares one geometry.
    fn normalize_frame(&mut self, video: PadRef, clip: &Clip, info: &MediaInfo) -> PadRef {
        let (width, height) = (self.canvas.width, self.canvas.height);
        let matches_canvas = match info.video() {
            Some(StreamInfo::Video {
                width: sw,
                height: sh,
                ..
            }) => *sw == width && *sh == height,
            _ => false,
        };

        match clip.scale_mode {
            ScaleMode::None | ScaleMode::Fit if matches_canvas => video,
            ScaleMode::None | ScaleMode::Fit => {
                let scaled = self.push(
                    StreamKind::Video,
                    FilterOp::ScaleFit { width, height },
                    vec![video],
                );
                self.push(StreamKind::Video, FilterOp::Pad { width, height }, vec![scaled])
            }
            ScaleMode::Fill if matches_canvas => video,
            ScaleMode::Fill => {
                let scaled = self.push(
                    StreamKind::Video,
                    FilterOp::ScaleCover { width, height },
                    vec![video],
                );
                self.push(StreamKind::Video, FilterOp::Crop { width, height }, vec![scaled])
            }
            ScaleMode::Stretch if matches_canvas => video,
            ScaleMode::Stretch => {
                self.push(StreamKind::Video, FilterOp::Scale { width, height }, vec![video])
            }
        }
    }

    /// Blend two segments at their boundary. The transition consumes its
    /// duration from both neighbors: offset is the left segment's length
    /// minus the duration, and the joined length shrinks by the duration.
    fn join_transition(
        &mut self,
        left: Segment,
        right: Segment,
        kind: TransitionKind,
        duration: f64,
    ) -> Segment {
        let offset = left.len - duration;
        let video = self.push(
            StreamKind::Video,
            FilterOp::Xfade {
                kind,
                duration,
                offset,
            },
            vec![left.video, right.video],
        );
        let audio = match (left.audio, right.audio) {
            (Some(a), Some(b)) => Some(self.push(
                StreamKind::Audio,
                FilterOp::ACrossfade { duration },
                vec![a, b],
            )),
            _ => None,
        };
        Segment {
            video,
            audio,
            len: left.len + right.len - duration,
        }
    }

    fn join_concat(&mut self, segments: Vec<Segment>) -> Segment {
        debug_assert!(segments.len() > 1);
        let n = segments.len();
        let len = segments.iter().map(|s| s.len).sum();
        let all_audio = segments.iter().all(|s| s.audio.is_some());

        let video = self.push(
            StreamKind::Video,
            FilterOp::Concat {
                n,
                video: true,
                audio: false,
            },
            segments.iter().map(|s| s.video.clone()).collect(),
        );
        let audio = if all_audio {
            Some(self.push(
                StreamKind::Audio,
                FilterOp::Concat {
                    n,
                    video: false,
                    audio: true,
                },
                segments.into_iter().map(|s| s.audio.unwrap()).collect(),
            ))
        } else {
            None
        };
        Segment { video, audio, len }
    }

    fn join_sequential(&mut self, mut segments: Vec<Segment>) -> Segment {
        if segments.len() == 1 {
            return segments.pop().expect("one segment");
        }
        self.join_concat(segments)
    }

    fn apply_overlays(&mut self, mut video: PadRef, overlays: &[TextOverlay]) -> PadRef {
        for overlay in overlays {
            let (x, y) = position_coords(&overlay.position);
            let start = overlay.start.as_seconds();
            let end = overlay.end().as_seconds();
            let params = DrawTextParams {
                text: overlay.text.clone(),
                font_file: overlay
                    .style
                    .font_file
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
                font_size: overlay.style.size,
                color: overlay
                    .style
                    .color
                    .strip_prefix('#')
                    .unwrap_or(&overlay.style.color)
                    .to_string(),
                x,
                y,
                enable: (start, end),
                fade: overlay.fade.map(|f| FadeWindow {
                    start,
                    end,
                    fade_in: f.fade_in.as_seconds(),
                    fade_out: f.fade_out.as_seconds(),
                }),
            };
            video = self.push(StreamKind::Video, FilterOp::DrawText(params), vec![video]);
        }
        video
    }

    fn mix_audio_layers(
        &mut self,
        base: Option<PadRef>,
        layers: &[AudioLayer],
    ) -> Result<Option<PadRef>> {
        let mut pads = Vec::with_capacity(layers.len());
        for layer in layers {
            let info = &self.media[&layer.source];
            if !info.has_audio() {
                return Err(SynthError::InvalidTimeline(format!(
                    "audio layer source {} has no audio stream",
                    layer.source
                )));
            }
            let input = self.index[&layer.source];
            let duration = layer.duration.as_seconds();

            let mut pad = PadRef::Stream {
                input,
                kind: StreamKind::Audio,
            };
            pad = self.push(
                StreamKind::Audio,
                FilterOp::ATrim {
                    start: 0.0,
                    end: duration,
                },
                vec![pad],
            );
            pad = self.push(StreamKind::Audio, FilterOp::ASetPts, vec![pad]);
            pad = self.push(
                StreamKind::Audio,
                FilterOp::Volume { gain: layer.gain },
                vec![pad],
            );
            pad = self.push(
                StreamKind::Audio,
                FilterOp::AFadeIn { duration: 0.1 },
                vec![pad],
            );
            pad = self.push(
                StreamKind::Audio,
                FilterOp::AFadeOut {
                    start: (duration - 0.1).max(0.0),
                    duration: 0.1,
                },
                vec![pad],
            );
            pad = self.push(
                StreamKind::Audio,
                FilterOp::ADelay {
                    ms: layer.offset.as_millis(),
                },
                vec![pad],
            );
            pads.push(pad);
        }

        Ok(match (base, pads.len()) {
            (base, 0) => base,
            (None, 1) => Some(pads.pop().expect("one layer")),
            (base, _) => {
                let mut inputs = Vec::new();
                if let Some(base) = base {
                    inputs.push(base);
                }
                inputs.extend(pads);
                Some(self.push(
                    StreamKind::Audio,
                    FilterOp::AMix {
                        inputs: inputs.len(),
                    },
                    inputs,
                ))
            }
        })
    }

    fn finish(self, video: PadRef, audio: Option<PadRef>) -> Result<(FilterGraph, usize)> {
        let mut graph = self.graph;
        let PadRef::Node(video_out) = video else {
            return Err(SynthError::InvalidTimeline(
                "composition produced no video chain".to_string(),
            ));
        };
        graph.video_out = video_out;
        graph.audio_out = audio.map(|pad| match pad {
            PadRef::Node(label) => label,
            PadRef::Stream { .. } => unreachable!("audio chains always end in a node"),
        });
        let nodes = graph.nodes.len();
        Ok((graph, nodes))
    }
}

fn position_coords(position: &Position) -> (TextCoord, TextCoord) {
    match position {
        Position::Absolute { x, y } => (TextCoord::Px(*x), TextCoord::Px(*y)),
        Position::Anchored(anchor) => {
            let (x, y) = match anchor {
                Anchor::TopLeft => ("20", "20"),
                Anchor::TopCenter => ("(w-text_w)/2", "20"),
                Anchor::TopRight => ("w-text_w-20", "20"),
                Anchor::CenterLeft => ("20", "(h-text_h)/2"),
                Anchor::Center => ("(w-text_w)/2", "(h-text_h)/2"),
                Anchor::CenterRight => ("w-text_w-20", "(h-text_h)/2"),
                Anchor::BottomLeft => ("20", "h-text_h-20"),
                Anchor::BottomCenter => ("(w-text_w)/2", "h-text_h-20"),
                Anchor::BottomRight => ("w-text_w-20", "h-text_h-20"),
            };
            (TextCoord::Expr(x.to_string()), TextCoord::Expr(y.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Timeline checks
// ---------------------------------------------------------------------------

fn check_timeline(composition: &Composition, media: &HashMap<SourceRef, MediaInfo>) -> Result<()> {
    let total = composition.total_duration();

    for track in &composition.tracks {
        for clip in &track.clips {
            let info = media.get(&clip.source).ok_or_else(|| {
                SynthError::InvalidTimeline(format!("source {} was not resolved", clip.source))
            })?;
            if !info.has_video() {
                return Err(SynthError::InvalidTimeline(format!(
                    "clip source {} has no video stream",
                    clip.source
                )));
            }
            if clip.source_in < TimeUs::ZERO
                || clip.source_in >= clip.source_out
            {
                return Err(SynthError::InvalidTimeline(format!(
                    "clip {} has an empty or negative trim window",
                    clip.id
                )));
            }
            if clip.source_out > info.duration {
                return Err(SynthError::InvalidTimeline(format!(
                    "clip {} trim window ends at {} but source {} lasts {}",
                    clip.id, clip.source_out, clip.source, info.duration
                )));
            }
            if clip.speed <= 0.0 || !clip.speed.is_finite() {
                return Err(SynthError::InvalidTimeline(format!(
                    "clip {} speed factor {} is not positive",
                    clip.id, clip.speed
                )));
            }
        }

        let mut transitions: Vec<_> = track.transitions.iter().collect();
        transitions.sort_by_key(|t| t.after_clip);
        for transition in &transitions {
            if transition.after_clip + 1 >= track.clips.len() {
                return Err(SynthError::InvalidTimeline(format!(
                    "transition boundary {} has no following clip",
                    transition.after_clip
                )));
            }
            let left = track.clips[transition.after_clip].display_len();
            let right = track.clips[transition.after_clip + 1].display_len();
            if transition.consumed() > left.min(right) {
                return Err(SynthError::InvalidTimeline(format!(
                    "transition at boundary {} lasts {} but its shorter neighbor is {}",
                    transition.after_clip,
                    transition.duration,
                    left.min(right)
                )));
            }
        }
        for pair in transitions.windows(2) {
            if pair[0].after_clip == pair[1].after_clip {
                return Err(SynthError::InvalidTimeline(format!(
                    "boundary {} carries two transitions",
                    pair[0].after_clip
                )));
            }
            // Adjacent boundaries share the middle clip; their windows may
            // not overlap inside it.
            if pair[1].after_clip == pair[0].after_clip + 1 {
                let middle = track.clips[pair[1].after_clip].display_len();
                if pair[0].consumed() + pair[1].consumed() > middle {
                    return Err(SynthError::InvalidTimeline(format!(
                        "transition windows at boundaries {} and {} overlap in time",
                        pair[0].after_clip, pair[1].after_clip
                    )));
                }
            }
        }
    }

    for overlay in &composition.overlays {
        if overlay.start < TimeUs::ZERO || overlay.end() > total {
            return Err(SynthError::InvalidTimeline(format!(
                "overlay {:?} window [{}, {}) falls outside the timeline",
                overlay.text,
                overlay.start,
                overlay.end()
            )));
        }
    }

    for layer in &composition.audio_layers {
        let info = media.get(&layer.source).ok_or_else(|| {
            SynthError::InvalidTimeline(format!("source {} was not resolved", layer.source))
        })?;
        if layer.duration > info.duration {
            return Err(SynthError::InvalidTimeline(format!(
                "audio layer wants {} from source {} lasting {}",
                layer.duration, layer.source, info.duration
            )));
        }
        if layer.offset < TimeUs::ZERO || layer.end() > total {
            return Err(SynthError::InvalidTimeline(format!(
                "audio layer window [{}, {}) falls outside the timeline",
                layer.offset,
                layer.end()
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
