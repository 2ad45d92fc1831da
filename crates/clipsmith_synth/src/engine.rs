use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use clipsmith_core::types::{Composition, MediaInfo, SourceRef, TimeUs};

use crate::assemble::{self, Command};
use crate::builder;
use crate::encoder::{self, EncoderOptions};
use crate::error::{Result, SynthError};
use crate::probe::{InputResolver, Prober};
use crate::security;
use crate::strategy::{self, RenderPlan, Strategy};
use crate::validate;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine-wide limits and policies. One instance serves arbitrarily many
/// concurrent builds; nothing here mutates during a build.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory no resolved path may escape.
    pub sandbox_root: PathBuf,
    pub max_duration: TimeUs,
    /// Schemes remote sources may use.
    pub allowed_transports: Vec<String>,
    pub overwrite: bool,
    pub log_level: String,
}

impl EngineConfig {
    pub fn new(sandbox_root: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
            max_duration: TimeUs::from_seconds(3600.0),
            allowed_transports: vec!["https".to_string()],
            overwrite: true,
            log_level: "error".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Build stages
// ---------------------------------------------------------------------------

/// Pipeline position, for diagnostics. Every stage may transition straight
/// to failure; none retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    CollectingInputs,
    GraphBuilt,
    StructurallyValid,
    SecurityCleared,
    Assembled,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildStage::CollectingInputs => "COLLECTING_INPUTS",
            BuildStage::GraphBuilt => "GRAPH_BUILT",
            BuildStage::StructurallyValid => "STRUCTURALLY_VALID",
            BuildStage::SecurityCleared => "SECURITY_CLEARED",
            BuildStage::Assembled => "ASSEMBLED",
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The synthesis pipeline front door. A build is a pure function of
/// (composition, resolved media, options); the engine holds no per-build
/// state and acquires no external resources.
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve every unique source once. Exposed separately so callers can
    /// pre-warm metadata; `build` performs the same resolution itself.
    pub fn resolve(
        &self,
        composition: &Composition,
        prober: &mut dyn Prober,
    ) -> Result<HashMap<SourceRef, MediaInfo>> {
        InputResolver::new(prober).resolve(&composition.sources())
    }

    /// Run the full pipeline and return the validated argument vector.
    pub fn build(
        &self,
        composition: &Composition,
        options: &EncoderOptions,
        output_path: &Path,
        prober: &mut dyn Prober,
    ) -> Result<Command> {
        match self.build_inner(composition, options, output_path, prober) {
            Ok(command) => {
                tracing::debug!(stage = %BuildStage::Assembled, "command synthesized");
                Ok(command)
            }
            Err(err) => {
                tracing::warn!("build failed: {err}");
                Err(err)
            }
        }
    }

    fn build_inner(
        &self,
        composition: &Composition,
        options: &EncoderOptions,
        output_path: &Path,
        prober: &mut dyn Prober,
    ) -> Result<Command> {
        // Duration ceiling comes from the declaration alone; enforce it
        // before probing or any graph work.
        let total = composition.total_duration();
        if total > self.config.max_duration {
            return Err(SynthError::DurationExceeded {
                total,
                max: self.config.max_duration,
            });
        }

        tracing::debug!(stage = %BuildStage::CollectingInputs, "resolving sources");
        let media = self.resolve(composition, prober)?;

        let settings = encoder::build_settings(options)?;

        let plan = match strategy::select(composition, &media) {
            Strategy::FastCopy => {
                tracing::debug!("fast-copy path selected");
                RenderPlan::FastCopy {
                    clips: composition
                        .tracks
                        .iter()
                        .flat_map(|t| t.clips.iter())
                        .map(|c| c.source.clone())
                        .collect(),
                }
            }
            Strategy::FilterGraph => {
                let (graph, inputs) = builder::build(composition, &media)?;
                tracing::debug!(stage = %BuildStage::GraphBuilt, "graph compiled");

                let report = validate::validate(&graph);
                if !report.is_ok() {
                    return Err(SynthError::Validation(report));
                }
                tracing::debug!(stage = %BuildStage::StructurallyValid, "graph validated");

                RenderPlan::Graph { graph, inputs }
            }
        };

        let cleared = security::harden(
            &plan,
            &self.config.sandbox_root,
            &self.config.allowed_transports,
            output_path,
        )?;
        tracing::debug!(stage = %BuildStage::SecurityCleared, "inputs hardened");

        let command = assemble::assemble(
            &plan,
            &settings,
            &cleared,
            self.config.overwrite,
            &self.config.log_level,
        );
        security::audit_tokens(&command.to_argv())?;

        Ok(command)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::StaticProber;
    use clipsmith_core::composition::canvas_1080p;
    use clipsmith_core::types::{Clip, StreamInfo, Transition, TransitionKind};

    fn media_for(source: &SourceRef, duration_s: f64) -> MediaInfo {
        MediaInfo {
            source: source.clone(),
            duration: TimeUs::from_seconds(duration_s),
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
        }
    }

    fn fixture() -> (Engine, Composition, StaticProber) {
        let src_a = SourceRef::new("/srv/sandbox/a.mp4");
        let src_b = SourceRef::new("/srv/sandbox/b.mp4");

        let mut comp = Composition::new("job", canvas_1080p());
        let track_id = comp.add_track();
        comp.add_clip(
            track_id,
            Clip::new(src_a.clone(), TimeUs::ZERO, TimeUs::from_seconds(4.0), TimeUs::ZERO),
        )
        .unwrap();
        comp.add_clip(
            track_id,
            Clip::new(
                src_b.clone(),
                TimeUs::ZERO,
                TimeUs::from_seconds(6.0),
                TimeUs::from_seconds(4.0),
            ),
        )
        .unwrap();

        let prober = StaticProber::new()
            .with(media_for(&src_a, 4.0))
            .with(media_for(&src_b, 6.0));
        let engine = Engine::new(EngineConfig::new("/srv/sandbox"));
        (engine, comp, prober)
    }

    #[test]
    fn fast_copy_build_produces_concat_command() {
        let (engine, comp, mut prober) = fixture();
        let command = engine
            .build(
                &comp,
                &EncoderOptions::default(),
                Path::new("/srv/sandbox/out.mp4"),
                &mut prober,
            )
            .unwrap();
        assert!(command.concat_list.is_some());
        assert!(command.args.contains(&"copy".to_string()));
    }

    #[test]
    fn transition_build_produces_graph_command() {
        let (engine, mut comp, mut prober) = fixture();
        let track_id = comp.tracks[0].id;
        comp.add_transition(
            track_id,
            Transition::new(TransitionKind::Crossfade, TimeUs::from_seconds(1.0), 0),
        )
        .unwrap();

        let command = engine
            .build(
                &comp,
                &EncoderOptions::default(),
                Path::new("/srv/sandbox/out.mp4"),
                &mut prober,
            )
            .unwrap();
        assert!(command.concat_list.is_none());
        let filter = command
            .args
            .iter()
            .position(|a| a == "-filter_complex")
            .unwrap();
        assert!(command.args[filter + 1].contains("xfade="));
    }

    #[test]
    fn duration_ceiling_fails_before_probing() {
        struct PanickingProber;
        impl Prober for PanickingProber {
            fn probe(
                &mut self,
                _: &SourceRef,
            ) -> std::result::Result<MediaInfo, crate::probe::ProbeError> {
                panic!("probed despite duration ceiling");
            }
        }

        let (_, comp, _) = fixture();
        let mut config = EngineConfig::new("/srv/sandbox");
        config.max_duration = TimeUs::from_seconds(5.0);
        let engine = Engine::new(config);

        let result = engine.build(
            &comp,
            &EncoderOptions::default(),
            Path::new("/srv/sandbox/out.mp4"),
            &mut PanickingProber,
        );
        assert!(matches!(result, Err(SynthError::DurationExceeded { .. })));
    }

    #[test]
    fn traversal_source_fails_security() {
        let (engine, mut comp, _) = fixture();
        let escape = SourceRef::new("../../secret.mp4");
        comp.tracks[0].clips[0].source = escape.clone();

        let mut prober = StaticProber::new()
            .with(media_for(&escape, 4.0))
            .with(media_for(&SourceRef::new("/srv/sandbox/b.mp4"), 6.0));
        let result = engine.build(
            &comp,
            &EncoderOptions::default(),
            Path::new("/srv/sandbox/out.mp4"),
            &mut prober,
        );
        assert!(matches!(result, Err(SynthError::Security(_))));
    }

    #[test]
    fn output_outside_sandbox_fails_security() {
        let (engine, comp, mut prober) = fixture();
        let result = engine.build(
            &comp,
            &EncoderOptions::default(),
            Path::new("/tmp/elsewhere.mp4"),
            &mut prober,
        );
        assert!(matches!(result, Err(SynthError::Security(_))));
    }

    #[test]
    fn unresolved_sources_are_batched() {
        let (engine, comp, _) = fixture();
        let mut prober = StaticProber::new();
        let result = engine.build(
            &comp,
            &EncoderOptions::default(),
            Path::new("/srv/sandbox/out.mp4"),
            &mut prober,
        );
        match result {
            Err(SynthError::InputResolution(failures)) => assert_eq!(failures.len(), 2),
            other => panic!("expected InputResolution, got {other:?}"),
        }
    }

    #[test]
    fn repeated_builds_are_byte_identical() {
        let (engine, mut comp, mut prober) = fixture();
        let track_id = comp.tracks[0].id;
        comp.add_transition(
            track_id,
            Transition::new(TransitionKind::WipeRight, TimeUs::from_seconds(0.5), 0),
        )
        .unwrap();

        let output = Path::new("/srv/sandbox/out.mp4");
        let first = engine
            .build(&comp, &EncoderOptions::default(), output, &mut prober)
            .unwrap();
        let second = engine
            .build(&comp, &EncoderOptions::default(), output, &mut prober)
            .unwrap();
        assert_eq!(first.to_argv(), second.to_argv());
    }
}
