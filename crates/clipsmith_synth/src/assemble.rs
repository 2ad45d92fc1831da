use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::encoder::EncoderSettings;
use crate::security::ClearedInputs;
use crate::strategy::{ConcatList, RenderPlan};

/// The engine's sole externally visible artifact: discrete argument tokens,
/// the resolved output path, and (fast-copy only) the concat-list sidecar
/// the caller writes before execution. Owns no resources; it is either
/// executed by the caller or discarded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub args: Vec<String>,
    pub output_path: PathBuf,
    pub concat_list: Option<ConcatList>,
}

impl Command {
    /// Full argument vector, output path last.
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = self.args.clone();
        argv.push(self.output_path.to_string_lossy().into_owned());
        argv
    }
}

/// Linearize a hardened plan into the final token list, in fixed order:
/// global flags, inputs, filter graph, stream maps, encoder flags, output.
/// All validity is guaranteed by the earlier stages; this function only
/// arranges tokens.
pub fn assemble(
    plan: &RenderPlan,
    settings: &EncoderSettings,
    cleared: &ClearedInputs,
    overwrite: bool,
    log_level: &str,
) -> Command {
    let mut args = vec![
        if overwrite { "-y" } else { "-n" }.to_string(),
        "-loglevel".to_string(),
        log_level.to_string(),
    ];

    match plan {
        RenderPlan::FastCopy { .. } => {
            let list_path = cleared.output.with_extension("inputs.txt");
            let list = ConcatList::from_paths(list_path, &cleared.inputs);

            args.push("-f".to_string());
            args.push("concat".to_string());
            args.push("-safe".to_string());
            args.push("0".to_string());
            args.push("-i".to_string());
            args.push(list.path.to_string_lossy().into_owned());
            args.push("-map".to_string());
            args.push("0".to_string());
            args.push("-c".to_string());
            args.push("copy".to_string());

            Command {
                args,
                output_path: cleared.output.clone(),
                concat_list: Some(list),
            }
        }
        RenderPlan::Graph { graph, .. } => {
            for input in &cleared.inputs {
                args.push("-i".to_string());
                args.push(input.clone());
            }

            args.push("-filter_complex".to_string());
            args.push(graph.render());

            args.push("-map".to_string());
            args.push(format!("[{}]", graph.video_out));
            if let Some(audio_out) = &graph.audio_out {
                args.push("-map".to_string());
                args.push(format!("[{audio_out}]"));
            }

            args.extend(settings.to_args());

            Command {
                args,
                output_path: cleared.output.clone(),
                concat_list: None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{build_settings, EncoderOptions};
    use crate::graph::{FilterGraph, FilterOp, PadLabel, PadRef};
    use clipsmith_core::types::{SourceRef, StreamKind};

    fn settings() -> EncoderSettings {
        build_settings(&EncoderOptions::default()).unwrap()
    }

    fn cleared(inputs: &[&str]) -> ClearedInputs {
        ClearedInputs {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            output: PathBuf::from("/srv/sandbox/out.mp4"),
        }
    }

    fn small_graph() -> FilterGraph {
        let mut graph = FilterGraph::new(1);
        graph.push(
            FilterOp::Trim { start: 0.0, end: 4.0 },
            vec![PadRef::Stream {
                input: 0,
                kind: StreamKind::Video,
            }],
            PadLabel("v0".into()),
        );
        graph.video_out = PadLabel("v0".into());
        graph
    }

    #[test]
    fn fast_copy_command_shape() {
        let plan = RenderPlan::FastCopy {
            clips: vec![SourceRef::new("/srv/sandbox/a.mp4")],
        };
        let command = assemble(
            &plan,
            &settings(),
            &cleared(&["/srv/sandbox/a.mp4", "/srv/sandbox/b.mp4"]),
            true,
            "error",
        );

        assert_eq!(
            command.args,
            vec![
                "-y",
                "-loglevel",
                "error",
                "-f",
                "concat",
                "-safe",
                "0",
                "-i",
                "/srv/sandbox/out.inputs.txt",
                "-map",
                "0",
                "-c",
                "copy",
            ]
        );
        let list = command.concat_list.as_ref().unwrap();
        assert_eq!(
            list.contents,
            "file '/srv/sandbox/a.mp4'\nfile '/srv/sandbox/b.mp4'\n"
        );
        assert!(!command.args.contains(&"-filter_complex".to_string()));
        assert_eq!(
            command.to_argv().last().unwrap(),
            "/srv/sandbox/out.mp4"
        );
    }

    #[test]
    fn graph_command_shape() {
        let plan = RenderPlan::Graph {
            graph: small_graph(),
            inputs: vec![SourceRef::new("/srv/sandbox/a.mp4")],
        };
        let command = assemble(&plan, &settings(), &cleared(&["/srv/sandbox/a.mp4"]), true, "error");
        let argv = command.to_argv();

        let filter_pos = argv.iter().position(|a| a == "-filter_complex").unwrap();
        let input_pos = argv.iter().position(|a| a == "-i").unwrap();
        let map_pos = argv.iter().position(|a| a == "-map").unwrap();
        let codec_pos = argv.iter().position(|a| a == "-c:v").unwrap();

        assert!(input_pos < filter_pos);
        assert!(filter_pos < map_pos);
        assert!(map_pos < codec_pos);
        assert_eq!(argv[map_pos + 1], "[v0]");
        assert_eq!(argv.last().unwrap(), "/srv/sandbox/out.mp4");
        assert!(command.concat_list.is_none());
    }

    #[test]
    fn overwrite_policy_token() {
        let plan = RenderPlan::Graph {
            graph: small_graph(),
            inputs: vec![SourceRef::new("/srv/sandbox/a.mp4")],
        };
        let keep = assemble(&plan, &settings(), &cleared(&["/srv/sandbox/a.mp4"]), false, "info");
        assert_eq!(keep.args[0], "-n");
        assert_eq!(keep.args[2], "info");
    }

    #[test]
    fn assembly_is_deterministic() {
        let plan = RenderPlan::Graph {
            graph: small_graph(),
            inputs: vec![SourceRef::new("/srv/sandbox/a.mp4")],
        };
        let a = assemble(&plan, &settings(), &cleared(&["/srv/sandbox/a.mp4"]), true, "error");
        let b = assemble(&plan, &settings(), &cleared(&["/srv/sandbox/a.mp4"]), true, "error");
        assert_eq!(a, b);
    }
}
