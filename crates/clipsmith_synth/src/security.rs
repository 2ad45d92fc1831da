use std::path::{Component, Path, PathBuf};

use clipsmith_core::types::SourceRef;
use thiserror::Error;

use crate::error::{Result, SynthError};
use crate::graph::{FilterGraph, FilterOp, TextCoord};
use crate::strategy::RenderPlan;

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecurityViolation {
    #[error("path escapes above the sandbox root: {path}")]
    PathTraversal { path: String },

    #[error("path {path} resolves outside sandbox root {root}")]
    PathOutsideSandbox { path: String, root: String },

    #[error("forbidden protocol handler in {reference}")]
    ForbiddenProtocol { reference: String },

    #[error("transport not allow-listed for remote source {url}")]
    TransportNotAllowed { url: String },

    #[error("escaped text failed round-trip verification: {text:?}")]
    EscapeRoundTrip { text: String },

    #[error("control character in filter text: {text:?}")]
    ControlCharacter { text: String },

    #[error("malformed {context} value: {value:?}")]
    MalformedValue { context: String, value: String },

    #[error("non-finite number in {context}")]
    NonFiniteNumber { context: String },

    #[error("forbidden token in command: {token}")]
    ForbiddenToken { token: String },
}

impl From<SecurityViolation> for SynthError {
    fn from(violation: SecurityViolation) -> Self {
        SynthError::Security(violation)
    }
}

// ---------------------------------------------------------------------------
// Filter-expression escaping
// ---------------------------------------------------------------------------

/// Escape free text for embedding in a filter option value.
///
/// Rule set, applied in one pass with backslash first so later characters
/// are never double-escaped: `\` `'` `:` `,` `;` `[` `]` each gain a
/// backslash prefix. The escaped form cannot terminate the enclosing
/// option, filter, or chain early.
pub fn escape_filter_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '\\' | '\'' | ':' | ',' | ';' | '[' | ']' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Inverse of [`escape_filter_text`]; used for round-trip verification.
pub fn unescape_filter_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Escape a path for a concat-list `file '<path>'` line: the demuxer's
/// quoting dance closes the quote, emits an escaped quote, and reopens.
pub fn escape_concat_path(path: &str) -> String {
    path.replace('\'', "'\\''")
}

fn verify_round_trip(text: &str) -> std::result::Result<(), SecurityViolation> {
    if text.chars().any(|c| (c as u32) < 0x20) {
        return Err(SecurityViolation::ControlCharacter {
            text: text.to_string(),
        });
    }
    let escaped = escape_filter_text(text);
    if unescape_filter_text(&escaped) != text {
        return Err(SecurityViolation::EscapeRoundTrip {
            text: text.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Path confinement
// ---------------------------------------------------------------------------

/// Normalize a path and require it to resolve inside `root`.
///
/// Normalization is lexical: `.` segments drop, `..` segments pop, and a
/// pop past the filesystem root is rejected outright. Symlink resolution
/// belongs to the storage collaborator, which only ever writes inside the
/// sandbox root.
pub fn confine_path(
    path: &Path,
    root: &Path,
) -> std::result::Result<PathBuf, SecurityViolation> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(SecurityViolation::PathTraversal {
                        path: path.display().to_string(),
                    });
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    if !normalized.starts_with(root) {
        return Err(SecurityViolation::PathOutsideSandbox {
            path: path.display().to_string(),
            root: root.display().to_string(),
        });
    }

    Ok(normalized)
}

// ---------------------------------------------------------------------------
// Denylists and allowlists
// ---------------------------------------------------------------------------

/// Flags that make the tool read or write files beyond its inputs.
pub const DENIED_FLAGS: &[&str] = &[
    "-filter_script",
    "-filter_complex_script",
    "-dump_attachment",
    "-passlogfile",
    "-report",
    "-vstats_file",
];

/// Protocol handlers that reach outside the sandbox.
pub const DENIED_PROTOCOLS: &[&str] = &[
    "file:", "pipe:", "concat:", "data:", "subfile:", "crypto:", "tcp:", "udp:", "unix:",
    "gopher:", "ftp:",
];

/// The fixed anchor-placement expressions the builder may emit.
pub const ANCHOR_EXPRS: &[&str] = &[
    "20",
    "(w-text_w)/2",
    "w-text_w-20",
    "(h-text_h)/2",
    "h-text_h-20",
];

fn check_source(
    source: &SourceRef,
    root: &Path,
    allowed_transports: &[String],
) -> std::result::Result<String, SecurityViolation> {
    let reference = source.as_str();
    let lower = reference.to_ascii_lowercase();

    for protocol in DENIED_PROTOCOLS {
        if lower.starts_with(protocol) {
            return Err(SecurityViolation::ForbiddenProtocol {
                reference: reference.to_string(),
            });
        }
    }

    if source.is_remote() {
        let scheme = lower.split("://").next().unwrap_or_default();
        if !allowed_transports.iter().any(|t| t == scheme) {
            return Err(SecurityViolation::TransportNotAllowed {
                url: reference.to_string(),
            });
        }
        return Ok(reference.to_string());
    }

    if reference.starts_with('-') {
        return Err(SecurityViolation::ForbiddenToken {
            token: reference.to_string(),
        });
    }

    let confined = confine_path(Path::new(reference), root)?;
    Ok(confined.to_string_lossy().into_owned())
}

// ---------------------------------------------------------------------------
// Hardening
// ---------------------------------------------------------------------------

/// Inputs that passed every security gate, in the same order the plan
/// declared them.
#[derive(Debug, Clone)]
pub struct ClearedInputs {
    pub inputs: Vec<String>,
    pub output: PathBuf,
}

/// Defense-in-depth gate between structural validation and assembly.
/// Any violation aborts immediately; no partial result is ever produced.
pub fn harden(
    plan: &RenderPlan,
    sandbox_root: &Path,
    allowed_transports: &[String],
    output_path: &Path,
) -> Result<ClearedInputs> {
    let sources = match plan {
        RenderPlan::FastCopy { clips } => clips,
        RenderPlan::Graph { inputs, .. } => inputs,
    };

    let mut inputs = Vec::with_capacity(sources.len());
    for source in sources {
        inputs.push(check_source(source, sandbox_root, allowed_transports)?);
    }

    let output = confine_path(output_path, sandbox_root).map_err(SynthError::Security)?;

    if let RenderPlan::Graph { graph, .. } = plan {
        harden_graph(graph, sandbox_root)?;
    }

    Ok(ClearedInputs { inputs, output })
}

fn harden_graph(graph: &FilterGraph, sandbox_root: &Path) -> Result<()> {
    for node in &graph.nodes {
        match &node.op {
            FilterOp::DrawText(params) => {
                verify_round_trip(&params.text)?;
                if let Some(font) = &params.font_file {
                    verify_round_trip(font)?;
                    confine_path(Path::new(font), sandbox_root)?;
                }
                check_color(&params.color)?;
                check_coord(&params.x)?;
                check_coord(&params.y)?;
                check_finite(&[params.enable.0, params.enable.1], "drawtext enable")?;
                if let Some(fade) = &params.fade {
                    check_finite(
                        &[fade.start, fade.end, fade.fade_in, fade.fade_out],
                        "drawtext alpha",
                    )?;
                }
            }
            FilterOp::Trim { start, end } | FilterOp::ATrim { start, end } => {
                check_finite(&[*start, *end], "trim window")?;
            }
            FilterOp::SetPts { speed } => check_finite(&[*speed], "setpts speed")?,
            FilterOp::Fps { fps } => check_finite(&[*fps], "fps")?,
            FilterOp::Atempo { factor } => check_finite(&[*factor], "atempo")?,
            FilterOp::Xfade {
                duration, offset, ..
            } => check_finite(&[*duration, *offset], "xfade")?,
            FilterOp::ACrossfade { duration } => check_finite(&[*duration], "acrossfade")?,
            FilterOp::Volume { gain } => check_finite(&[*gain], "volume")?,
            FilterOp::AFadeIn { duration } => check_finite(&[*duration], "afade")?,
            FilterOp::AFadeOut { start, duration } => {
                check_finite(&[*start, *duration], "afade")?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_color(color: &str) -> std::result::Result<(), SecurityViolation> {
    let valid_len = color.len() == 6 || color.len() == 8;
    if !valid_len || !color.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SecurityViolation::MalformedValue {
            context: "fontcolor".to_string(),
            value: color.to_string(),
        });
    }
    Ok(())
}

fn check_coord(coord: &TextCoord) -> std::result::Result<(), SecurityViolation> {
    match coord {
        TextCoord::Px(_) => Ok(()),
        TextCoord::Expr(expr) => {
            if ANCHOR_EXPRS.contains(&expr.as_str()) {
                Ok(())
            } else {
                Err(SecurityViolation::MalformedValue {
                    context: "text position".to_string(),
                    value: expr.clone(),
                })
            }
        }
    }
}

fn check_finite(values: &[f64], context: &str) -> std::result::Result<(), SecurityViolation> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(SecurityViolation::NonFiniteNumber {
            context: context.to_string(),
        });
    }
    Ok(())
}

/// Final gate over the assembled argument vector: no token may be a denied
/// flag or carry a denied protocol handler.
pub fn audit_tokens(argv: &[String]) -> Result<()> {
    for token in argv {
        if DENIED_FLAGS.contains(&token.as_str()) {
            return Err(SecurityViolation::ForbiddenToken {
                token: token.clone(),
            }
            .into());
        }
        let lower = token.to_ascii_lowercase();
        for protocol in DENIED_PROTOCOLS {
            if lower.starts_with(protocol) {
                return Err(SecurityViolation::ForbiddenProtocol {
                    reference: token.clone(),
                }
                .into());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_covers_every_metacharacter() {
        assert_eq!(escape_filter_text(r"a\b"), r"a\\b");
        assert_eq!(escape_filter_text("it's"), r"it\'s");
        assert_eq!(escape_filter_text("a:b,c;d[e]"), r"a\:b\,c\;d\[e\]");
        assert_eq!(escape_filter_text("plain text"), "plain text");
    }

    #[test]
    fn escape_round_trips_adversarial_text() {
        let cases = [
            "Sale: It's Now!",
            r"back\slash",
            "a,b;c:d'e",
            r"nested \' already escaped",
            "[label];next=1:x,y",
            "''''",
            r"\\\\",
        ];
        for case in cases {
            assert_eq!(unescape_filter_text(&escape_filter_text(case)), case, "{case}");
        }
    }

    #[test]
    fn escaped_form_never_contains_bare_terminators() {
        let escaped = escape_filter_text("a;b[c]d,e:f");
        let mut prev = ' ';
        for ch in escaped.chars() {
            if matches!(ch, ';' | '[' | ']' | ',' | ':') {
                assert_eq!(prev, '\\', "unescaped {ch} in {escaped}");
            }
            prev = ch;
        }
    }

    #[test]
    fn concat_path_quoting() {
        assert_eq!(escape_concat_path("/srv/media/a.mp4"), "/srv/media/a.mp4");
        assert_eq!(escape_concat_path("/srv/it's.mp4"), r"/srv/it'\''s.mp4");
    }

    #[test]
    fn confine_accepts_paths_inside_root() {
        let root = Path::new("/srv/sandbox");
        assert_eq!(
            confine_path(Path::new("job1/in.mp4"), root).unwrap(),
            PathBuf::from("/srv/sandbox/job1/in.mp4")
        );
        assert_eq!(
            confine_path(Path::new("/srv/sandbox/a/./b.mp4"), root).unwrap(),
            PathBuf::from("/srv/sandbox/a/b.mp4")
        );
    }

    #[test]
    fn confine_rejects_parent_escapes() {
        let root = Path::new("/srv/sandbox");
        assert!(matches!(
            confine_path(Path::new("../../etc/passwd"), root),
            Err(SecurityViolation::PathOutsideSandbox { .. })
        ));
        assert!(matches!(
            confine_path(Path::new("/srv/sandbox/../secret.mp4"), root),
            Err(SecurityViolation::PathOutsideSandbox { .. })
        ));
        assert!(matches!(
            confine_path(Path::new("/etc/passwd"), root),
            Err(SecurityViolation::PathOutsideSandbox { .. })
        ));
    }

    #[test]
    fn confine_rejects_pop_past_filesystem_root() {
        let root = Path::new("/srv/sandbox");
        assert!(matches!(
            confine_path(Path::new("/../x"), root),
            Err(SecurityViolation::PathTraversal { .. })
        ));
    }

    #[test]
    fn check_source_confines_relative_paths() {
        let root = Path::new("/srv/sandbox");
        let cleared = check_source(
            &SourceRef::new("job7/clip.mp4"),
            root,
            &["https".to_string()],
        )
        .unwrap();
        assert_eq!(cleared, "/srv/sandbox/job7/clip.mp4");
    }

    #[test]
    fn check_source_enforces_transport_allowlist() {
        let root = Path::new("/srv/sandbox");
        let allowed = vec!["https".to_string()];
        assert!(check_source(&SourceRef::new("https://cdn.example.com/a.mp4"), root, &allowed).is_ok());
        assert!(matches!(
            check_source(&SourceRef::new("http://cdn.example.com/a.mp4"), root, &allowed),
            Err(SecurityViolation::TransportNotAllowed { .. })
        ));
    }

    #[test]
    fn check_source_rejects_denied_protocols() {
        let root = Path::new("/srv/sandbox");
        let allowed = vec!["https".to_string()];
        for reference in ["file:///etc/passwd", "pipe:0", "concat:a|b", "data:text/plain,hi"] {
            assert!(matches!(
                check_source(&SourceRef::new(reference), root, &allowed),
                Err(SecurityViolation::ForbiddenProtocol { .. })
            ));
        }
    }

    #[test]
    fn check_source_rejects_flag_shaped_paths() {
        let root = Path::new("/srv/sandbox");
        assert!(matches!(
            check_source(&SourceRef::new("-i"), root, &[]),
            Err(SecurityViolation::ForbiddenToken { .. })
        ));
    }

    #[test]
    fn audit_rejects_denied_flags_and_protocols() {
        let bad_flag = vec!["-filter_script".to_string()];
        assert!(matches!(
            audit_tokens(&bad_flag),
            Err(SynthError::Security(SecurityViolation::ForbiddenToken { .. }))
        ));

        let bad_protocol = vec!["pipe:1".to_string()];
        assert!(matches!(
            audit_tokens(&bad_protocol),
            Err(SynthError::Security(SecurityViolation::ForbiddenProtocol { .. }))
        ));

        let fine = vec!["-y".to_string(), "/srv/sandbox/out.mp4".to_string()];
        assert!(audit_tokens(&fine).is_ok());
    }

    #[test]
    fn round_trip_rejects_control_characters() {
        assert!(matches!(
            verify_round_trip("line\nbreak"),
            Err(SecurityViolation::ControlCharacter { .. })
        ));
        assert!(verify_round_trip("Sale: It's Now!").is_ok());
    }

    #[test]
    fn color_must_be_hex() {
        assert!(check_color("ffffff").is_ok());
        assert!(check_color("ffffffff").is_ok());
        assert!(check_color("red").is_err());
        assert!(check_color("fffff").is_err());
        assert!(check_color("ffff0g").is_err());
    }
}
