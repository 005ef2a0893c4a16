use crate::{
    language::{errors::AnalyzerError, span::Span},
    project::manifest::ManifestError,
};
use miette::{Diagnostic, NamedSource, Report, SourceSpan};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(flowc::analyze))]
pub struct AnalysisDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("{label}")]
    span: SourceSpan,
    message: String,
    label: String,
    #[help]
    help: Option<String>,
}

/// Enclosing frames of an error, outermost first, one per line.
fn trace_help(err: &AnalyzerError) -> Option<String> {
    if err.frames.len() < 2 {
        return None;
    }
    let lines: Vec<String> = err
        .frames
        .iter()
        .map(|frame| format!("in {frame}"))
        .collect();
    Some(lines.join("\n"))
}

/// Renders an analysis error against its source file under `sources`, falling
/// back to a plain message when the file cannot be read.
pub fn emit_analysis_error(err: &AnalyzerError, sources: Option<&Path>) {
    let frame = err.primary_frame();
    let path = match (sources, frame) {
        (Some(root), Some(frame)) => Some(
            root.join(&frame.location.package)
                .join(&frame.location.file),
        ),
        _ => None,
    };

    let contents = path
        .as_ref()
        .map(|path| (path, std::fs::read_to_string(path)));
    match (contents, frame) {
        (Some((path, Ok(contents))), Some(frame)) => {
            let diagnostic = AnalysisDiagnostic {
                src: NamedSource::new(path.display().to_string(), contents),
                span: frame
                    .span
                    .map(span_to_source_span)
                    .unwrap_or_else(|| SourceSpan::from((0, 0))),
                message: err.kind.to_string(),
                label: frame
                    .subject
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "here".to_string()),
                help: trace_help(err),
            };
            eprintln!("{:?}", Report::new(diagnostic));
        }
        (Some((path, Err(read_err))), _) => {
            eprintln!("error: {err} ({}: {read_err})", path.display());
            report_frames(err);
        }
        _ => {
            eprintln!("error: {err}");
            report_frames(err);
        }
    }
}

fn report_frames(err: &AnalyzerError) {
    for frame in &err.frames {
        eprintln!("  in {frame}");
    }
}

pub fn report_manifest_error(error: &ManifestError) {
    eprintln!("Manifest error: {error}");
}

pub fn report_io_error(path: &Path, error: &std::io::Error) {
    eprintln!("Failed to access {}: {}", path.display(), error);
}

fn span_to_source_span(span: Span) -> SourceSpan {
    SourceSpan::from((span.start, span.len()))
}
