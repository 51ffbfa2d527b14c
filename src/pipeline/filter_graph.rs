//! Translates a [`TransformSpec`] into encoder arguments.
//!
//! Everything here is pure: the same spec and paths always produce the same
//! argument list, and nothing is executed.

use std::path::{Path, PathBuf};

use super::config::{Crop, Filter, TransformSpec};

const GRAYSCALE_EXPR: &str = "hue=s=0";
const SEPIA_EXPR: &str =
    "colorchannelmixer=.393:.769:.189:0:.349:.686:.168:0:.272:.534:.131";

/// Fully resolved description of one encoder run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeInvocation {
    pub args: Vec<String>,
    /// Extension of the produced file, without the dot.
    pub extension: String,
    pub output: PathBuf,
}

/// Primitive filter expression for a single filter.
pub fn filter_expression(filter: &Filter) -> String {
    match filter {
        Filter::Crop(crop) => crop_expression(crop),
        Filter::Resize(resize) => format!("scale={}:{}", resize.width, resize.height),
        Filter::Brightness { value } => format!("eq=brightness={value}"),
        Filter::Grayscale => GRAYSCALE_EXPR.to_string(),
        Filter::Sepia => SEPIA_EXPR.to_string(),
    }
}

fn crop_expression(crop: &Crop) -> String {
    let x = crop
        .x
        .map(|x| x.to_string())
        .unwrap_or_else(|| format!("(in_w-{})/2", crop.width));
    let y = crop
        .y
        .map(|y| y.to_string())
        .unwrap_or_else(|| format!("(in_h-{})/2", crop.height));
    format!("crop={}:{}:{}:{}", crop.width, crop.height, x, y)
}

/// The whole chain as one comma-joined expression, or `None` without filters.
///
/// Filters must travel in a single `-vf` option; the encoder keeps only the
/// last one when the option is repeated.
pub fn filter_chain(spec: &TransformSpec) -> Option<String> {
    if spec.filters.is_empty() {
        return None;
    }
    let parts: Vec<String> = spec.filters.iter().map(filter_expression).collect();
    Some(parts.join(","))
}

pub fn output_extension(spec: &TransformSpec, source_extension: &str) -> String {
    spec.format
        .map(|f| f.extension().to_string())
        .unwrap_or_else(|| source_extension.trim_start_matches('.').to_string())
}

/// Builds the encoder invocation that applies `spec` to `input`, writing to
/// `output_stem` plus the resolved extension.
pub fn build(
    spec: &TransformSpec,
    input: &str,
    output_stem: &Path,
    source_extension: &str,
) -> EncodeInvocation {
    let extension = output_extension(spec, source_extension);

    let mut output = output_stem.as_os_str().to_owned();
    output.push(".");
    output.push(&extension);
    let output = PathBuf::from(output);

    let mut args: Vec<String> = vec![
        "-y".into(),
        "-v".into(),
        "error".into(),
        "-i".into(),
        input.to_string(),
    ];

    match filter_chain(spec) {
        Some(chain) => {
            args.push("-vf".into());
            args.push(chain);
        }
        None if extension == source_extension.trim_start_matches('.') => {
            args.push("-c".into());
            args.push("copy".into());
        }
        None => {}
    }

    args.push(output.to_string_lossy().into_owned());

    EncodeInvocation {
        args,
        extension,
        output,
    }
}

/// Muxer name for stream-copy output written to a pipe.
pub fn muxer_for_extension(extension: &str) -> &str {
    match extension {
        "mp4" | "m4v" => "mp4",
        "mkv" => "matroska",
        "ts" => "mpegts",
        other => other,
    }
}

/// Container content type used when storing objects.
pub fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key).first_or_octet_stream().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::{compile, Operation, OutputFormat, Resize};

    fn spec(ops: &[(&str, Option<&str>)]) -> TransformSpec {
        let ops: Vec<Operation> = ops.iter().map(|(o, p)| Operation::new(o, *p)).collect();
        compile(&ops).unwrap()
    }

    #[test]
    fn resize_and_format_produce_single_scale_filter() {
        let spec = spec(&[("resize", Some("640 360")), ("format", Some("mp4"))]);
        let inv = build(&spec, "https://bucket/CHUNK-0.mov", Path::new("/tmp/out-CHUNK-0"), "mov");

        assert_eq!(inv.extension, "mp4");
        assert_eq!(inv.output, PathBuf::from("/tmp/out-CHUNK-0.mp4"));
        assert_eq!(
            inv.args,
            vec![
                "-y",
                "-v",
                "error",
                "-i",
                "https://bucket/CHUNK-0.mov",
                "-vf",
                "scale=640:360",
                "/tmp/out-CHUNK-0.mp4",
            ]
        );
    }

    #[test]
    fn all_filters_share_one_vf_option_in_declared_order() {
        let spec = spec(&[
            ("crop", Some("320 180 4 8")),
            ("grayscale", None),
            ("brightness", Some("0.2")),
            ("resize", Some("160 90")),
        ]);
        let inv = build(&spec, "in.mp4", Path::new("out"), "mp4");

        let vf_count = inv.args.iter().filter(|a| *a == "-vf").count();
        assert_eq!(vf_count, 1);
        let chain = inv.args[inv.args.iter().position(|a| a == "-vf").unwrap() + 1].clone();
        assert_eq!(
            chain,
            "crop=320:180:4:8,hue=s=0,eq=brightness=0.2,scale=160:90"
        );
    }

    #[test]
    fn crop_without_offsets_is_centered() {
        let spec = spec(&[("crop", Some("320 180"))]);
        assert_eq!(
            filter_chain(&spec).as_deref(),
            Some("crop=320:180:(in_w-320)/2:(in_h-180)/2")
        );
    }

    #[test]
    fn sepia_uses_color_matrix() {
        assert!(filter_expression(&Filter::Sepia).starts_with("colorchannelmixer="));
    }

    #[test]
    fn no_filters_same_container_is_stream_copy() {
        let inv = build(&TransformSpec::default(), "in.avi", Path::new("out"), "avi");
        assert_eq!(inv.extension, "avi");
        assert!(inv.args.windows(2).any(|w| w == ["-c", "copy"]));
        assert!(!inv.args.contains(&"-vf".to_string()));
    }

    #[test]
    fn format_change_without_filters_reencodes() {
        let spec = TransformSpec {
            format: Some(OutputFormat::Mov),
            ..TransformSpec::default()
        };
        let inv = build(&spec, "in.mp4", Path::new("out"), "mp4");
        assert_eq!(inv.extension, "mov");
        assert!(!inv.args.contains(&"copy".to_string()));
    }

    #[test]
    fn build_is_deterministic() {
        let spec = TransformSpec {
            format: None,
            filters: vec![
                Filter::Resize(Resize { width: 1280, height: 720 }),
                Filter::Sepia,
            ],
            extract_audio: true,
        };
        let a = build(&spec, "in.mkv", Path::new("/scratch/x"), "mkv");
        let b = build(&spec.clone(), "in.mkv", Path::new("/scratch/x"), "mkv");
        assert_eq!(a, b);
    }

    #[test]
    fn muxers_and_content_types() {
        assert_eq!(muxer_for_extension("mp4"), "mp4");
        assert_eq!(muxer_for_extension("mkv"), "matroska");
        assert_eq!(muxer_for_extension("mov"), "mov");
        assert_eq!(content_type_for("job/RESULT.mp4"), "video/mp4");
    }
}
