//! Compiles the user's declarative operation list into a [`TransformSpec`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::common::error::{PipelineError, PipelineResult};

/// One raw `{operation, opts}` entry as declared by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Operation {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<String>,
}

impl Operation {
    pub fn new(operation: &str, opts: Option<&str>) -> Self {
        Self {
            operation: operation.to_string(),
            opts: opts.map(str::to_string),
        }
    }

    /// Parses a loosely typed JSON entry, rejecting any key other than
    /// `operation` and `opts`.
    pub fn from_value(value: &Value) -> PipelineResult<Self> {
        let object = value.as_object().ok_or_else(|| {
            PipelineError::Config(format!("Operation entry must be an object, got {value}"))
        })?;

        if let Some(key) = object.keys().find(|k| *k != "operation" && *k != "opts") {
            return Err(PipelineError::Config(format!(
                "Invalid key '{key}' in configuration. Valid keys are 'operation' and 'opts'"
            )));
        }

        let operation = match object.get("operation") {
            Some(Value::String(s)) => s.clone(),
            _ => {
                return Err(PipelineError::Config(
                    "Every configuration entry needs an 'operation' string".to_string(),
                ));
            }
        };

        let opts = match object.get("opts") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(other) => {
                return Err(PipelineError::Config(format!(
                    "Invalid options for '{operation}': {other}"
                )));
            }
        };

        Ok(Self { operation, opts })
    }

    pub fn from_values(values: &[Value]) -> PipelineResult<Vec<Self>> {
        values.iter().map(Self::from_value).collect()
    }
}

/// Output containers the pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Mov,
    Avi,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Mp4, OutputFormat::Mov, OutputFormat::Avi];

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mov => "mov",
            OutputFormat::Avi => "avi",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.extension() == wanted)
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(|f| f.extension()).collect();
                PipelineError::Config(format!(
                    "Configured format '{wanted}' is not a valid format: {valid:?}"
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Crop {
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<u32>,
}

impl Crop {
    /// Offsets to use against a frame of the given size; omitted offsets
    /// center the crop window.
    pub fn offsets_for(&self, frame_width: u32, frame_height: u32) -> (i64, i64) {
        let x = self
            .x
            .map(i64::from)
            .unwrap_or((i64::from(frame_width) - i64::from(self.width)) / 2);
        let y = self
            .y
            .map(i64::from)
            .unwrap_or((i64::from(frame_height) - i64::from(self.height)) / 2);
        (x, y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
}

/// A single typed video filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Filter {
    Crop(Crop),
    Resize(Resize),
    Brightness { value: f64 },
    Grayscale,
    Sepia,
}

impl Filter {
    pub fn name(&self) -> &'static str {
        match self {
            Filter::Crop(_) => "crop",
            Filter::Resize(_) => "resize",
            Filter::Brightness { .. } => "brightness",
            Filter::Grayscale => "grayscale",
            Filter::Sepia => "sepia",
        }
    }
}

/// Canonical, validated description of what to do with every chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSpec {
    pub format: Option<OutputFormat>,
    /// Filters in first-declared order; each kind appears at most once.
    pub filters: Vec<Filter>,
    pub extract_audio: bool,
}

impl TransformSpec {
    pub fn filter(&self, name: &str) -> Option<&Filter> {
        self.filters.iter().find(|f| f.name() == name)
    }

    pub fn crop(&self) -> Option<Crop> {
        self.filters.iter().find_map(|f| match f {
            Filter::Crop(crop) => Some(*crop),
            _ => None,
        })
    }
}

const FILTER_OPERATIONS: [&str; 5] = ["crop", "resize", "brightness", "grayscale", "sepia"];

/// Validates and normalizes an ordered operation list.
pub fn compile(operations: &[Operation]) -> PipelineResult<TransformSpec> {
    let mut spec = TransformSpec::default();

    for op in operations {
        let name = op.operation.as_str();
        if FILTER_OPERATIONS.contains(&name) {
            if spec.filter(name).is_some() {
                return Err(PipelineError::Config(format!(
                    "Duplicate filter operation: '{name}'. Each filter operation can only be used once."
                )));
            }
            let filter = parse_filter(name, op.opts.as_deref())?;
            spec.filters.push(filter);
        } else if name == "format" {
            if spec.format.is_some() {
                return Err(PipelineError::Config(
                    "Duplicate format operation: only one output format can be configured."
                        .to_string(),
                ));
            }
            let opts = required_opts(name, op.opts.as_deref())?;
            spec.format = Some(opts.parse()?);
        } else if name == "exaudio" {
            spec.extract_audio = true;
        } else {
            return Err(PipelineError::Config(format!(
                "Unsupported operation: '{name}'"
            )));
        }
    }

    Ok(spec)
}

fn parse_filter(name: &str, opts: Option<&str>) -> PipelineResult<Filter> {
    match name {
        "crop" => {
            let opts = required_opts(name, opts)?;
            let values = parse_dimensions(name, opts, &[2, 4])?;
            Ok(Filter::Crop(Crop {
                width: values[0],
                height: values[1],
                x: values.get(2).copied(),
                y: values.get(3).copied(),
            }))
        }
        "resize" => {
            let opts = required_opts(name, opts)?;
            let values = parse_dimensions(name, opts, &[2])?;
            Ok(Filter::Resize(Resize {
                width: values[0],
                height: values[1],
            }))
        }
        "brightness" => {
            let opts = required_opts(name, opts)?;
            let value = opts.trim().parse::<f64>().map_err(|_| {
                PipelineError::Config(format!(
                    "Invalid operation arguments for 'brightness': '{opts}'"
                ))
            })?;
            if !value.is_finite() {
                return Err(PipelineError::Config(format!(
                    "Invalid operation arguments for 'brightness': '{opts}'"
                )));
            }
            Ok(Filter::Brightness { value })
        }
        "grayscale" => Ok(Filter::Grayscale),
        "sepia" => Ok(Filter::Sepia),
        other => Err(PipelineError::Config(format!(
            "Unsupported operation: '{other}'"
        ))),
    }
}

fn required_opts<'a>(name: &str, opts: Option<&'a str>) -> PipelineResult<&'a str> {
    match opts {
        Some(o) if !o.trim().is_empty() => Ok(o),
        _ => Err(PipelineError::Config(format!(
            "Operation '{name}' requires options"
        ))),
    }
}

fn parse_dimensions(name: &str, opts: &str, arities: &[usize]) -> PipelineResult<Vec<u32>> {
    let tokens: Vec<&str> = opts.split_whitespace().collect();
    if !arities.contains(&tokens.len()) {
        return Err(PipelineError::Config(format!(
            "Invalid {name} options: '{opts}' (expected {arities:?} integer values)"
        )));
    }

    tokens
        .iter()
        .map(|t| {
            t.parse::<u32>().map_err(|_| {
                PipelineError::Config(format!(
                    "Invalid operation arguments for '{name}': '{opts}'"
                ))
            })
        })
        .collect()
}
