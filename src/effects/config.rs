// SPDX-License-Identifier: GPL-3.0-only

//! Effect configuration values and per-type parameter schemas

use super::EffectKind;
use crate::errors::{ControlError, ControlResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// A single configuration value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Parameter name to value, ordered by name
pub type EffectConfig = BTreeMap<String, ParamValue>;

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Str(_) => "string",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Loose parse used for command-line values: bool, then int, then float, else string
impl FromStr for ParamValue {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed {
            "true" => ParamValue::Bool(true),
            "false" => ParamValue::Bool(false),
            _ => {
                if let Ok(i) = trimmed.parse::<i64>() {
                    ParamValue::Int(i)
                } else if let Ok(f) = trimmed.parse::<f64>() {
                    ParamValue::Float(f)
                } else {
                    ParamValue::Str(s.to_string())
                }
            }
        })
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

/// Expected type and range of one parameter
#[derive(Debug, Clone, Copy)]
enum ParamType {
    Bool,
    Int { min: i64, max: i64, odd: bool },
    Float { min: f64, max: f64 },
    Str,
}

#[derive(Debug, Clone, Copy)]
struct ParamSpec {
    name: &'static str,
    ty: ParamType,
}

const fn int(name: &'static str, min: i64, max: i64) -> ParamSpec {
    ParamSpec {
        name,
        ty: ParamType::Int {
            min,
            max,
            odd: false,
        },
    }
}

const fn float(name: &'static str, min: f64, max: f64) -> ParamSpec {
    ParamSpec {
        name,
        ty: ParamType::Float { min, max },
    }
}

const BLUR: &[ParamSpec] = &[ParamSpec {
    name: "strength",
    ty: ParamType::Int {
        min: 1,
        max: 99,
        odd: true,
    },
}];

const REPLACE: &[ParamSpec] = &[
    ParamSpec {
        name: "background",
        ty: ParamType::Str,
    },
    ParamSpec {
        name: "color",
        ty: ParamType::Str,
    },
];

const BRIGHTNESS: &[ParamSpec] = &[
    int("brightness", -100, 100),
    float("contrast", 0.5, 2.0),
    ParamSpec {
        name: "face_only",
        ty: ParamType::Bool,
    },
];

const BEAUTIFY: &[ParamSpec] = &[int("smoothness", 1, 15)];

const AUTOFRAME: &[ParamSpec] = &[
    float("padding", 0.0, 1.0),
    float("min_zoom", 1.0, 4.0),
    float("max_zoom", 1.0, 4.0),
];

const GAZE_CORRECT: &[ParamSpec] = &[float("strength", 0.0, 1.0)];

fn schema(kind: EffectKind) -> &'static [ParamSpec] {
    match kind {
        EffectKind::Blur => BLUR,
        EffectKind::Replace => REPLACE,
        EffectKind::Brightness => BRIGHTNESS,
        EffectKind::Beautify => BEAUTIFY,
        EffectKind::AutoFrame => AUTOFRAME,
        EffectKind::GazeCorrect => GAZE_CORRECT,
    }
}

/// Parameter names accepted by an effect type
pub fn parameter_names(kind: EffectKind) -> Vec<&'static str> {
    schema(kind).iter().map(|spec| spec.name).collect()
}

/// Check a configuration against the schema of `kind`
///
/// Missing parameters take their defaults; anything unknown, mistyped or out of
/// range is rejected.
pub fn validate(kind: EffectKind, config: &EffectConfig) -> ControlResult<()> {
    let specs = schema(kind);
    let effect = kind.as_str();

    for (name, value) in config {
        let spec = specs.iter().find(|s| s.name == name).ok_or_else(|| {
            ControlError::invalid(
                effect,
                format!(
                    "unknown parameter '{}' (expected one of: {})",
                    name,
                    parameter_names(kind).join(", ")
                ),
            )
        })?;
        check_value(effect, spec, value)?;
    }

    match kind {
        EffectKind::Replace => {
            if config.contains_key("background") && config.contains_key("color") {
                return Err(ControlError::invalid(
                    effect,
                    "'background' and 'color' are mutually exclusive",
                ));
            }
            if let Some(color) = config.get("color").and_then(ParamValue::as_str) {
                parse_hex_color(color).ok_or_else(|| {
                    ControlError::invalid(effect, format!("color '{}' is not #RRGGBB", color))
                })?;
            }
            if let Some(path) = config.get("background").and_then(ParamValue::as_str)
                && path.trim().is_empty()
            {
                return Err(ControlError::invalid(effect, "background path is empty"));
            }
        }
        EffectKind::AutoFrame => {
            let min_zoom = float_param(config, "min_zoom", 1.0);
            let max_zoom = float_param(config, "max_zoom", 2.0);
            if min_zoom > max_zoom {
                return Err(ControlError::invalid(
                    effect,
                    format!("min_zoom {} exceeds max_zoom {}", min_zoom, max_zoom),
                ));
            }
        }
        _ => {}
    }

    Ok(())
}

fn check_value(effect: &str, spec: &ParamSpec, value: &ParamValue) -> ControlResult<()> {
    let wrong_type = |expected: &str| {
        ControlError::invalid(
            effect,
            format!(
                "'{}' must be {}, got {}",
                spec.name,
                expected,
                value.type_name()
            ),
        )
    };

    match spec.ty {
        ParamType::Bool => {
            value.as_bool().ok_or_else(|| wrong_type("a bool"))?;
        }
        ParamType::Str => {
            value.as_str().ok_or_else(|| wrong_type("a string"))?;
        }
        ParamType::Int { min, max, odd } => {
            let v = value.as_i64().ok_or_else(|| wrong_type("an integer"))?;
            if v < min || v > max {
                return Err(ControlError::invalid(
                    effect,
                    format!("'{}' = {} is outside {}..={}", spec.name, v, min, max),
                ));
            }
            if odd && v % 2 == 0 {
                return Err(ControlError::invalid(
                    effect,
                    format!("'{}' must be odd, got {}", spec.name, v),
                ));
            }
        }
        ParamType::Float { min, max } => {
            let v = value.as_f64().ok_or_else(|| wrong_type("a number"))?;
            if !v.is_finite() || v < min || v > max {
                return Err(ControlError::invalid(
                    effect,
                    format!("'{}' = {} is outside {}..={}", spec.name, v, min, max),
                ));
            }
        }
    }
    Ok(())
}

/// Parse `#RRGGBB`
pub fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    let hex = s.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

pub(crate) fn int_param(config: &EffectConfig, name: &str, default: i64) -> i64 {
    config
        .get(name)
        .and_then(ParamValue::as_i64)
        .unwrap_or(default)
}

pub(crate) fn float_param(config: &EffectConfig, name: &str, default: f64) -> f64 {
    config
        .get(name)
        .and_then(ParamValue::as_f64)
        .unwrap_or(default)
}

pub(crate) fn bool_param(config: &EffectConfig, name: &str, default: bool) -> bool {
    config
        .get(name)
        .and_then(ParamValue::as_bool)
        .unwrap_or(default)
}

pub(crate) fn str_param<'a>(config: &'a EffectConfig, name: &str) -> Option<&'a str> {
    config.get(name).and_then(ParamValue::as_str)
}
