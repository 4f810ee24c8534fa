//! Detector configuration enums.
//!
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which detection entry point a detector instance accepts.
///
/// Fixed when the detector is constructed.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunningMode {
    #[default]
    Image,
    Video,
}

/// Preferred execution backend for inference.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Delegate {
    #[default]
    Cpu,
    Gpu,
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl fmt::Display for RunningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningMode::Image => write!(f, "IMAGE"),
            RunningMode::Video => write!(f, "VIDEO"),
        }
    }
}

impl FromStr for RunningMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IMAGE" => Ok(RunningMode::Image),
            "VIDEO" => Ok(RunningMode::Video),
            _ => Err(ParseEnumError {
                kind: "running mode",
                value: s.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delegate::Cpu => write!(f, "CPU"),
            Delegate::Gpu => write!(f, "GPU"),
        }
    }
}

impl FromStr for Delegate {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CPU" => Ok(Delegate::Cpu),
            "GPU" => Ok(Delegate::Gpu),
            _ => Err(ParseEnumError {
                kind: "delegate",
                value: s.to_owned(),
            }),
        }
    }
}
