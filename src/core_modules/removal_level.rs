// THEORY:
// A `RemovalLevel` is one point on an ablation curve: "remove this fraction of the
// pixels under this protocol". It is the only place where a fraction becomes a
// pixel count, so every rounding decision lives here and nowhere else.
//
// Two protocols share one ranking:
// - `MostImportant` (ROAR) removes the top `fraction` of pixels.
// - `LeastImportant` (pixel perturbation) keeps the top `fraction` and removes
//   everything else, i.e. `total - fraction * total` pixels from the tail.
//
// Counts are rounded half-to-even so that a level such as 0.5 over an odd pixel
// count lands on the same integer as the reference tooling.

use crate::error::{AblationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which end of the importance ranking gets removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Remove the most important pixels (ROAR).
    #[serde(alias = "roar")]
    MostImportant,
    /// Keep only the most important pixels (pixel perturbation).
    #[serde(alias = "pp")]
    LeastImportant,
}

impl Protocol {
    /// Short name used for output directories.
    pub fn short_name(&self) -> &'static str {
        match self {
            Protocol::MostImportant => "roar",
            Protocol::LeastImportant => "pp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::MostImportant => write!(f, "most-important"),
            Protocol::LeastImportant => write!(f, "least-important"),
        }
    }
}

impl FromStr for Protocol {
    type Err = AblationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "most-important" | "roar" => Ok(Protocol::MostImportant),
            "least-important" | "pp" => Ok(Protocol::LeastImportant),
            _ => Err(AblationError::UnknownProtocol(s.to_string())),
        }
    }
}

/// Value written into removed pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FillRule {
    #[default]
    Zero,
    /// Per-channel mean of the unperturbed image.
    #[serde(alias = "mean")]
    ChannelMean,
}

impl fmt::Display for FillRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillRule::Zero => write!(f, "zero"),
            FillRule::ChannelMean => write!(f, "channel-mean"),
        }
    }
}

impl FromStr for FillRule {
    type Err = AblationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "zero" => Ok(FillRule::Zero),
            "channel-mean" | "mean" => Ok(FillRule::ChannelMean),
            _ => Err(AblationError::UnknownFillRule(s.to_string())),
        }
    }
}

/// A protocol paired with the fraction of pixels it targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemovalLevel {
    protocol: Protocol,
    fraction: f64,
}

impl RemovalLevel {
    pub fn new(protocol: Protocol, fraction: f64) -> Result<Self> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(AblationError::InvalidFraction(fraction));
        }
        Ok(Self { protocol, fraction })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// Number of pixels this level removes from an image of `total_pixels`.
    pub fn target_count(&self, total_pixels: usize) -> usize {
        let total = total_pixels as f64;
        let kept_or_removed = self.fraction * total;
        let count = match self.protocol {
            Protocol::MostImportant => kept_or_removed,
            Protocol::LeastImportant => total - kept_or_removed,
        };
        (count.round_ties_even().max(0.0) as usize).min(total_pixels)
    }

    /// The fraction expressed as a percentage, as it appears in output paths.
    ///
    /// Uses the shortest round-trip representation and always keeps a decimal
    /// point: 0.1 -> "10.0", 0.25 -> "25.0". Percentages below 1e-4 switch to
    /// exponent form without zero padding ("1e-5", never "1e-05").
    pub fn percentage_label(&self) -> String {
        format!("{:?}", self.fraction * 100.0)
    }
}
