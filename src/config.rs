// THEORY:
// `PerturbationConfig` carries the in-process parameters of an ablation run:
// protocol, removal fractions and fill rule, plus output and dataset settings.
// It can be loaded from TOML and is overridden field by field by the CLI.
// Validation happens once, before any pipeline is built, so a bad fraction or
// an unknown extension never reaches the filesystem.

use crate::core_modules::removal_level::{FillRule, Protocol, RemovalLevel};
use crate::error::{AblationError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_BATCH_SIZE: usize = 4;
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PerturbationConfig {
    pub protocol: Protocol,
    /// Removal fractions in (0, 1], processed in this order.
    pub fractions: Vec<f64>,
    pub fill_rule: FillRule,
    /// Output file extension, which also selects the encoder.
    pub extension: String,
    /// Write `manifest.json` next to the outputs after a successful run.
    pub write_manifest: bool,
    pub batch_size: usize,
    pub image_size: u32,
}

impl Default for PerturbationConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::MostImportant,
            fractions: vec![0.1],
            fill_rule: FillRule::Zero,
            extension: "jpeg".to_string(),
            write_manifest: true,
            batch_size: DEFAULT_BATCH_SIZE,
            image_size: DEFAULT_IMAGE_SIZE,
        }
    }
}

impl PerturbationConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| AblationError::Config(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AblationError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fractions.is_empty() {
            return Err(AblationError::Config("no removal fractions given".into()));
        }
        for (i, fraction) in self.fractions.iter().enumerate() {
            RemovalLevel::new(self.protocol, *fraction)?;
            if self.fractions[..i].contains(fraction) {
                return Err(AblationError::Config(format!(
                    "removal fraction {fraction} listed twice"
                )));
            }
        }
        if !matches!(self.extension.as_str(), "jpeg" | "jpg" | "png") {
            return Err(AblationError::Config(format!(
                "unsupported output extension {:?}",
                self.extension
            )));
        }
        if self.batch_size == 0 || self.image_size == 0 {
            return Err(AblationError::Config(
                "batch size and image size must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Removal levels in configured order.
    pub fn levels(&self) -> Result<Vec<RemovalLevel>> {
        self.validate()?;
        self.fractions
            .iter()
            .map(|f| RemovalLevel::new(self.protocol, *f))
            .collect()
    }
}
