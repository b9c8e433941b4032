// THEORY:
// Every image lands at
//   <root>/<protocol>/removal<pct>%/img_id=<index>removal=<pct>%.<ext>
// where <pct> is the level's percentage label and <index> the run-global
// counter. Directories are created once per run, before the first batch.

use crate::core_modules::removal_level::RemovalLevel;
use crate::error::{AblationError, Result};
use log::debug;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    extension: String,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a level, relative to the root.
    pub fn level_dir(&self, level: &RemovalLevel) -> PathBuf {
        PathBuf::from(level.protocol().short_name())
            .join(format!("removal{}%", level.percentage_label()))
    }

    pub fn file_name(&self, image_index: u64, level: &RemovalLevel) -> String {
        let pct = level.percentage_label();
        format!("img_id={image_index}removal={pct}%.{}", self.extension)
    }

    /// Path of an output image, relative to the root.
    pub fn relative_path(&self, image_index: u64, level: &RemovalLevel) -> PathBuf {
        self.level_dir(level).join(self.file_name(image_index, level))
    }

    pub fn absolute_path(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Creates every level directory up front.
    pub fn prepare(&self, levels: &[RemovalLevel]) -> Result<()> {
        for level in levels {
            let dir = self.root.join(self.level_dir(level));
            std::fs::create_dir_all(&dir).map_err(|e| AblationError::Persistence {
                path: dir.clone(),
                source: e.into(),
            })?;
            debug!("📁 Prepared {}", dir.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::removal_level::Protocol;

    #[test]
    fn builds_paths_per_convention() {
        let layout = OutputLayout::new("out", "jpeg");
        let roar = RemovalLevel::new(Protocol::MostImportant, 0.1).unwrap();
        assert_eq!(
            layout.relative_path(7, &roar),
            PathBuf::from("roar/removal10.0%/img_id=7removal=10.0%.jpeg")
        );

        let pp = RemovalLevel::new(Protocol::LeastImportant, 0.25).unwrap();
        assert_eq!(
            layout.absolute_path(&layout.relative_path(0, &pp)),
            PathBuf::from("out/pp/removal25.0%/img_id=0removal=25.0%.jpeg")
        );
    }

    #[test]
    fn prepare_creates_level_directories() {
        let root = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(root.path().join("nested"), "png");
        let levels = [
            RemovalLevel::new(Protocol::MostImportant, 0.1).unwrap(),
            RemovalLevel::new(Protocol::MostImportant, 0.5).unwrap(),
        ];
        layout.prepare(&levels).unwrap();
        assert!(root.path().join("nested/roar/removal10.0%").is_dir());
        assert!(root.path().join("nested/roar/removal50.0%").is_dir());
    }
}
