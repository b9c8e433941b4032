// THEORY:
// The dataset layer feeds the pipeline in fixed, repeatable order. Its contract is
// narrow: yield `ImageBatch`es of normalized, equally sized images together with
// their labels. Any iterator of `anyhow::Result<ImageBatch>` satisfies it; the
// bundled `FolderDataset` reads the common class-per-folder layout:
//
//   root/
//     cat/ a.jpg b.jpg
//     dog/ c.png  puppies/d.png
//
// Each class folder is walked recursively. Classes and files are sorted by path
// so two runs always see the same sequence, and a class's label is its position
// in the sorted class list. A root without class folders, or a class folder
// without a single image, is an error rather than an empty evaluation.

use crate::core_modules::image_tensor::Image;
use crate::core_modules::normalization::Normalization;
use anyhow::{Context, Result};
use image::imageops::FilterType;
use log::debug;
use ndarray::{Array3, Array4, Axis, stack};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A batch of normalized images, shaped (batch, channels, height, width).
#[derive(Debug, Clone)]
pub struct ImageBatch {
    pub images: Array4<f32>,
    pub labels: Vec<usize>,
}

impl ImageBatch {
    pub fn new(images: Array4<f32>, labels: Vec<usize>) -> Self {
        Self { images, labels }
    }

    pub fn len(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spatial size (height, width) shared by every image in the batch.
    pub fn spatial_dims(&self) -> (usize, usize) {
        let (_, _, height, width) = self.images.dim();
        (height, width)
    }

    /// Owned copy of one image of the batch.
    pub fn image(&self, index: usize) -> Image {
        Image::new(self.images.index_axis(Axis(0), index).to_owned())
    }
}

/// Check if a file is a supported image format
pub fn is_supported_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            matches!(
                ext.to_string_lossy().to_lowercase().as_str(),
                "jpg" | "jpeg" | "png" | "webp" | "bmp" | "tiff" | "tif" | "ppm" | "pgm"
            )
        })
        .unwrap_or(false)
}

/// Collect every supported image below `dir`, descending into sub-folders.
fn collect_images_recursive(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading class folder {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_images_recursive(&path, out)?;
        } else if path.is_file() && is_supported_image_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Class-per-folder image dataset, resized and normalized on load.
pub struct FolderDataset {
    samples: Vec<(PathBuf, usize)>,
    classes: Vec<String>,
    image_size: u32,
    batch_size: usize,
    normalization: Arc<dyn Normalization>,
    cursor: usize,
}

impl FolderDataset {
    pub fn open(
        root: &Path,
        image_size: u32,
        batch_size: usize,
        normalization: Arc<dyn Normalization>,
    ) -> Result<Self> {
        anyhow::ensure!(batch_size > 0, "batch size must be positive");
        anyhow::ensure!(image_size > 0, "image size must be positive");

        let mut class_dirs: Vec<PathBuf> = fs::read_dir(root)
            .with_context(|| format!("reading dataset root {}", root.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        class_dirs.sort();
        if class_dirs.is_empty() {
            anyhow::bail!("No class folders found in {}", root.display());
        }

        let mut samples = Vec::new();
        let mut classes = Vec::with_capacity(class_dirs.len());
        for (label, dir) in class_dirs.iter().enumerate() {
            let mut files = Vec::new();
            collect_images_recursive(dir, &mut files)?;
            if files.is_empty() {
                anyhow::bail!("No image files found in class folder {}", dir.display());
            }
            debug!("class {} ({}): {} image(s)", label, dir.display(), files.len());
            samples.extend(files.into_iter().map(|path| (path, label)));
            classes.push(
                dir.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            );
        }

        Ok(Self {
            samples,
            classes,
            image_size,
            batch_size,
            normalization,
            cursor: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    fn load(&self, path: &Path) -> Result<Array3<f32>> {
        let size = self.image_size;
        let rgb = image::open(path)
            .with_context(|| format!("decoding {}", path.display()))?
            .resize_exact(size, size, FilterType::Triangle)
            .to_rgb8();

        let side = size as usize;
        let data = Array3::from_shape_fn((3, side, side), |(c, y, x)| {
            rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        let mut image = Image::new(data);
        self.normalization.normalize(&mut image);
        Ok(image.into_inner())
    }

    fn load_batch(&self, range: std::ops::Range<usize>) -> Result<ImageBatch> {
        let mut images = Vec::with_capacity(range.len());
        let mut labels = Vec::with_capacity(range.len());
        for (path, label) in &self.samples[range] {
            images.push(self.load(path)?);
            labels.push(*label);
        }
        let views: Vec<_> = images.iter().map(|a| a.view()).collect();
        let images = stack(Axis(0), &views).context("stacking batch")?;
        Ok(ImageBatch::new(images, labels))
    }
}

impl Iterator for FolderDataset {
    type Item = Result<ImageBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.samples.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.samples.len());
        let range = self.cursor..end;
        self.cursor = end;
        Some(self.load_batch(range))
    }
}
