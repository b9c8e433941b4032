pub mod image_helper {
    use crate::core_modules::image_tensor::Image;
    use anyhow::{Context, Result, bail};
    use image::ImageEncoder;
    use std::io::BufWriter;
    use std::path::Path;

    /// JPEG quality matching the common tensor-to-file savers.
    pub const JPEG_QUALITY: u8 = 75;

    /// Writes display-ready images to files.
    pub trait ImageSink: Send + Sync {
        fn write(&self, image: &Image, path: &Path) -> Result<()>;
    }

    /// Encodes to JPEG or PNG depending on the path's extension.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FileSink;

    impl ImageSink for FileSink {
        fn write(&self, image: &Image, path: &Path) -> Result<()> {
            save(path, image)
        }
    }

    /// Quantizes a C x H x W float image in [0, 1] to interleaved RGB bytes.
    /// Values are scaled by 255, offset by 0.5, clamped, then truncated.
    pub fn to_rgb8(image: &Image) -> Result<Vec<u8>> {
        let channels = image.channels();
        if channels != 1 && channels != 3 {
            bail!("cannot encode an image with {channels} channels");
        }
        let (height, width) = (image.height(), image.width());
        let mut buffer = Vec::with_capacity(height * width * 3);
        for y in 0..height {
            for x in 0..width {
                for c in 0..3 {
                    let value = image.get(c % channels, y, x);
                    buffer.push((value * 255.0 + 0.5).clamp(0.0, 255.0) as u8);
                }
            }
        }
        Ok(buffer)
    }

    pub fn save(path: &Path, image: &Image) -> Result<()> {
        let buffer = to_rgb8(image)?;
        let (width, height) = (image.width() as u32, image.height() as u32);
        let output = BufWriter::new(
            std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?,
        );

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "jpg" | "jpeg" => image::codecs::jpeg::JpegEncoder::new_with_quality(output, JPEG_QUALITY)
                .write_image(&buffer, width, height, image::ExtendedColorType::Rgb8)?,
            "png" => image::codecs::png::PngEncoder::new(output).write_image(
                &buffer,
                width,
                height,
                image::ExtendedColorType::Rgb8,
            )?,
            other => bail!("unsupported output extension: {other:?}"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::image_helper::*;
    use crate::core_modules::image_tensor::Image;
    use ndarray::Array3;

    #[test]
    fn quantizes_with_rounding_and_clamping() {
        let data = Array3::from_shape_vec((3, 1, 2), vec![0.0, 1.0, 0.5, -0.2, 1.3, 0.1]).unwrap();
        let bytes = to_rgb8(&Image::new(data)).unwrap();
        assert_eq!(bytes, vec![0, 128, 255, 255, 0, 26]);
    }

    #[test]
    fn save_white_file() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("white_file.png");
        let image = Image::new(Array3::from_elem((3, 50, 40), 1.0));

        FileSink.write(&image, &name).expect("Error Saving File.");

        let decoded = image::open(&name).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (40, 50));
        assert!(decoded.pixels().all(|p| p.0 == [255, 255, 255]));
    }

    #[test]
    fn save_gradient_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("gradient_file.jpeg");
        let image = Image::new(Array3::from_shape_fn((3, 32, 32), |(_, y, x)| {
            ((y * 32 + x) % 255) as f32 / 255.0
        }));

        save(&name, &image).expect("Error Saving File.");
        assert_eq!(image::image_dimensions(&name).unwrap(), (32, 32));
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let image = Image::new(Array3::zeros((3, 2, 2)));
        assert!(save(&dir.path().join("out.xyz"), &image).is_err());
    }
}
