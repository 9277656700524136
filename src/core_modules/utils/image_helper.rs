pub mod image_helper {
    use crate::core_modules::frame_extractor::Frame;
    use crate::error::{Result, SpotError};
    use image::ImageEncoder;
    use std::io::BufWriter;
    use std::path::{Path, PathBuf};

    /// Writes an RGB frame to `path` as PNG.
    pub fn save_png(path: &Path, frame: &Frame) -> Result<()> {
        let output = BufWriter::new(std::fs::File::create(path)?);
        let encoder = image::codecs::png::PngEncoder::new(output);

        encoder
            .write_image(frame.as_raw(), frame.width(), frame.height(), image::ExtendedColorType::Rgb8)
            .map_err(SpotError::Encode)?;

        Ok(())
    }

    /// Overlay path for one page of an upload: `<dir>/<stem>_<ext>_p<page>_overlay.png`.
    /// The extension stays in the name so `leaf.png` and `leaf.tif` do not share a path.
    pub fn overlay_path(dir: &Path, file_name: &str, page: u32) -> PathBuf {
        let name = Path::new(file_name);
        let stem = name.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
        match name.extension().and_then(|e| e.to_str()) {
            Some(ext) => dir.join(format!("{stem}_{ext}_p{page}_overlay.png")),
            None => dir.join(format!("{stem}_p{page}_overlay.png")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::image_helper::*;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    #[test]
    fn saves_non_square_frames_with_correct_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let width = 64u32;
        let height = 24u32;
        let mut intensity = 0u8;
        let frame = RgbImage::from_fn(width, height, |_, _| {
            intensity = intensity.wrapping_add(1);
            Rgb([intensity, 255 - intensity, 0])
        });
        let path = dir.path().join("gradient_file.png");

        save_png(&path, &frame).expect("Error Saving File.");

        let read_back = image::open(&path).unwrap().to_rgb8();
        assert_eq!(read_back.dimensions(), (width, height));
        assert_eq!(read_back, frame);
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("white_file.png");
        let err = save_png(&path, &RgbImage::new(2, 2)).unwrap_err();
        assert!(matches!(err, crate::error::SpotError::Io(_)));
    }

    #[test]
    fn overlay_paths_keep_the_upload_stem() {
        let path = overlay_path(Path::new("/out"), "scans/leaf 03.tif", 2);
        assert_eq!(path, Path::new("/out/leaf 03_tif_p2_overlay.png"));
    }

    #[test]
    fn same_stem_with_different_extensions_gets_distinct_overlays() {
        let dir = Path::new("/out");
        let png = overlay_path(dir, "leaf.png", 1);
        let tif = overlay_path(dir, "leaf.tif", 1);
        assert_ne!(png, tif);
        assert_eq!(overlay_path(dir, "leaf", 1), Path::new("/out/leaf_p1_overlay.png"));
    }
}
