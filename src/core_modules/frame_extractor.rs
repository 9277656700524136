// THEORY:
// The `frame_extractor` is the entry point of raw data into the spot engine. An
// upload is an opaque byte stream; this module is responsible for turning it into
// an ordered sequence of RGB frames that every later stage can treat identically.
//
// Key architectural principles:
// 1.  **Pages Are Frames**: Animated GIF, APNG, animated WebP and multi-page TIFF
//     all yield one frame per page, in container order. Every other format the
//     `image` crate understands yields exactly one frame.
// 2.  **Lazy, Single Pass**: The returned `FrameSequence` decodes one page at a
//     time and cannot be rewound. A caller that wants to stop early simply drops
//     it; no further pages are decoded.
// 3.  **Uniform Pixel Format**: Alpha is discarded and gray is expanded, so every
//     frame is 8-bit RGB regardless of the container's native layout.
// 4.  **Failures Are Scoped**: A corrupt or unsupported container produces a
//     `Decode` error naming the file. A page that fails mid-sequence is yielded as
//     an error item and ends the sequence.

use crate::error::{Result, SpotError};
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{
    AnimationDecoder, DynamicImage, GrayImage, ImageBuffer, ImageFormat, Rgb32FImage, RgbImage, Rgba32FImage, RgbaImage,
};
use std::io::Cursor;
use tiff::ColorType;
use tiff::decoder::{Decoder as TiffDecoder, DecodingResult};
use tracing::debug;

/// A decoded raster: 3 channels, 8 bits per channel, RGB order.
pub type Frame = RgbImage;

type FrameIter<'a> = Box<dyn Iterator<Item = Result<Frame>> + 'a>;

/// An ordered, finite, non-restartable sequence of frames from one upload.
pub struct FrameSequence<'a> {
    file_name: String,
    format: ImageFormat,
    frames: FrameIter<'a>,
    finished: bool,
}

impl<'a> FrameSequence<'a> {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }
}

impl Iterator for FrameSequence<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = self.frames.next();
        // An error ends the sequence; a half-decoded container is not resumed.
        if matches!(item, None | Some(Err(_))) {
            self.finished = true;
        }
        item
    }
}

pub mod frame_extractor {
    use super::*;

    /// Opens `bytes` as an image container and returns its frames.
    pub fn extract_frames<'a>(file_name: &str, bytes: &'a [u8]) -> Result<FrameSequence<'a>> {
        let format = image::guess_format(bytes).map_err(|e| SpotError::decode(file_name, e))?;
        debug!(file_name, ?format, "opening image container");

        let frames: FrameIter<'a> = match format {
            ImageFormat::Gif => {
                let decoder = GifDecoder::new(Cursor::new(bytes))
                    .map_err(|e| SpotError::decode(file_name, e))?;
                animation(file_name, decoder.into_frames())
            }
            ImageFormat::Png => {
                let decoder = PngDecoder::new(Cursor::new(bytes))
                    .map_err(|e| SpotError::decode(file_name, e))?;
                if decoder.is_apng().map_err(|e| SpotError::decode(file_name, e))? {
                    let apng = decoder.apng().map_err(|e| SpotError::decode(file_name, e))?;
                    animation(file_name, apng.into_frames())
                } else {
                    single(file_name, DynamicImage::from_decoder(decoder))?
                }
            }
            ImageFormat::WebP => {
                let decoder = WebPDecoder::new(Cursor::new(bytes))
                    .map_err(|e| SpotError::decode(file_name, e))?;
                if decoder.has_animation() {
                    animation(file_name, decoder.into_frames())
                } else {
                    single(file_name, DynamicImage::from_decoder(decoder))?
                }
            }
            ImageFormat::Tiff => Box::new(TiffPages::open(file_name, bytes)?),
            other => single(file_name, image::load_from_memory_with_format(bytes, other))?,
        };

        Ok(FrameSequence {
            file_name: file_name.to_string(),
            format,
            frames,
            finished: false,
        })
    }

    /// Decodes every frame of `bytes` eagerly.
    pub fn extract_all(file_name: &str, bytes: &[u8]) -> Result<Vec<Frame>> {
        extract_frames(file_name, bytes)?.collect()
    }

    fn single<'a>(file_name: &str, decoded: image::ImageResult<DynamicImage>) -> Result<FrameIter<'a>> {
        let frame = decoded.map_err(|e| SpotError::decode(file_name, e))?.to_rgb8();
        Ok(Box::new(std::iter::once(Ok(frame))))
    }

    fn animation<'a>(file_name: &str, frames: image::Frames<'a>) -> FrameIter<'a> {
        let file_name = file_name.to_string();
        Box::new(frames.map(move |frame| {
            frame
                .map(|f| DynamicImage::ImageRgba8(f.into_buffer()).to_rgb8())
                .map_err(|e| SpotError::decode(file_name.clone(), e))
        }))
    }
}

/// Why a TIFF page could not be turned into a frame.
enum PageError {
    /// A well-formed page in a sample layout the walker does not convert itself.
    Unsupported(String),
    Broken(String),
}

fn broken(e: tiff::TiffError) -> PageError {
    PageError::Broken(e.to_string())
}

/// Walks the image file directories of a TIFF, one page per step.
struct TiffPages<'a> {
    file_name: String,
    bytes: &'a [u8],
    decoder: Option<TiffDecoder<Cursor<&'a [u8]>>>,
    page: usize,
}

impl<'a> TiffPages<'a> {
    fn open(file_name: &str, bytes: &'a [u8]) -> Result<Self> {
        let decoder = TiffDecoder::new(Cursor::new(bytes))
            .map_err(|e| SpotError::decode_message(file_name, e.to_string()))?;
        Ok(Self {
            file_name: file_name.to_string(),
            bytes,
            decoder: Some(decoder),
            page: 0,
        })
    }

    fn read_page(decoder: &mut TiffDecoder<Cursor<&'a [u8]>>) -> std::result::Result<Frame, PageError> {
        let (width, height) = decoder.dimensions().map_err(broken)?;
        let color_type = decoder.colortype().map_err(broken)?;
        let data = decoder.read_image().map_err(broken)?;

        let image = match (color_type, data) {
            (ColorType::Gray(8), DecodingResult::U8(buf)) => {
                GrayImage::from_raw(width, height, buf).map(DynamicImage::ImageLuma8)
            }
            (ColorType::GrayA(8), DecodingResult::U8(buf)) => {
                ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageLumaA8)
            }
            (ColorType::RGB(8), DecodingResult::U8(buf)) => {
                RgbImage::from_raw(width, height, buf).map(DynamicImage::ImageRgb8)
            }
            (ColorType::RGBA(8), DecodingResult::U8(buf)) => {
                RgbaImage::from_raw(width, height, buf).map(DynamicImage::ImageRgba8)
            }
            (ColorType::CMYK(8), DecodingResult::U8(buf)) => {
                RgbImage::from_raw(width, height, cmyk_to_rgb(&buf)).map(DynamicImage::ImageRgb8)
            }
            (ColorType::Gray(16), DecodingResult::U16(buf)) => {
                ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageLuma16)
            }
            (ColorType::GrayA(16), DecodingResult::U16(buf)) => {
                ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageLumaA16)
            }
            (ColorType::RGB(16), DecodingResult::U16(buf)) => {
                ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageRgb16)
            }
            (ColorType::RGBA(16), DecodingResult::U16(buf)) => {
                ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageRgba16)
            }
            (ColorType::CMYK(16), DecodingResult::U16(buf)) => {
                let narrowed: Vec<u8> = buf.iter().map(|&s| u16_to_u8(s)).collect();
                RgbImage::from_raw(width, height, cmyk_to_rgb(&narrowed)).map(DynamicImage::ImageRgb8)
            }
            (ColorType::Gray(32), DecodingResult::F32(buf)) => {
                Rgb32FImage::from_raw(width, height, gray_to_rgb(&buf, 1)).map(DynamicImage::ImageRgb32F)
            }
            (ColorType::GrayA(32), DecodingResult::F32(buf)) => {
                Rgb32FImage::from_raw(width, height, gray_to_rgb(&buf, 2)).map(DynamicImage::ImageRgb32F)
            }
            (ColorType::RGB(32), DecodingResult::F32(buf)) => {
                Rgb32FImage::from_raw(width, height, buf).map(DynamicImage::ImageRgb32F)
            }
            (ColorType::RGBA(32), DecodingResult::F32(buf)) => {
                Rgba32FImage::from_raw(width, height, buf).map(DynamicImage::ImageRgba32F)
            }
            (other, _) => return Err(PageError::Unsupported(format!("unsupported TIFF page layout {other:?}"))),
        };

        // 16-bit and float samples are scaled to 0..=255 by `image`'s own conversions.
        image
            .map(|img| img.to_rgb8())
            .ok_or_else(|| PageError::Broken("TIFF page buffer does not match its dimensions".to_string()))
    }

    /// Decodes the first page through the `image` crate's TIFF codec.
    fn first_page_fallback(&self) -> Result<Frame> {
        image::load_from_memory_with_format(self.bytes, ImageFormat::Tiff)
            .map(|img| img.to_rgb8())
            .map_err(|e| SpotError::decode(&self.file_name, e))
    }
}

fn u16_to_u8(sample: u16) -> u8 {
    ((u32::from(sample) * 255 + 32_767) / 65_535) as u8
}

/// Inks to light: each channel is `(255 - ink) * (1 - k / 255)`.
fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    cmyk.chunks_exact(4)
        .flat_map(|px| {
            let k = 1.0 - f32::from(px[3]) / 255.0;
            [0, 1, 2].map(|i| ((255.0 - f32::from(px[i])) * k) as u8)
        })
        .collect()
}

/// Repeats the first sample of every `stride`-wide gray pixel into three channels.
fn gray_to_rgb(samples: &[f32], stride: usize) -> Vec<f32> {
    samples.chunks_exact(stride).flat_map(|px| [px[0]; 3]).collect()
}

impl Iterator for TiffPages<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        let decoder = self.decoder.as_mut()?;
        if self.page > 0 {
            if !decoder.more_images() {
                self.decoder = None;
                return None;
            }
            if let Err(e) = decoder.next_image() {
                self.decoder = None;
                return Some(Err(SpotError::decode_message(&self.file_name, e.to_string())));
            }
        }
        let page = self.page;
        self.page += 1;

        match Self::read_page(decoder) {
            Ok(frame) => Some(Ok(frame)),
            Err(PageError::Unsupported(message)) if page == 0 => {
                debug!(file_name = %self.file_name, %message, "decoding first TIFF page through image");
                let frame = self.first_page_fallback();
                if frame.is_err() {
                    self.decoder = None;
                }
                Some(frame)
            }
            Err(PageError::Unsupported(message) | PageError::Broken(message)) => {
                self.decoder = None;
                Some(Err(SpotError::decode_message(&self.file_name, message)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::frame_extractor::*;
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Rgb, Rgba};

    fn encode(frame: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        frame.write_to(&mut Cursor::new(&mut bytes), format).expect("encode");
        bytes
    }

    #[test]
    fn single_png_yields_one_rgb_frame() {
        let rgba = RgbaImage::from_pixel(8, 6, Rgba([10, 20, 30, 40]));
        let bytes = encode(&DynamicImage::ImageRgba8(rgba), ImageFormat::Png);

        let frames = extract_all("one.png", &bytes).expect("decodes");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].dimensions(), (8, 6));
        assert_eq!(frames[0].get_pixel(3, 3), &Rgb([10, 20, 30]));
    }

    #[test]
    fn gray_input_is_expanded_to_rgb() {
        let gray = GrayImage::from_pixel(4, 4, image::Luma([99]));
        let bytes = encode(&DynamicImage::ImageLuma8(gray), ImageFormat::Png);
        let frames = extract_all("gray.png", &bytes).unwrap();
        assert_eq!(frames[0].get_pixel(0, 0), &Rgb([99, 99, 99]));
    }

    #[test]
    fn animated_gif_yields_one_frame_per_page() {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            let pages = [Rgba([255, 0, 0, 255]), Rgba([0, 255, 0, 255]), Rgba([0, 0, 255, 255])]
                .into_iter()
                .map(|c| {
                    let delay = Delay::from_numer_denom_ms(100, 1);
                    image::Frame::from_parts(RgbaImage::from_pixel(5, 5, c), 0, 0, delay)
                });
            encoder.encode_frames(pages).expect("encode gif");
        }

        let sequence = extract_frames("pages.gif", &bytes).unwrap();
        assert_eq!(sequence.format(), ImageFormat::Gif);
        assert_eq!(sequence.file_name(), "pages.gif");
        let frames: Vec<Frame> = sequence.collect::<Result<_>>().unwrap();
        assert_eq!(frames.len(), 3);
        // GIF palettes are quantized, so only check which channel dominates.
        let [r, g, b] = frames[0].get_pixel(2, 2).0;
        assert!(r > 200 && g < 50 && b < 50);
        let [r, g, b] = frames[2].get_pixel(2, 2).0;
        assert!(b > 200 && r < 50 && g < 50);
    }

    #[test]
    fn multi_page_tiff_yields_every_page() {
        use tiff::encoder::{TiffEncoder, colortype};

        let mut bytes = Vec::new();
        {
            let mut encoder = TiffEncoder::new(Cursor::new(&mut bytes)).unwrap();
            for shade in [40u8, 160u8] {
                let page = vec![shade; 3 * 4 * 3];
                encoder.write_image::<colortype::RGB8>(4, 3, &page).unwrap();
            }
        }

        let frames = extract_all("stack.tif", &bytes).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].get_pixel(1, 1), &Rgb([40, 40, 40]));
        assert_eq!(frames[1].get_pixel(1, 1), &Rgb([160, 160, 160]));
    }

    /// Encodes one 4x3 page with `write` into TIFF bytes.
    fn single_page_tiff(write: impl FnOnce(&mut tiff::encoder::TiffEncoder<Cursor<&mut Vec<u8>>>)) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut encoder = tiff::encoder::TiffEncoder::new(Cursor::new(&mut bytes)).unwrap();
            write(&mut encoder);
        }
        bytes
    }

    #[test]
    fn sixteen_bit_rgba_tiff_is_scaled_to_eight_bits() {
        use tiff::encoder::colortype::RGBA16;
        let samples: Vec<u16> = [65_535u16, 32_896, 0, 65_535].repeat(12);
        let bytes = single_page_tiff(|e| e.write_image::<RGBA16>(4, 3, &samples).unwrap());
        let frames = extract_all("scan16.tif", &bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].get_pixel(2, 1), &Rgb([255, 128, 0]));
    }

    #[test]
    fn cmyk_tiff_is_converted_to_rgb() {
        use tiff::encoder::colortype::CMYK8;
        // Paper white, full magenta + yellow (red), full black, then repeat.
        let pixels: [[u8; 4]; 3] = [[0, 0, 0, 0], [0, 255, 255, 0], [0, 0, 0, 255]];
        let samples: Vec<u8> = pixels.iter().cycle().take(12).flatten().copied().collect();
        let bytes = single_page_tiff(|e| e.write_image::<CMYK8>(4, 3, &samples).unwrap());
        let frames = extract_all("print.tif", &bytes).unwrap();
        assert_eq!(frames[0].get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(frames[0].get_pixel(1, 0), &Rgb([255, 0, 0]));
        assert_eq!(frames[0].get_pixel(2, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn float_tiffs_are_scaled_from_unit_range() {
        use tiff::encoder::colortype::{Gray32Float, RGB32Float};
        let rgb: Vec<f32> = [1.0f32, 0.5, 0.0].repeat(12);
        let bytes = single_page_tiff(|e| e.write_image::<RGB32Float>(4, 3, &rgb).unwrap());
        let frames = extract_all("float.tif", &bytes).unwrap();
        assert_eq!(frames[0].get_pixel(3, 2), &Rgb([255, 128, 0]));

        let gray = vec![0.25f32; 12];
        let bytes = single_page_tiff(|e| e.write_image::<Gray32Float>(4, 3, &gray).unwrap());
        let frames = extract_all("gray-float.tif", &bytes).unwrap();
        let [r, g, b] = frames[0].get_pixel(0, 0).0;
        assert_eq!((r, g), (g, b));
        assert!((63..=64).contains(&r), "{r}");
    }

    #[test]
    fn mixed_layout_pages_all_decode() {
        use tiff::encoder::{TiffEncoder, colortype};

        let mut bytes = Vec::new();
        {
            let mut encoder = TiffEncoder::new(Cursor::new(&mut bytes)).unwrap();
            encoder.write_image::<colortype::CMYK8>(2, 2, &[0, 255, 255, 0].repeat(4)).unwrap();
            encoder.write_image::<colortype::Gray16>(2, 2, &[65_535u16; 4]).unwrap();
        }
        let frames = extract_all("mixed.tif", &bytes).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].get_pixel(1, 1), &Rgb([255, 0, 0]));
        assert_eq!(frames[1].get_pixel(1, 1), &Rgb([255, 255, 255]));
    }

    #[test]
    fn garbage_bytes_are_a_decode_error_naming_the_file() {
        let err = extract_frames("notes.txt", b"definitely not an image").err().unwrap();
        assert!(err.is_per_file());
        assert!(err.to_string().contains("notes.txt"));
    }

    #[test]
    fn truncated_png_is_a_decode_error() {
        let bytes = encode(&DynamicImage::ImageRgb8(RgbImage::new(32, 32)), ImageFormat::Png);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(extract_all("cut.png", truncated).is_err());
    }
}
