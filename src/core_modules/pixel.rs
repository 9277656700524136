// THEORY (single-pixel color transforms):
// The `pixel` module is the most fundamental unit of the spot engine. It holds the
// per-pixel color math that every higher layer builds on, with no knowledge of
// neighbors. Anything that needs a neighborhood (histograms, contours, clustering)
// lives in the modules above it.
//
// What lives here:
// - HSV in the 8-bit convention used by common vision toolkits:
//   • hue:        degrees / 2, so the full wheel fits in [0, 180)
//   • saturation: chroma / value scaled to [0, 255]
//   • value:      max(R, G, B)
// - YCbCr (full-range BT.601) as the luminance + chrominance split used by the
//   contrast normalizer. Chroma stays in `f32` so a round trip does not drift.
//
// Key principles:
// 1) Single-pixel scope: nothing here reads another pixel.
// 2) Integer inputs, deterministic rounding: the same RGB triple always maps to
//    the same HSV triple, which is what makes masks reproducible.

pub mod pixel {
    use image::Rgb;

    pub type Channel = u8;
    pub type Hue = u8;
    pub type Saturation = u8;
    pub type Value = u8;
    pub type Luma = f32;
    pub type Chroma = f32;

    /// Exclusive upper end of the 8-bit hue scale.
    pub const HUE_SCALE: u16 = 180;

    /// A pixel in 8-bit HSV space.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Hsv {
        /// Hue in [0, 180).
        pub hue: Hue,
        /// Saturation in [0, 255].
        pub saturation: Saturation,
        /// Value in [0, 255].
        pub value: Value,
    }

    /// A pixel split into luma and two chroma-difference channels.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct YCbCr {
        pub luma: Luma,
        pub cb: Chroma,
        pub cr: Chroma,
    }

    impl Hsv {
        pub fn from_rgb(red: Channel, green: Channel, blue: Channel) -> Self {
            let r = red as i32;
            let g = green as i32;
            let b = blue as i32;

            let value = r.max(g).max(b);
            let min = r.min(g).min(b);
            let chroma = value - min;

            let saturation = if value == 0 {
                0
            } else {
                ((255 * chroma) as f32 / value as f32).round() as i32
            };

            let hue = if chroma == 0 {
                0.0
            } else {
                let degrees = if value == r {
                    60.0 * (g - b) as f32 / chroma as f32
                } else if value == g {
                    120.0 + 60.0 * (b - r) as f32 / chroma as f32
                } else {
                    240.0 + 60.0 * (r - g) as f32 / chroma as f32
                };
                let degrees = if degrees < 0.0 { degrees + 360.0 } else { degrees };
                (degrees / 2.0).round()
            };

            // 359.x degrees rounds up onto the seam; wrap it back to red.
            let hue = (hue as u16) % HUE_SCALE;

            Self {
                hue: hue as Hue,
                saturation: saturation as Saturation,
                value: value as Value,
            }
        }

        pub fn from_pixel(pixel: &Rgb<u8>) -> Self {
            let [r, g, b] = pixel.0;
            Self::from_rgb(r, g, b)
        }
    }

    impl YCbCr {
        pub fn from_pixel(pixel: &Rgb<u8>) -> Self {
            let [r, g, b] = pixel.0;
            let (r, g, b) = (r as f32, g as f32, b as f32);
            let luma = 0.299 * r + 0.587 * g + 0.114 * b;
            Self {
                luma,
                cb: 128.0 + (b - luma) * 0.564,
                cr: 128.0 + (r - luma) * 0.713,
            }
        }

        /// Rebuilds an RGB pixel from a (possibly replaced) luma and the stored chroma.
        pub fn to_pixel(self) -> Rgb<u8> {
            let cb = self.cb - 128.0;
            let cr = self.cr - 128.0;
            let r = self.luma + 1.403 * cr;
            let g = self.luma - 0.714 * cr - 0.344 * cb;
            let b = self.luma + 1.773 * cb;
            Rgb([to_channel(r), to_channel(g), to_channel(b)])
        }

        pub fn with_luma(self, luma: Luma) -> Self {
            Self { luma, ..self }
        }
    }

    #[inline]
    fn to_channel(v: f32) -> Channel {
        v.round().clamp(0.0, 255.0) as Channel
    }
}
