use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::Array2;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PipelineError;

const HASH_SIZE: usize = 8;
const SAMPLE_SIZE: usize = 32;

/// 64-bit DCT perceptual hash of an image.
///
/// Near-duplicate images (re-encodes, small brightness shifts) land within a
/// few bits of each other, so equality is judged by Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// of_image computes the perceptual hash of an image.
    ///
    /// # Arguments
    /// * `image` - source image in any colour layout
    ///
    /// # Returns
    /// * `Fingerprint`
    pub fn of_image(image: &DynamicImage) -> Self {
        let gray = image.to_luma8();
        let small = imageops::resize(&gray, SAMPLE_SIZE as u32, SAMPLE_SIZE as u32, FilterType::Triangle);
        let pixels = Array2::from_shape_fn((SAMPLE_SIZE, SAMPLE_SIZE), |(row, col)| {
            small.get_pixel(col as u32, row as u32)[0] as f64
        });

        let basis = dct_basis();
        let low = basis.dot(&pixels).dot(&basis.t());

        let mut sorted: Vec<f64> = low.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let median = (sorted[mid - 1] + sorted[mid]) / 2.0;

        let bits = low
            .iter()
            .fold(0u64, |acc, &c| (acc << 1) | u64::from(c > median));
        Fingerprint(bits)
    }

    pub fn of_rgb(image: &RgbImage) -> Self {
        Self::of_image(&DynamicImage::ImageRgb8(image.clone()))
    }

    pub fn distance(&self, other: &Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// First `HASH_SIZE` rows of the orthonormal DCT-II matrix of size `SAMPLE_SIZE`.
fn dct_basis() -> Array2<f64> {
    let n = SAMPLE_SIZE as f64;
    Array2::from_shape_fn((HASH_SIZE, SAMPLE_SIZE), |(k, i)| {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        scale * (PI * (2.0 * i as f64 + 1.0) * k as f64 / (2.0 * n)).cos()
    })
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 {
            return Err(PipelineError::invalid(format!("fingerprint {s:?} is not 16 hex digits")));
        }
        u64::from_str_radix(s, 16)
            .map(Fingerprint)
            .map_err(|e| PipelineError::invalid(format!("fingerprint {s:?}: {e}")))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb};
    use ndarray_rand::rand::rngs::SmallRng;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    use super::*;

    /// 64x64 image of random 8x8 gray blocks, mostly low-frequency energy.
    fn blocky(seed: u64) -> RgbImage {
        let mut rng = SmallRng::seed_from_u64(seed);
        let blocks = Array2::random_using((8, 8), Uniform::new(20u8, 230u8), &mut rng);
        RgbImage::from_fn(64, 64, |x, y| {
            let v = blocks[[(y / 8) as usize, (x / 8) as usize]];
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_lossless_reencode_hashes_identically() {
        let img = blocky(7);
        let original = Fingerprint::of_rgb(&img);

        for format in [ImageFormat::Png, ImageFormat::Bmp] {
            let mut buf = Cursor::new(Vec::new());
            img.write_to(&mut buf, format).unwrap();
            let decoded = image::load_from_memory(buf.get_ref()).unwrap();
            assert_eq!(Fingerprint::of_image(&decoded), original);
        }
    }

    #[test]
    fn test_brightness_shift_stays_near() {
        let img = blocky(11);
        let mut brighter = img.clone();
        for p in brighter.pixels_mut() {
            for c in p.0.iter_mut() {
                *c += 6;
            }
        }
        let d = Fingerprint::of_rgb(&img).distance(&Fingerprint::of_rgb(&brighter));
        assert!(d <= 8, "distance {d}");
    }

    #[test]
    fn test_unrelated_images_are_far_apart() {
        let a = Fingerprint::of_rgb(&blocky(1));
        let b = Fingerprint::of_rgb(&blocky(2));
        assert!(a.distance(&b) > 8);
    }

    #[test]
    fn test_hex_round_trip_and_serde() {
        let fp = Fingerprint(0x00ff_0000_1234_abcd);
        assert_eq!(fp.to_string(), "00ff00001234abcd");
        assert_eq!("00ff00001234abcd".parse::<Fingerprint>().unwrap(), fp);
        assert!("abc".parse::<Fingerprint>().is_err());
        assert_eq!(serde_json::to_string(&fp).unwrap(), r#""00ff00001234abcd""#);
    }

    #[test]
    fn test_distance_counts_bits() {
        assert_eq!(Fingerprint(0b1011).distance(&Fingerprint(0b0001)), 2);
        assert_eq!(Fingerprint(0).distance(&Fingerprint(u64::MAX)), 64);
    }
}
