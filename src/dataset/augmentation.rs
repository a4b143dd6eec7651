//! Data Augmentation Module
//!
//! Training-time augmentation on RGB images: random crop after zero padding,
//! then a random horizontal flip.
//!
//! # Augmentation Strategy
//!
//! - **Training**: pad-and-crop plus horizontal flip
//! - **Test**: no augmentation, normalization only

use image::{imageops, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::dataset::ImageItem;

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq)]
pub struct AugmentationConfig {
    /// Zero padding added on every side before cropping back to size
    pub crop_padding: u32,
    /// Probability of applying horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            crop_padding: 4,
            horizontal_flip_prob: 0.5,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            crop_padding: 0,
            horizontal_flip_prob: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.crop_padding == 0 && self.horizontal_flip_prob <= 0.0
    }
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Augment one item in place
    pub fn augment(&self, item: &mut ImageItem, rng: &mut ChaCha8Rng) {
        if self.config.crop_padding > 0 {
            let span = 2 * self.config.crop_padding;
            let top = rng.gen_range(0..=span);
            let left = rng.gen_range(0..=span);
            item.image = padded_crop(&item.image, self.config.crop_padding, top, left);
        }

        if rng.gen::<f32>() < self.config.horizontal_flip_prob {
            imageops::flip_horizontal_in_place(&mut item.image);
        }
    }
}

/// Zero-pad by `padding` on every side, then cut the original size back out
/// with its corner at (`left`, `top`) of the padded canvas
pub fn padded_crop(image: &RgbImage, padding: u32, top: u32, left: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut canvas = RgbImage::new(width + 2 * padding, height + 2 * padding);
    imageops::overlay(&mut canvas, image, i64::from(padding), i64::from(padding));
    imageops::crop_imm(&canvas, left, top, width, height).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::SeedableRng;

    fn ramp(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            let v = ((y * size + x) as u8).wrapping_add(1);
            Rgb([v, v.wrapping_add(50), v.wrapping_add(100)])
        })
    }

    #[test]
    fn test_centered_crop_is_identity() {
        let image = ramp(8);
        assert_eq!(padded_crop(&image, 4, 4, 4), image);
    }

    #[test]
    fn test_corner_crop_shifts_in_zeros() {
        let image = ramp(4);
        let out = padded_crop(&image, 2, 0, 0);

        assert_eq!(out.dimensions(), (4, 4));
        // The first two rows and columns come from padding
        assert_eq!(*out.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*out.get_pixel(1, 1), Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(2, 2), image.get_pixel(0, 0));
        assert_eq!(out.get_pixel(3, 3), image.get_pixel(1, 1));
    }

    #[test]
    fn test_augment_keeps_geometry_and_label() {
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..10 {
            let mut item = ImageItem::new(ramp(32), 3);
            augmenter.augment(&mut item, &mut rng);
            assert_eq!(item.image.dimensions(), (32, 32));
            assert_eq!(item.label, 3);
        }
    }

    #[test]
    fn test_certain_flip_mirrors_rows() {
        let augmenter = Augmenter::new(AugmentationConfig {
            crop_padding: 0,
            horizontal_flip_prob: 1.0,
        });
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut item = ImageItem::new(ramp(3), 0);
        augmenter.augment(&mut item, &mut rng);

        let original = ramp(3);
        assert_eq!(item.image.get_pixel(0, 1), original.get_pixel(2, 1));
        assert_eq!(item.image.get_pixel(2, 0), original.get_pixel(0, 0));
    }

    #[test]
    fn test_none_config_leaves_pixels() {
        let augmenter = Augmenter::new(AugmentationConfig::none());
        assert!(augmenter.config().is_identity());

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut item = ImageItem::new(ramp(8), 0);
        augmenter.augment(&mut item, &mut rng);
        assert_eq!(item.image, ramp(8));
    }
}
