//! Small synthetic datasets for smoke runs
//!
//! Class `k` lights up channel `k % 3` with an intensity band that depends on
//! `k / 3`, plus seeded noise, so the classes are linearly separable.

use image::{Rgb, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::dataset::{ImageItem, InMemoryDataset};

pub fn separable(
    num_classes: usize,
    per_class: usize,
    image_size: usize,
    seed: u64,
) -> InMemoryDataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let side = image_size as u32;
    let mut items = Vec::with_capacity(num_classes * per_class);

    for label in 0..num_classes {
        let channel = label % 3;
        let level = 255u32.saturating_sub(60 * (label / 3) as u32).max(60) as u8;
        for _ in 0..per_class {
            let image = RgbImage::from_fn(side, side, |_, _| {
                let mut pixel = Rgb([0u8; 3]);
                for (c, value) in pixel.0.iter_mut().enumerate() {
                    *value = if c == channel {
                        level.saturating_sub(rng.gen_range(0..16))
                    } else {
                        rng.gen_range(0..32)
                    };
                }
                pixel
            });
            items.push(ImageItem::new(image, label));
        }
    }

    InMemoryDataset::new(items, num_classes)
}
