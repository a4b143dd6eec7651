//! CIFAR-10 binary format loader
//!
//! Each record of `data_batch_{1..5}.bin` / `test_batch.bin` is one label byte
//! followed by 3072 pixel bytes (1024 red, 1024 green, 1024 blue, row-major).

use std::fs;
use std::path::{Path, PathBuf};

use image::{
    imageops::{self, FilterType},
    Rgb, RgbImage,
};
use tracing::{debug, info};

use crate::dataset::{ImageItem, InMemoryDataset, Split};
use crate::utils::error::{AnodeError, Result};

pub const NUM_CLASSES: usize = 10;
pub const NATIVE_SIZE: usize = 32;
const PIXELS_PER_IMAGE: usize = 3 * NATIVE_SIZE * NATIVE_SIZE;
const RECORD_LEN: usize = 1 + PIXELS_PER_IMAGE;

/// CIFAR-10 class names
pub const CLASS_NAMES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

fn batch_files(split: Split) -> Vec<String> {
    match split {
        Split::Train => (1..=5).map(|i| format!("data_batch_{}.bin", i)).collect(),
        Split::Test => vec!["test_batch.bin".to_string()],
    }
}

/// Directory holding the batch files: `root/cifar-10-batches-bin` or `root` itself
pub fn locate(root: &Path) -> Result<PathBuf> {
    let nested = root.join("cifar-10-batches-bin");
    [nested, root.to_path_buf()]
        .into_iter()
        .find(|dir| dir.join("test_batch.bin").is_file())
        .ok_or_else(|| {
            AnodeError::Dataset(format!(
                "no CIFAR-10 binary batches under {} (expected test_batch.bin)",
                root.display()
            ))
        })
}

/// Parse the records of one batch file
pub fn parse_batch(bytes: &[u8]) -> Result<Vec<ImageItem>> {
    if bytes.len() % RECORD_LEN != 0 {
        return Err(AnodeError::Dataset(format!(
            "CIFAR-10 batch has {} bytes, not a multiple of {}",
            bytes.len(),
            RECORD_LEN
        )));
    }

    bytes
        .chunks_exact(RECORD_LEN)
        .map(|record| {
            let label = record[0] as usize;
            if label >= NUM_CLASSES {
                return Err(AnodeError::Dataset(format!("CIFAR-10 label {} out of range", label)));
            }
            Ok(ImageItem::new(planar_to_rgb(&record[1..]), label))
        })
        .collect()
}

/// Load one split, resizing when `image_size` differs from 32
pub fn load_split(root: &Path, split: Split, image_size: usize) -> Result<InMemoryDataset> {
    let dir = locate(root)?;
    let mut items = Vec::new();

    for name in batch_files(split) {
        let path = dir.join(&name);
        let bytes = fs::read(&path)?;
        let batch = parse_batch(&bytes)?;
        debug!("Read {} images from {}", batch.len(), path.display());
        items.extend(batch);
    }

    if image_size != NATIVE_SIZE {
        let side = image_size as u32;
        for item in &mut items {
            item.image = imageops::resize(&item.image, side, side, FilterType::Triangle);
        }
    }

    info!("Loaded CIFAR-10 {:?} split: {} images", split, items.len());
    Ok(InMemoryDataset::new(items, NUM_CLASSES))
}

/// Planar R, G, B bytes of one record as an image
fn planar_to_rgb(pixels: &[u8]) -> RgbImage {
    let plane = NATIVE_SIZE * NATIVE_SIZE;
    RgbImage::from_fn(NATIVE_SIZE as u32, NATIVE_SIZE as u32, |x, y| {
        let offset = y as usize * NATIVE_SIZE + x as usize;
        Rgb([
            pixels[offset],
            pixels[plane + offset],
            pixels[2 * plane + offset],
        ])
    })
}
