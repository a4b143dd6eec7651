//! Dataset providers
//!
//! Every provider loads a train and a test split fully into memory as RGB
//! images. Augmentation is applied per batch to the train split only; the
//! batcher converts to channel-major floats and normalizes both splits.

pub mod augmentation;
pub mod burn_dataset;
pub mod cifar10;
pub mod folder;
pub mod synthetic;

use std::fmt;
use std::path::Path;

use clap::ValueEnum;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::utils::error::{AnodeError, Result};

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{ImageBatch, ImageBatcher, ImageItem, InMemoryDataset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

/// Which dataset to train on; also fixes the number of classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum DatasetKind {
    #[serde(rename = "CIFAR10")]
    #[value(name = "CIFAR10")]
    Cifar10,
    #[serde(rename = "GalaxyZoo")]
    #[value(name = "GalaxyZoo")]
    GalaxyZoo,
    #[serde(rename = "MTVSO")]
    #[value(name = "MTVSO")]
    Mtvso,
}

impl DatasetKind {
    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::Cifar10 => "CIFAR10",
            DatasetKind::GalaxyZoo => "GalaxyZoo",
            DatasetKind::Mtvso => "MTVSO",
        }
    }

    pub fn num_classes(&self) -> usize {
        match self {
            DatasetKind::Mtvso => 20,
            DatasetKind::Cifar10 | DatasetKind::GalaxyZoo => 10,
        }
    }

    /// Load one split from `data_dir`
    pub fn load(&self, data_dir: &Path, split: Split, image_size: usize) -> Result<InMemoryDataset> {
        let dataset = match self {
            DatasetKind::Cifar10 => cifar10::load_split(data_dir, split, image_size)?,
            DatasetKind::GalaxyZoo | DatasetKind::Mtvso => {
                folder::load_split(&data_dir.join(self.name()), split, image_size)?
            }
        };

        if dataset.num_classes() > self.num_classes() {
            return Err(AnodeError::Dataset(format!(
                "{} expects {} classes but found {}",
                self,
                self.num_classes(),
                dataset.num_classes()
            )));
        }
        Ok(dataset)
    }

    pub fn load_splits(&self, data_dir: &Path, image_size: usize) -> Result<DataSplits> {
        let train = self.load(data_dir, Split::Train, image_size)?;
        let test = self.load(data_dir, Split::Test, image_size)?;
        info!(
            "{}: {} train / {} test images",
            self,
            burn::data::dataset::Dataset::len(&train),
            burn::data::dataset::Dataset::len(&test)
        );
        debug!("{} train class counts: {:?}", self, train.class_distribution());
        Ok(DataSplits { train, test })
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Train and test splits of one dataset
#[derive(Clone, Debug)]
pub struct DataSplits {
    pub train: InMemoryDataset,
    pub test: InMemoryDataset,
}

/// Interleaved RGB to channel-major bytes
pub fn rgb_to_chw(img: &RgbImage) -> Vec<u8> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut out = vec![0u8; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        out[offset] = pixel[0];
        out[plane + offset] = pixel[1];
        out[2 * plane + offset] = pixel[2];
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_num_classes() {
        assert_eq!(DatasetKind::Cifar10.num_classes(), 10);
        assert_eq!(DatasetKind::GalaxyZoo.num_classes(), 10);
        assert_eq!(DatasetKind::Mtvso.num_classes(), 20);
    }

    #[test]
    fn test_rgb_to_chw() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([1, 2, 3]));
        img.put_pixel(1, 0, Rgb([4, 5, 6]));
        assert_eq!(rgb_to_chw(&img), vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_folder_dataset_under_named_dir() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let class_dir = temp_dir.path().join("GalaxyZoo/train/round");
        std::fs::create_dir_all(&class_dir).unwrap();
        RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]))
            .save(class_dir.join("x.png"))
            .unwrap();

        let train = DatasetKind::GalaxyZoo
            .load(temp_dir.path(), Split::Train, 4)
            .unwrap();
        assert_eq!(train.num_classes(), 1);
    }
}
