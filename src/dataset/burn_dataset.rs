//! Burn Dataset Integration
//!
//! In-memory datasets implementing Burn's `Dataset` trait and the batcher that
//! turns RGB images into normalized `[batch, 3, H, W]` tensors.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::RgbImage;

use crate::dataset::rgb_to_chw;

/// Per-channel mean of the CIFAR-10 training set
pub const CIFAR_MEAN: [f32; 3] = [0.4914, 0.4822, 0.4465];
/// Per-channel standard deviation used with [`CIFAR_MEAN`]
pub const CIFAR_STD: [f32; 3] = [0.2023, 0.1994, 0.2010];

/// A single labeled image
#[derive(Clone, Debug, PartialEq)]
pub struct ImageItem {
    pub image: RgbImage,
    pub label: usize,
}

impl ImageItem {
    pub fn new(image: RgbImage, label: usize) -> Self {
        Self { image, label }
    }

    /// Side length; items are square
    pub fn size(&self) -> usize {
        self.image.width() as usize
    }
}

/// A fully loaded split
#[derive(Clone, Debug, Default)]
pub struct InMemoryDataset {
    items: Vec<ImageItem>,
    num_classes: usize,
}

impl InMemoryDataset {
    pub fn new(items: Vec<ImageItem>, num_classes: usize) -> Self {
        Self { items, num_classes }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Get samples per class count
    pub fn class_distribution(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.num_classes];
        for item in &self.items {
            if item.label < self.num_classes {
                counts[item.label] += 1;
            }
        }
        counts
    }

    /// Items at the given indices, in index order
    pub fn gather(&self, indices: &[usize]) -> Vec<ImageItem> {
        indices.iter().filter_map(|&i| self.items.get(i).cloned()).collect()
    }
}

impl Dataset<ImageItem> for InMemoryDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of images with their labels
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Batch of images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Batch of labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Batcher scaling pixels to [0, 1] and normalizing per channel
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImageBatcher {
    /// Batcher with CIFAR-10 normalization statistics
    pub fn new(image_size: usize) -> Self {
        Self::with_normalization(image_size, CIFAR_MEAN, CIFAR_STD)
    }

    pub fn with_normalization(image_size: usize, mean: [f32; 3], std: [f32; 3]) -> Self {
        Self {
            image_size,
            mean,
            std,
        }
    }

    /// Batch onto an explicit backend
    pub fn batch_on<B: Backend>(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        <Self as Batcher<B, ImageItem, ImageBatch<B>>>::batch(self, items, device)
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| {
                debug_assert_eq!(item.size(), size);
                rgb_to_chw(&item.image).into_iter().map(|p| p as f32 / 255.0)
            })
            .collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let mean = Tensor::<B, 4>::from_floats(TensorData::new(self.mean.to_vec(), [1, 3, 1, 1]), device);
        let std = Tensor::<B, 4>::from_floats(TensorData::new(self.std.to_vec(), [1, 3, 1, 1]), device);
        let images = (images - mean) / std;

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ImageBatch { images, targets }
    }
}
