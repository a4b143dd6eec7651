//! Image-folder loader for GalaxyZoo and MTVSO
//!
//! Expected layout:
//! ```text
//! root/
//! ├── train/
//! │   ├── class_a/*.png
//! │   └── class_b/*.jpg
//! └── test/
//!     └── ...
//! ```
//! Class indices follow the sorted directory names of the train split, and
//! the test split reuses that mapping.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::{imageops::FilterType, ImageReader};
use rayon::prelude::*;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::dataset::{ImageItem, InMemoryDataset, Split};
use crate::utils::error::{AnodeError, Result, ResultExt};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Sorted class directory names under `dir`
pub fn discover_classes(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(AnodeError::Dataset(format!(
            "dataset directory does not exist: {}",
            dir.display()
        )));
    }

    let mut classes = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        if entry.file_type().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                classes.push(name.to_string());
            }
        }
    }
    classes.sort();
    Ok(classes)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// (path, label) pairs of one split, following `classes` for label indices
pub fn collect_samples(split_dir: &Path, classes: &[String]) -> Result<Vec<(PathBuf, usize)>> {
    let class_to_idx: BTreeMap<&str, usize> = classes
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.as_str(), idx))
        .collect();

    let mut samples = Vec::new();
    for class_name in discover_classes(split_dir)? {
        let Some(&label) = class_to_idx.get(class_name.as_str()) else {
            warn!(
                "Skipping class '{}' in {}: not present in the train split",
                class_name,
                split_dir.display()
            );
            continue;
        };

        let mut files = Vec::new();
        for entry in WalkDir::new(split_dir.join(&class_name)).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("walking {}", split_dir.display()))?;
            if entry.file_type().is_file() && is_image(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        samples.extend(files.into_iter().map(|path| (path, label)));
    }

    Ok(samples)
}

/// Decode and resize to `image_size` squared
pub fn load_image(path: &Path, label: usize, image_size: usize) -> Result<ImageItem> {
    let img = ImageReader::open(path)
        .map_err(|e| AnodeError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| AnodeError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle)
        .to_rgb8();

    Ok(ImageItem::new(img, label))
}

/// Load one split of a class-folder dataset into memory.
///
/// Unreadable images are skipped with a warning.
pub fn load_split(root: &Path, split: Split, image_size: usize) -> Result<InMemoryDataset> {
    let classes = discover_classes(&root.join(Split::Train.dir_name()))?;
    if classes.is_empty() {
        return Err(AnodeError::Dataset(format!(
            "no class directories under {}",
            root.join(Split::Train.dir_name()).display()
        )));
    }

    let samples = collect_samples(&root.join(split.dir_name()), &classes)?;

    let items: Vec<ImageItem> = samples
        .par_iter()
        .filter_map(|(path, label)| match load_image(path, *label, image_size) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("{}", e);
                None
            }
        })
        .collect();

    info!(
        "Loaded {:?} split from {}: {} images, {} classes",
        split,
        root.display(),
        items.len(),
        classes.len()
    );
    Ok(InMemoryDataset::new(items, classes.len()))
}
