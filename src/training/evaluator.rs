//! Test-split evaluation
//!
//! Runs on the inference copy of the model (`AutodiffModule::valid`), so no
//! gradients are tracked and batch norm uses its running statistics.

use burn::{
    data::dataset::Dataset,
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion},
};
use indicatif::ProgressBar;

use crate::dataset::{ImageBatch, ImageBatcher, InMemoryDataset};
use crate::model::Backbone;
use crate::utils::metrics::RunningMetrics;

/// Number of arg-max predictions matching the targets
pub fn correct_predictions<B: Backend>(logits: burn::tensor::Tensor<B, 2>, batch: &ImageBatch<B>) -> usize {
    let batch_size = batch.targets.dims()[0];
    let correct: i64 = logits
        .argmax(1)
        .reshape([batch_size])
        .equal(batch.targets.clone())
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}

/// Loss and top-1 accuracy of `model` over `dataset`, in dataset order
pub fn evaluate<B: Backend>(
    model: &Backbone<B>,
    dataset: &InMemoryDataset,
    batcher: &ImageBatcher,
    batch_size: usize,
    device: &B::Device,
    progress: ProgressBar,
) -> RunningMetrics {
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let indices: Vec<usize> = (0..dataset.len()).collect();
    let mut running = RunningMetrics::new();

    for chunk in indices.chunks(batch_size.max(1)) {
        let batch: ImageBatch<B> = batcher.batch_on(dataset.gather(chunk), device);
        let logits = model.forward(batch.images.clone());
        let loss: f64 = loss_fn
            .forward(logits.clone(), batch.targets.clone())
            .into_scalar()
            .elem();

        running.update(loss, correct_predictions(logits, &batch), chunk.len());
        progress.inc(1);
        progress.set_message(running.progress_message());
    }

    progress.finish();
    running
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::synthetic;
    use crate::model::{BackboneConfig, IntegrationMethod, Network};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_evaluate_covers_every_sample() {
        let device = Default::default();
        let model = BackboneConfig::new(Network::SqueezeNext, 3, IntegrationMethod::Euler)
            .with_nt(1)
            .with_width(4)
            .init::<TestBackend>(&device)
            .unwrap();
        let dataset = synthetic::separable(3, 3, 8, 1);

        let metrics = evaluate(
            &model,
            &dataset,
            &ImageBatcher::new(8),
            4,
            &device,
            ProgressBar::hidden(),
        );
        assert_eq!(metrics.total(), 9);
        assert!((0.0..=1.0).contains(&metrics.accuracy()));
        assert!(metrics.loss() >= 0.0);
        // 9 samples in batches of 4 is 3 forward passes, 4 blocks each
        assert_eq!(model.nfe(), 3 * 4);
    }
}
