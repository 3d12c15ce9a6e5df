use std::time::Instant;

use desceval_cli::keypoints::{DetectConfig, DetectedKeypoints};
use desceval_cli::report::{MemorySink, ResultsSink};
use desceval_cli::sources::MemoryImages;
use desceval_cli::synth::synthetic_targets;
use desceval_cli::Evaluator;
use desceval_core::{EvalConfig, Image, PoolingConfig, PoolingKind};
use desceval_describe::DescriptorRegistry;
use nalgebra::Matrix3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random rectangles over a smooth gradient, rich in corners
fn blocks_image(width: usize, height: usize, seed: u64) -> Image {
    let mut rng = StdRng::seed_from_u64(seed);
    let rects: Vec<(usize, usize, usize, usize, u8)> = (0..120)
        .map(|_| {
            let (x, y) = (rng.gen_range(0..width), rng.gen_range(0..height));
            let (w, h) = (rng.gen_range(6..40), rng.gen_range(6..40));
            (x, y, w, h, rng.gen_range(0..=255u8))
        })
        .collect();
    Image::from_fn(width, height, |px, py| {
        rects
            .iter()
            .rev()
            .find(|&&(x, y, w, h, _)| px >= x && px < x + w && py >= y && py < y + h)
            .map_or(((px + py) / 8) as u8, |r| r.4)
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Synthetic descriptor evaluation");
    println!("===============================\n");

    let reference = blocks_image(480, 360, 7);
    let mut images = MemoryImages::new();
    images.push("v_blocks", "1", Some(reference.clone()), Some(Matrix3::identity()));
    for (id, img, h) in synthetic_targets(&reference) {
        images.push("v_blocks", &id, Some(img), Some(h));
    }
    let keypoints = DetectedKeypoints::new(&images, DetectConfig { max_keypoints: 500, ..DetectConfig::default() });

    let registry = DescriptorRegistry::with_builtins();
    let mut configs: Vec<EvalConfig> = registry.ids().iter().map(|id| EvalConfig::new(id)).collect();
    configs.push(EvalConfig::default().with_pooling(PoolingConfig {
        kind: PoolingKind::DomainSize,
        ..PoolingConfig::default()
    }));
    configs.push(EvalConfig::new("gradient-histogram").with_pooling(PoolingConfig {
        kind: PoolingKind::Stacking,
        secondary_descriptor: Some("raw-intensity".to_string()),
        ..PoolingConfig::default()
    }));

    let mut sink = MemorySink::default();
    for config in configs {
        let config = config.with_metadata("synthetic", "blocks scene, detected keypoints");
        let evaluator = Evaluator::new(config, &registry)?;
        let t0 = Instant::now();
        let outcome = evaluator.run(&images, &keypoints, &[])?;
        sink.deliver(&evaluator.record(outcome, t0.elapsed().as_secs_f64()))?;
    }

    for record in &sink.records {
        print!("{}", record.summary());
    }
    Ok(())
}
