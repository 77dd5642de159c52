use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use keyglue::{ImageFeatures, ImageShape, MatchConfig, Matcher, MatcherParams};
use rand::{rngs::StdRng, Rng, SeedableRng};

const NUM_KEYPOINTS: usize = 64;

fn synthetic_features(rng: &mut StdRng, shape: ImageShape, dim: usize) -> ImageFeatures {
    let keypoints = (0..NUM_KEYPOINTS)
        .map(|_| {
            [
                rng.random_range(0.0..shape.width as f32),
                rng.random_range(0.0..shape.height as f32),
            ]
        })
        .collect();
    let scores = (0..NUM_KEYPOINTS).map(|_| rng.random::<f32>()).collect();

    // unit-norm random descriptors, as a detector front end would hand over
    let mut descriptors = Vec::with_capacity(NUM_KEYPOINTS * dim);
    for _ in 0..NUM_KEYPOINTS {
        let d: Vec<f32> = (0..dim).map(|_| rng.random::<f32>() - 0.5).collect();
        let norm = d.iter().map(|v| v * v).sum::<f32>().sqrt().max(f32::EPSILON);
        descriptors.extend(d.iter().map(|v| v / norm));
    }

    ImageFeatures {
        shape,
        keypoints,
        scores,
        descriptors,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    println!("=== keyglue synthetic matching demo ===\n");

    let device = Device::Cpu;
    let params = MatcherParams {
        descriptor_dim: 64,
        keypoint_encoder: vec![32, 64],
        gnn_layers: 3,
        num_heads: 4,
        ..Default::default()
    };

    println!("-> Building a randomly initialized matcher...");
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let matcher = Matcher::new(params.clone(), vb)?;

    println!("-> Generating {NUM_KEYPOINTS} synthetic keypoints...");
    let mut rng = StdRng::seed_from_u64(42);
    let shape = ImageShape::new(480, 640)?;
    let feats0 = synthetic_features(&mut rng, shape, params.descriptor_dim);

    // the second frame is a copy of the first, so every keypoint should
    // find itself again
    let feats1 = feats0.clone();

    println!("-> Matching...");
    let config = MatchConfig {
        match_threshold: 0.0,
        ..Default::default()
    };
    let result = matcher.match_pair(&feats0, &feats1, &config)?;

    let identity = result.pairs().filter(|&(i, j, _)| i == j).count();
    println!(
        "   {} / {NUM_KEYPOINTS} keypoints matched, {identity} to themselves\n",
        result.num_matches()
    );
    for (i, j, confidence) in result.pairs().take(8) {
        println!("   {i:>3} -> {j:<3} confidence {confidence:.3}");
    }

    Ok(())
}
