use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use desceval_cli::keypoints::{DetectConfig, DetectedKeypoints};
use desceval_cli::report::{JsonFileSink, ResultsSink};
use desceval_cli::sources::{load_gray, CsvKeypoints, HPatchesDataset, ImageSource, KeypointSource};
use desceval_cli::{load_config, synth, CliResult, Evaluator};
use desceval_core::{init_thread_pool, EvalConfig, PoolingKind};
use desceval_describe::DescriptorRegistry;

#[derive(Parser)]
#[command(name = "desceval")]
#[command(about = "Evaluate local image descriptors on homography-related image pairs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a descriptor on an HPatches-style dataset.
    Run(RunArgs),

    /// Detect reference keypoints and write locked-in CSVs for every image.
    Keypoints(KeypointArgs),

    /// Write a synthetic scene by warping one image.
    Synth {
        /// Reference image.
        #[arg(long)]
        image: PathBuf,

        /// Dataset root the scene directory is created in.
        #[arg(long)]
        out: PathBuf,

        #[arg(long, default_value = "v_synthetic")]
        scene: String,
    },

    /// List registered descriptor identifiers.
    Descriptors,

    /// Print the default configuration, or write it as TOML.
    Config {
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Dataset root, one directory per scene.
    #[arg(long)]
    data: PathBuf,

    /// Keypoint CSV root. Without it keypoints are detected on the fly.
    #[arg(long)]
    keypoints: Option<PathBuf>,

    /// Configuration file (TOML, or JSON by extension).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured descriptor.
    #[arg(long)]
    descriptor: Option<String>,

    /// Overrides the configured ratio threshold.
    #[arg(long)]
    ratio: Option<f32>,

    /// Overrides the configured pooling: none, domain-size or stacking.
    #[arg(long, value_parser = parse_pooling)]
    pooling: Option<PoolingKind>,

    /// Second descriptor for stacking.
    #[arg(long)]
    stack_with: Option<String>,

    /// Comma-separated scene names; all scenes when omitted.
    #[arg(long, value_delimiter = ',')]
    scenes: Vec<String>,

    #[arg(long)]
    threads: Option<usize>,

    /// Path to write the experiment record (JSON).
    #[arg(long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    detect: DetectArgs,
}

#[derive(Debug, Clone, Args)]
struct KeypointArgs {
    #[arg(long)]
    data: PathBuf,

    /// Root the `<scene>/<image>.csv` files are written under.
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    detect: DetectArgs,
}

#[derive(Debug, Clone, Args)]
struct DetectArgs {
    /// Maximum keypoints per reference image.
    #[arg(long = "max", default_value = "2000")]
    max_keypoints: usize,

    /// Border margin in pixels.
    #[arg(long, default_value = "40.0")]
    border: f32,

    /// FAST intensity threshold.
    #[arg(long, default_value = "20")]
    threshold: u8,

    /// Keypoint size assigned to detections.
    #[arg(long, default_value = "32.0")]
    size: f32,
}

fn parse_pooling(value: &str) -> Result<PoolingKind, String> {
    match value {
        "none" => Ok(PoolingKind::None),
        "domain-size" | "dsp" => Ok(PoolingKind::DomainSize),
        "stacking" => Ok(PoolingKind::Stacking),
        other => Err(format!("unknown pooling '{}' (none, domain-size, stacking)", other)),
    }
}

impl DetectArgs {
    fn to_config(&self) -> DetectConfig {
        DetectConfig {
            threshold: self.threshold,
            keypoint_size: self.size,
            border: self.border,
            max_keypoints: self.max_keypoints,
        }
    }
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_evaluation(&args),
        Commands::Keypoints(args) => run_keypoints(&args),
        Commands::Synth { image, out, scene } => run_synth(&image, &out, &scene),
        Commands::Descriptors => run_descriptors(),
        Commands::Config { out } => run_config(out),
    }
}

fn run_evaluation(args: &RunArgs) -> CliResult<()> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => EvalConfig::default(),
    };
    if let Some(descriptor) = &args.descriptor {
        config = config.with_descriptor(descriptor);
    }
    if let Some(ratio) = args.ratio {
        config = config.with_ratio_threshold(ratio);
    }
    if let Some(kind) = args.pooling {
        config.pooling.kind = kind;
    }
    if let Some(secondary) = &args.stack_with {
        config.pooling.secondary_descriptor = Some(secondary.clone());
    }
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }

    let registry = DescriptorRegistry::with_builtins();
    let evaluator = Evaluator::new(config, &registry)?;
    init_thread_pool(evaluator.config().n_threads)?;

    let dataset = HPatchesDataset::new(&args.data);
    let detected;
    let csv;
    let keypoints: &dyn KeypointSource = match &args.keypoints {
        Some(root) => {
            csv = CsvKeypoints::new(root);
            &csv
        }
        None => {
            detected = DetectedKeypoints::new(&dataset, args.detect.to_config());
            &detected
        }
    };

    tracing::info!("Evaluating {}", args.data.display());
    let t0 = Instant::now();
    let outcome = evaluator.run(&dataset, keypoints, &args.scenes)?;
    let record = evaluator.record(outcome, t0.elapsed().as_secs_f64());

    print!("{}", record.summary());
    if let Some(out) = &args.out {
        JsonFileSink::new(out).deliver(&record)?;
        tracing::info!("Wrote {}", out.display());
    }
    Ok(())
}

fn run_keypoints(args: &KeypointArgs) -> CliResult<()> {
    let dataset = HPatchesDataset::new(&args.data);
    let detected = DetectedKeypoints::new(&dataset, args.detect.to_config());
    let csv = CsvKeypoints::new(&args.out);

    for scene in dataset.scenes()? {
        for image in dataset.images(&scene)? {
            let keypoints = detected.lookup(&scene, &image)?;
            if keypoints.is_empty() {
                tracing::warn!(scene = scene.as_str(), image = image.as_str(), "no keypoints written");
                continue;
            }
            let path = csv.save(&scene, &image, &keypoints)?;
            tracing::debug!(count = keypoints.len(), "wrote {}", path.display());
        }
        tracing::info!(scene = scene.as_str(), "keypoints written");
    }
    Ok(())
}

fn run_synth(image: &Path, out: &Path, scene: &str) -> CliResult<()> {
    let reference = load_gray(image)?;
    let dir = synth::write_scene(&reference, out, scene)?;
    println!("Wrote synthetic scene {}", dir.display());
    Ok(())
}

fn run_descriptors() -> CliResult<()> {
    let registry = DescriptorRegistry::with_builtins();
    for id in registry.ids() {
        let descriptor = registry.get(&id)?;
        println!("{:<20} {}-d", id, descriptor.dimension());
    }
    Ok(())
}

fn run_config(out: Option<PathBuf>) -> CliResult<()> {
    let config = EvalConfig::default();
    match out {
        Some(path) => {
            std::fs::write(&path, config.to_toml()?)?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", config.to_toml()?),
    }
    Ok(())
}
