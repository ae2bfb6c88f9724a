//! defect-synth CLI: builds synthetic defect-inspection scenes

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand};
use defect_synth_core::{
    BackgroundSource, Compositor, CompositorConfig, DatasetGenerator, GeneratorConfig, MaskRule,
    OutputNaming, PatchCountPlan, PatchPool, SmoothingConfig,
};

const DEFAULT_PATCH_COUNT: usize = 50;

#[derive(Parser)]
#[command(name = "defect-synth")]
#[command(about = "Composite defect patches onto backgrounds to build labelled inspection datasets")]
#[command(version)]
struct Cli {
    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate scenes and their target masks.
    Generate(GenerateArgs),

    /// Load every patch triple and report which ones are usable.
    CheckPool(CheckPoolArgs),
}

#[derive(Debug, Clone, Args)]
#[command(group(
    ArgGroup::new("background_source")
        .required(true)
        .args(["background", "background_dir"])
))]
struct GenerateArgs {
    /// Directory with `{base}.png`, `{base}_target.png` and `{base}_target_process.png`.
    #[arg(long)]
    patches_dir: PathBuf,

    /// Single background used for every scene.
    #[arg(long)]
    background: Option<PathBuf>,

    /// Directory of backgrounds; one is picked at random per scene.
    #[arg(long)]
    background_dir: Option<PathBuf>,

    /// Directory for composited scenes.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Directory for target masks.
    #[arg(long, default_value = "output_target")]
    target_dir: PathBuf,

    /// Number of scenes to generate.
    #[arg(long, default_value_t = 10)]
    runs: usize,

    /// Patches per scene.
    #[arg(long, conflicts_with_all = ["patches_min", "patches_max", "tiered"])]
    patches: Option<usize>,

    /// Lower bound of a random patch count per scene.
    #[arg(long, requires = "patches_max")]
    patches_min: Option<usize>,

    /// Upper bound (inclusive) of a random patch count per scene.
    #[arg(long, requires = "patches_min")]
    patches_max: Option<usize>,

    /// Density grows with the scene index: 5-10, then 10-35, then 35-50 patches.
    #[arg(long, conflicts_with_all = ["patches_min", "patches_max"])]
    tiered: bool,

    /// Index of the first scene.
    #[arg(short, long, default_value_t = 0)]
    index: usize,

    /// File name prefix for outputs.
    #[arg(long, default_value = "scene")]
    prefix: String,

    /// Name outputs by timestamp instead of index.
    #[arg(long)]
    timestamp_names: bool,

    /// Base random seed; scene i uses seed + i. Unseeded runs are not reproducible.
    #[arg(long)]
    seed: Option<u64>,

    /// Mask pixels with every channel below this value are padding; 0 pastes whole rectangles.
    #[arg(long)]
    threshold: Option<u8>,

    /// Placement attempts per patch before it is dropped.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Odd Gaussian kernel size for smoothing the scene image.
    #[arg(long, conflicts_with = "no_blur")]
    blur_kernel: Option<u32>,

    /// Skip smoothing.
    #[arg(long)]
    no_blur: bool,

    /// Write a JSON manifest next to each scene.
    #[arg(long)]
    manifest: bool,

    /// Compositor settings (JSON). Flags override values from the file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CheckPoolArgs {
    /// Directory with patch triples.
    #[arg(long)]
    patches_dir: PathBuf,

    /// Mask threshold used to count foreground pixels.
    #[arg(long, default_value_t = defect_synth_core::mask::DEFAULT_MASK_THRESHOLD)]
    threshold: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Generate(args) => run_generate(&args),
        Commands::CheckPool(args) => run_check_pool(&args),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run_generate(args: &GenerateArgs) -> Result<()> {
    let compositor_config = compositor_config(args)?;
    compositor_config
        .validate()
        .context("invalid compositor settings")?;

    let pool = PatchPool::from_dir(&args.patches_dir)
        .with_context(|| format!("loading patches from {}", args.patches_dir.display()))?;
    let backgrounds = background_source(args)?;

    let config = GeneratorConfig {
        runs: args.runs,
        start_index: args.index,
        plan: patch_plan(args),
        naming: output_naming(args),
        output_dir: args.output_dir.clone(),
        target_dir: args.target_dir.clone(),
        seed: args.seed,
        write_manifest: args.manifest,
    };
    log::debug!("Generator config: {:?}", config);
    log::debug!("Compositor config: {:?}", compositor_config);

    let generator = DatasetGenerator::new(
        Compositor::new(compositor_config),
        pool,
        backgrounds,
        config,
    )?;
    let summary = generator.run().context("scene generation failed")?;

    println!(
        "Generated {} scenes ({} failed), placed {}/{} patches",
        summary.scenes_written,
        summary.scenes_failed,
        summary.patches_placed,
        summary.patches_requested
    );
    println!("  images:  {}", args.output_dir.display());
    println!("  targets: {}", args.target_dir.display());
    Ok(())
}

fn run_check_pool(args: &CheckPoolArgs) -> Result<()> {
    let pool = PatchPool::from_dir(&args.patches_dir)
        .with_context(|| format!("loading patches from {}", args.patches_dir.display()))?;
    let report = pool.check();
    let rule = MaskRule::new(args.threshold);

    for index in 0..pool.len() {
        if let (Some(name), Some(triple)) = (pool.name(index), pool.get(index)) {
            let (w, h) = triple.dimensions();
            println!(
                "ok       {name} ({w}x{h}, {} foreground px)",
                rule.foreground_count(&triple.mask)
            );
        }
    }
    for (name, reason) in &report.invalid {
        println!("invalid  {name}: {reason}");
    }
    println!("{} valid, {} invalid", report.valid, report.invalid.len());

    if report.valid == 0 {
        bail!("no usable patch triples in {}", args.patches_dir.display());
    }
    Ok(())
}

fn load_compositor_config(path: &Path) -> Result<CompositorConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn compositor_config(args: &GenerateArgs) -> Result<CompositorConfig> {
    let mut config = match &args.config {
        Some(path) => load_compositor_config(path)?,
        None => CompositorConfig::default(),
    };

    if let Some(threshold) = args.threshold {
        config.mask_rule = MaskRule::new(threshold);
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts_per_patch = max_attempts;
    }
    if args.no_blur {
        config.smoothing = None;
    } else if let Some(kernel_size) = args.blur_kernel {
        config.smoothing = Some(SmoothingConfig::new(kernel_size)?);
    }

    Ok(config)
}

fn background_source(args: &GenerateArgs) -> Result<BackgroundSource> {
    match (&args.background, &args.background_dir) {
        (Some(file), _) => Ok(BackgroundSource::File(file.clone())),
        (None, Some(dir)) => BackgroundSource::from_dir(dir)
            .with_context(|| format!("listing backgrounds in {}", dir.display())),
        (None, None) => bail!("either --background or --background-dir is required"),
    }
}

fn patch_plan(args: &GenerateArgs) -> PatchCountPlan {
    if args.tiered {
        return PatchCountPlan::Tiered;
    }
    match (args.patches, args.patches_min, args.patches_max) {
        (Some(count), _, _) => PatchCountPlan::Fixed { count },
        (None, Some(min), Some(max)) => PatchCountPlan::Range { min, max },
        _ => PatchCountPlan::Fixed {
            count: DEFAULT_PATCH_COUNT,
        },
    }
}

fn output_naming(args: &GenerateArgs) -> OutputNaming {
    let prefix = args.prefix.clone();
    if args.timestamp_names {
        OutputNaming::Timestamp { prefix }
    } else {
        OutputNaming::Indexed { prefix }
    }
}
