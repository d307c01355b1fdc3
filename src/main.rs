use cdn_stage::config::{self, Overrides, StageConfig};
use cdn_stage::flatten::{self, FlattenError, FlattenOptions, FlattenReport};
use cdn_stage::imaging::OutputFormat;
use cdn_stage::output;
use cdn_stage::pipeline::{self, PipelinePlan, Stage, StageObserver};
use cdn_stage::publish::{self, PublishEvent, PublishJob};
use cdn_stage::slug::CollisionPolicy;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use tracing::warn;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cdn-stage")]
#[command(about = "Stage generated images and publish them to a static image CDN")]
#[command(long_about = "\
Stage generated images and publish them to a static image CDN

An image generator writes one subdirectory per category. cdn-stage moves
those files into one flat directory, converts them to a web format under
lowercase slug names, and writes a manifest mapping each image to its
public URL. Commit and push the hosting repository yourself.

  mta/                         flatten →   PUBLIC_WEBP/
  ├── a/x.png                              ├── x.png
  └── b/Times-Square.png                   └── Times-Square.png

  PUBLIC_WEBP/                 publish →   site/station/times-square.webp
                                           site/manifest.json

Settings come from cdn-stage.toml (or --config), overridden by flags.
Run 'cdn-stage gen-config' to generate a documented config file.")]
#[command(version)]
struct Cli {
    /// Config file [default: cdn-stage.toml in the working directory, if present]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more detail to stderr (-v info, -vv debug). RUST_LOG also works.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Move files from <source>/<subdir>/ into one flat directory
    Flatten(FlattenArgs),
    /// Convert images and write the URL manifest
    Publish(PublishArgs),
    /// Run the full pipeline: flatten → publish
    Run(RunArgs),
    /// Show what publish would do without writing anything
    Check(PublishArgs),
    /// Print a stock cdn-stage.toml with all options documented
    GenConfig,
}

#[derive(Args)]
struct FlattenArgs {
    /// Root directory whose subdirectories are flattened
    #[arg(long)]
    source: Option<PathBuf>,
    /// Flat destination directory
    #[arg(long)]
    dest: Option<PathBuf>,
    /// Stop at the first file that fails to move
    #[arg(long)]
    abort_on_error: bool,
}

#[derive(Args)]
struct PublishArgs {
    /// Directory of images to publish
    #[arg(long)]
    source: Option<PathBuf>,
    /// Output directory inside the hosting repository
    #[arg(long)]
    dest: Option<PathBuf>,
    #[command(flatten)]
    options: PublishOptionArgs,
}

#[derive(Args)]
struct RunArgs {
    /// Root directory whose subdirectories are flattened
    #[arg(long)]
    source: Option<PathBuf>,
    /// Flat directory between the two stages (flatten destination, publish source)
    #[arg(long)]
    flat_dir: Option<PathBuf>,
    /// Publish output directory inside the hosting repository
    #[arg(long)]
    dest: Option<PathBuf>,
    /// Stop flattening at the first file that fails to move
    #[arg(long)]
    abort_on_error: bool,
    #[command(flatten)]
    options: PublishOptionArgs,
}

/// Publish flags shared by `publish`, `run` and `check`.
#[derive(Args)]
struct PublishOptionArgs {
    /// Public URL of the output directory
    #[arg(long)]
    url_base: Option<String>,
    /// Output format: webp, avif, jpeg or png
    #[arg(long)]
    format: Option<OutputFormat>,
    /// Encoding quality, 0-100
    #[arg(long)]
    quality: Option<u32>,
    /// Manifest path [default: manifest.json beside the output directory]
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Also publish images in subdirectories of the source
    #[arg(long)]
    recursive: bool,
    /// Split slugs on '_' into station / location / angle
    #[arg(long)]
    parse_fields: bool,
    /// What to do when two images get the same slug: fail, suffix or last-wins
    #[arg(long)]
    collision: Option<CollisionPolicy>,
    /// Re-encode images already in the target format instead of copying them
    #[arg(long)]
    no_passthrough: bool,
    /// Encode WebP losslessly (quality is ignored, files are larger)
    #[arg(long)]
    lossless: bool,
    /// WebP encoder effort, 0 (fastest) to 6 (smallest files)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=6))]
    method: Option<u8>,
    /// Ignore the publish cache and re-encode every image
    #[arg(long)]
    no_cache: bool,
}

impl FlattenArgs {
    fn overrides(&self) -> Overrides {
        let mut o = Overrides::new();
        o.set_path("flatten", "source", self.source.as_deref());
        o.set_path("flatten", "dest", self.dest.as_deref());
        o.set("flatten", "on_error", self.abort_on_error.then_some("abort"));
        o
    }
}

impl PublishArgs {
    fn overrides(&self) -> Overrides {
        let mut o = Overrides::new();
        o.set_path("publish", "source", self.source.as_deref());
        o.set_path("publish", "dest", self.dest.as_deref());
        self.options.apply(&mut o);
        o
    }
}

impl RunArgs {
    fn overrides(&self) -> Overrides {
        let mut o = Overrides::new();
        o.set_path("flatten", "source", self.source.as_deref());
        o.set_path("flatten", "dest", self.flat_dir.as_deref());
        o.set("flatten", "on_error", self.abort_on_error.then_some("abort"));
        o.set_path("publish", "dest", self.dest.as_deref());
        self.options.apply(&mut o);
        o
    }
}

impl PublishOptionArgs {
    fn apply(&self, o: &mut Overrides) {
        o.set("publish", "url_base", self.url_base.clone());
        o.set("publish", "format", self.format.map(|f| f.to_string()));
        o.set("publish", "quality", self.quality.map(i64::from));
        o.set_path("publish", "manifest", self.manifest.as_deref());
        o.set("publish", "recursive", self.recursive.then_some(true));
        o.set("publish", "parse_fields", self.parse_fields.then_some(true));
        o.set("publish", "collision", self.collision.map(|c| c.to_string()));
        o.set("publish", "passthrough", self.no_passthrough.then_some(false));
        o.set("publish", "lossless", self.lossless.then_some(true));
        o.set("publish", "method", self.method.map(i64::from));
    }
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let load = |overrides: Overrides| -> Result<StageConfig, config::ConfigError> {
        config::load_config(cli.config.as_deref(), overrides)
    };

    let clean = match &cli.command {
        Command::Flatten(args) => {
            let config = load(args.overrides())?;
            let source = config.flatten.require_source()?;
            let dest = config.flatten.require_dest()?;
            let options = FlattenOptions {
                on_error: config.flatten.on_error,
            };

            println!("==> Flattening {}", source.display());
            let report = run_flatten(source, dest, &options)?;
            report.is_clean()
        }
        Command::Publish(args) => {
            let config = load(args.overrides())?;
            let mut job = PublishJob::from_config(&config.publish)?;
            job.options.use_cache = !args.options.no_cache;
            init_thread_pool(&config.processing);

            println!(
                "==> Publishing {} \u{2192} {}",
                job.source.display(),
                job.dest.display()
            );
            let (tx, printer) = spawn_event_printer();
            let result = publish::publish(&job.source, &job.dest, &job.options, Some(tx));
            finish_event_printer(printer);
            let result = result?;
            output::print_publish_summary(&result);
            result.is_clean()
        }
        Command::Run(args) => {
            let config = load(args.overrides())?;
            let mut plan = PipelinePlan::from_config(&config)?;
            plan.publish.options.use_cache = !args.options.no_cache;
            init_thread_pool(&config.processing);

            let (tx, printer) = spawn_event_printer();
            let report = pipeline::run(&plan, &mut StageHeaders { plan: &plan }, Some(tx));
            finish_event_printer(printer);
            let report = report?;
            output::print_publish_summary(&report.publish);

            println!("==> Done: {}", report.publish.manifest_path.display());
            report.is_clean()
        }
        Command::Check(args) => {
            let config = load(args.overrides())?;
            let job = PublishJob::from_config(&config.publish)?;

            println!("==> Checking {}", job.source.display());
            let assets = publish::plan(&job.source, &job.dest, &job.options)?;
            let manifest = publish::preview_manifest(&assets, &job.dest, &job.options);
            output::print_plan(&assets, &manifest);
            println!(
                "==> Manifest would be written to {}",
                job.options.manifest_path_for(&job.dest).display()
            );
            true
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            true
        }
    };

    Ok(if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Flatten and print the report, including the partial report of an aborted run.
fn run_flatten(
    source: &Path,
    dest: &Path,
    options: &FlattenOptions,
) -> Result<FlattenReport, FlattenError> {
    match flatten::flatten(source, dest, options) {
        Ok(report) => {
            output::print_flatten_report(&report, source, dest);
            Ok(report)
        }
        Err(e) => {
            if let FlattenError::Aborted { report, .. } = &e {
                output::print_flatten_report(report, source, dest);
            }
            Err(e)
        }
    }
}

/// Prints a `==> Stage N` header as each pipeline stage starts.
struct StageHeaders<'a> {
    plan: &'a PipelinePlan,
}

impl StageObserver for StageHeaders<'_> {
    fn stage_started(&mut self, stage: Stage, plan: &PipelinePlan) {
        match stage {
            Stage::Flatten => println!(
                "==> Stage {}: Flattening {} \u{2192} {}",
                stage.number(),
                plan.flatten_source.display(),
                plan.flatten_dest.display()
            ),
            Stage::Publish => println!(
                "==> Stage {}: Publishing {} \u{2192} {}",
                stage.number(),
                plan.publish.source.display(),
                plan.publish.dest.display()
            ),
        }
    }

    fn flatten_finished(&mut self, report: &FlattenReport) {
        output::print_flatten_report(report, &self.plan.flatten_source, &self.plan.flatten_dest);
    }
}

/// Print publish progress from a dedicated thread while workers run.
fn spawn_event_printer() -> (Sender<PublishEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_publish_event(&event) {
                println!("{}", line);
            }
        }
    });
    (tx, printer)
}

fn finish_event_printer(printer: JoinHandle<()>) {
    if printer.join().is_err() {
        warn!("progress printer thread panicked");
    }
}

/// Install the stderr log subscriber. `-v` flags win over `RUST_LOG`.
fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores. The user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
