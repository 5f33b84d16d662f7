use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scene_chain_shorts::api::veo::VeoClient;
use scene_chain_shorts::chain::FfmpegFrameExtractor;
use scene_chain_shorts::config::Config;
use scene_chain_shorts::init;
use scene_chain_shorts::poller::TokioSleeper;
use scene_chain_shorts::run::RunAssembler;
use scene_chain_shorts::storage::GsutilStore;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "scene-chain-shorts")]
#[command(about = "Generate vertical shorts from scene-chained Veo clips", long_about = None)]
struct Args {
    /// Config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Overrides `output_root` from the config
    #[arg(short, long)]
    output_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate one short from a blueprint file
    Run { blueprint: PathBuf },
    /// Generate one short per blueprint, continuing past failures
    Batch {
        #[arg(required = true)]
        blueprints: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config).await?;
    if let Some(root) = args.output_root {
        cfg.output_root = root;
    }

    if !init::check_ffmpeg().await {
        error!("Install ffmpeg and ffprobe before generating videos.");
    }

    let backend = VeoClient::new(&cfg).context("Veo client setup failed")?;
    let store = GsutilStore;
    let frames = FfmpegFrameExtractor;
    let sleeper = TokioSleeper;
    let assembler = RunAssembler::new(&cfg, &backend, &store, &frames, &sleeper);

    match args.command {
        Command::Run { blueprint } => match assembler.run_file(&blueprint).await {
            Ok(report) => {
                info!("Final video: {}", report.final_video.display());
                Ok(())
            }
            Err(err) => {
                error!("{:#}", anyhow::Error::from(err));
                std::process::exit(1);
            }
        },
        Command::Batch { blueprints } => {
            let report = assembler.run_batch(&blueprints).await;
            for (path, outcome) in &report.outcomes {
                match outcome {
                    Ok(run) => info!("{}: {}", path.display(), run.final_video.display()),
                    Err(err) => error!("{}: {}", path.display(), err),
                }
            }
            if report.failed() > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
