use anyhow::Result;
use clap::{Parser, Subcommand};
use lrsf_pipeline::{run_harvest_once_from_env, HarvestConfig, HarvestPipeline};

#[derive(Debug, Parser)]
#[command(name = "lrsf")]
#[command(about = "Legal recruitment signal finder")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Process pending capture bundles once.
    Harvest,
    /// Summarize the most recent harvest runs.
    Report {
        #[arg(long, default_value_t = 3)]
        runs: usize,
    },
    /// Show keyword yield ranking.
    Keywords,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Harvest) {
        Commands::Harvest => {
            let summary = run_harvest_once_from_env().await?;
            println!(
                "harvest complete: run_id={} bundles={} accepted={} duplicates={} reports={}",
                summary.run_id,
                summary.bundles_processed,
                summary.accepted,
                summary.duplicates_skipped,
                summary.reports_dir
            );
        }
        Commands::Report { runs } => {
            let markdown = lrsf_pipeline::report_daily_markdown(runs, None)?;
            println!("{markdown}");
        }
        Commands::Keywords => {
            let pipeline = HarvestPipeline::new(HarvestConfig::from_env()).await?;
            let ranking = pipeline.keyword_ranking().await;
            if ranking.is_empty() {
                println!("no keyword stats recorded yet");
            }
            for stats in ranking {
                println!(
                    "{}\tattempts={}\tfound={}\tretained={}\tyield={:.3}",
                    stats.keyword,
                    stats.attempts,
                    stats.posts_found,
                    stats.posts_retained,
                    stats.yield_score()
                );
            }
        }
    }

    Ok(())
}
