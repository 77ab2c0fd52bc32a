use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vessel_client::{
    save_mask, validate_image_file, write_summary, AnalysisSummary, SegmentationClient,
    MAX_UPLOAD_BYTES,
};

#[derive(Parser, Debug)]
#[command(name = "vessel-client", version, about = "Analyze eye images with the vessel segmentation service")]
struct Cli {
    #[arg(long, env = "VESSEL_API_URL", default_value = "http://localhost:8000", global = true)]
    api_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Segment the vessels in an image and save the results.
    Analyze {
        image: PathBuf,

        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Also request and save the red overlay image.
        #[arg(long)]
        overlay: bool,

        /// Health check retries before giving up on a starting service.
        #[arg(long, default_value_t = 0)]
        wait: u32,
    },
    Health,
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let client = SegmentationClient::new(&cli.api_url)?;

    match cli.command {
        Command::Analyze {
            image,
            output,
            overlay,
            wait,
        } => {
            let upload = validate_image_file(&image, MAX_UPLOAD_BYTES)?;
            if wait > 0 {
                client.wait_until_ready(wait).await?;
            }

            let response = client.predict(&upload, overlay).await?;
            let saved = save_mask(&response, &output, upload.stem())?;
            let summary = AnalysisSummary::new(&upload.file_name, &response, Some(&saved));
            let summary_path = write_summary(&summary, &output)?;

            if let Some(metrics) = &response.vessel_metrics {
                println!("Vessel coverage:   {:.2}%", metrics.vessel_percentage);
                println!("Vessel regions:    {}", metrics.num_vessel_regions);
                println!("Avg region size:   {:.1} px", metrics.average_region_size);
            }
            if let Some(confidence) = response.confidence_score {
                println!("Confidence:        {:.1}%", confidence * 100.0);
            }
            if let Some(time) = response.processing_time {
                println!("Processing time:   {:.2}s", time);
            }
            println!("Mask saved to {}", saved.mask.display());
            if let Some(path) = &saved.overlay {
                println!("Overlay saved to {}", path.display());
            }
            println!("Summary saved to {}", summary_path.display());
        }
        Command::Health => {
            let health = client.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            if !health.is_healthy() {
                anyhow::bail!("Service is {}", health.status);
            }
        }
        Command::Info => {
            let info = client.model_info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}
