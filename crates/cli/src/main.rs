//! `ryoshu`: read receipts out of a photo and print reconciled records as JSON.
//!
//! ```bash
//! ryoshu analyze receipts.jpg --detailed
//! ryoshu rescan receipts.jpg --region 250,100,600,480
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ryoshu_core::BoundingBox;
use ryoshu_ocr::{OcrConfig, OcrGateway, ReceiptPipeline};

#[derive(Parser)]
#[command(name = "ryoshu")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Receipt extraction and de-duplication", long_about = None)]
struct Cli {
    /// TOML settings file
    #[arg(long, global = true, env = "RYOSHU_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan an image and print every receipt found
    Analyze {
        image: PathBuf,

        /// Also scan five overlapping tiles and merge duplicates
        #[arg(long)]
        detailed: bool,

        /// Print the full report (raw drafts, merge log, stats)
        #[arg(long)]
        report: bool,
    },
    /// Re-read one region of an image
    Rescan {
        image: PathBuf,

        /// Normalized box `ymin,xmin,ymax,xmax` in 0..=1000
        #[arg(long, value_parser = parse_region)]
        region: BoundingBox,
    },
}

fn parse_region(s: &str) -> Result<BoundingBox, String> {
    let values: Vec<i64> = s
        .split(',')
        .map(|p| p.trim().parse::<i64>().map_err(|e| format!("'{p}': {e}")))
        .collect::<Result<_, _>>()?;
    let coords: [i64; 4] = values
        .try_into()
        .map_err(|v: Vec<i64>| format!("expected 4 values, got {}", v.len()))?;
    if coords.iter().any(|c| !(0..=1000).contains(c)) {
        return Err("coordinates must be within 0..=1000".into());
    }
    if coords[0] >= coords[2] || coords[1] >= coords[3] {
        return Err("region must have ymin < ymax and xmin < xmax".into());
    }
    Ok(BoundingBox::from_raw(coords))
}

async fn read_image(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = OcrConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let gateway = OcrGateway::from_config(&config).context("Failed to set up backends")?;
    if !gateway.has_backend() {
        bail!("Set GEMINI_API_KEY or OPENAI_API_KEY (or the keys in the config file)");
    }
    let pipeline = ReceiptPipeline::new(gateway, &config);

    match cli.command {
        Commands::Analyze { image, detailed, report } => {
            let bytes = read_image(&image).await?;
            let result = pipeline.analyze(&bytes, detailed).await?;
            info!(records = result.records.len(), "done");
            let json = if report {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string_pretty(&result.records)?
            };
            println!("{json}");
        }
        Commands::Rescan { image, region } => {
            let bytes = read_image(&image).await?;
            let record = pipeline.rescan(&bytes, region).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parses() {
        let b = parse_region("250, 100,600,480").unwrap();
        assert_eq!(b.to_array(), [250, 100, 600, 480]);
    }

    #[test]
    fn region_rejects_bad_input() {
        assert!(parse_region("1,2,3").is_err());
        assert!(parse_region("a,b,c,d").is_err());
        assert!(parse_region("0,0,1200,10").is_err());
        assert!(parse_region("500,0,100,10").is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["ryoshu", "analyze", "r.jpg", "--detailed"]).unwrap();
        assert!(matches!(cli.command, Commands::Analyze { detailed: true, report: false, .. }));

        let cli = Cli::try_parse_from(["ryoshu", "rescan", "r.jpg", "--region", "0,0,500,500"]).unwrap();
        assert!(matches!(cli.command, Commands::Rescan { .. }));
    }
}
