use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facefind_core::{crop_face, BoundingBox};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod photos;

use config::Config;
use engine::{InspectReport, RankedPhoto, SearchOutcome, SearchReport};

#[derive(Parser)]
#[command(name = "facefind", about = "Find every event photo that contains a reference face")]
struct Cli {
    /// TOML config file (defaults to $FACEFIND_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank photos by similarity to the face in a reference photo
    Search {
        /// Portrait of the person to look for
        #[arg(short, long)]
        reference: PathBuf,
        /// Photo files or directories of photos
        #[arg(required = true)]
        photos: Vec<PathBuf>,
        /// Maximum embedding distance for a match (lower is stricter)
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Write a padded crop of each matched face into this directory
        #[arg(long)]
        export_dir: Option<PathBuf>,
        /// Crop padding as a fraction of the face box
        #[arg(long)]
        padding: Option<f32>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the faces detected in one image
    Inspect {
        image: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Export a padded crop of one face box
    Crop {
        image: PathBuf,
        #[arg(long)]
        x: f32,
        #[arg(long)]
        y: f32,
        #[arg(long)]
        width: f32,
        #[arg(long)]
        height: f32,
        #[arg(long)]
        padding: Option<f32>,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Search {
            reference,
            photos,
            threshold,
            export_dir,
            padding,
            json,
        } => {
            let threshold = threshold.unwrap_or(config.threshold);
            config::non_negative("threshold", threshold)?;
            let padding = padding.unwrap_or(config.crop_padding);
            config::non_negative("padding", padding)?;

            let inputs = photos::collect_photo_inputs(&photos).context("collecting photos")?;
            tracing::info!(photos = inputs.len(), threshold, "starting search");

            let engine = engine::spawn_engine(&config.model_paths(), config.profile, config.intra_threads)?;

            let cancel = Arc::new(AtomicBool::new(false));
            let search = engine.search(reference, inputs, threshold, cancel.clone());
            tokio::pin!(search);

            let report = tokio::select! {
                result = &mut search => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("interrupt received; cancelling search");
                    cancel.store(true, Ordering::Relaxed);
                    search.await?
                }
            };

            if let (Some(dir), SearchOutcome::Matched { matches }) = (&export_dir, &report.outcome) {
                export_crops(dir, matches, padding)?;
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_search(&report);
            }
        }
        Commands::Inspect { image, json } => {
            let engine = engine::spawn_engine(&config.model_paths(), config.profile, config.intra_threads)?;
            let report = engine.inspect(image).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_inspect(&report);
            }
        }
        Commands::Crop {
            image,
            x,
            y,
            width,
            height,
            padding,
            out,
        } => {
            let bbox = BoundingBox::new(x, y, width, height)?;
            let encoded = std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let crop = facefind_core::crop_face_from_bytes(&encoded, &bbox, padding.unwrap_or(config.crop_padding))
                .with_context(|| format!("cropping {}", image.display()))?;
            crop.save(&out).with_context(|| format!("writing {}", out.display()))?;
            println!("{} ({}x{})", out.display(), crop.width(), crop.height());
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Write `NNN_<stem>.png` for each match, cropped around its best face.
fn export_crops(dir: &Path, matches: &[RankedPhoto], padding: f32) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    for m in matches {
        let image = match image::open(&m.source) {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!(photo = %m.source.display(), error = %err, "skipping crop export");
                continue;
            }
        };
        let crop = crop_face(&image, &m.face, padding)
            .with_context(|| format!("cropping {}", m.source.display()))?;

        let stem = m
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo".to_string());
        let out = dir.join(format!("{:03}_{stem}.png", m.rank));
        crop.save(&out).with_context(|| format!("writing {}", out.display()))?;
        tracing::debug!(path = %out.display(), "crop exported");
    }

    tracing::info!(count = matches.len(), dir = %dir.display(), "crops exported");
    Ok(())
}

fn print_search(report: &SearchReport) {
    match &report.outcome {
        SearchOutcome::NoFacesInCorpus => {
            println!(
                "No faces found in any of the {} photos.",
                report.photos_analyzed
            );
        }
        SearchOutcome::NoMatch { faces_considered } => {
            println!(
                "No match: {faces_considered} faces in {} photos, none within distance {}.",
                report.photos_analyzed, report.threshold
            );
        }
        SearchOutcome::Matched { matches } => {
            println!(
                "{} of {} photos match (threshold {}):",
                matches.len(),
                report.photos_analyzed,
                report.threshold
            );
            println!("{:>4}  {:>6}  {:>8}  photo", "rank", "score", "distance");
            for m in matches {
                println!(
                    "{:>4}  {:>6.3}  {:>8.4}  {}",
                    m.rank,
                    m.score,
                    m.distance,
                    m.source.display()
                );
            }
        }
    }
}

fn print_inspect(report: &InspectReport) {
    println!(
        "{} ({}x{}): {} face(s)",
        report.source.display(),
        report.width,
        report.height,
        report.faces.len()
    );
    for (i, face) in report.faces.iter().enumerate() {
        let b = &face.bbox;
        print!(
            "  #{i}: box {:.0},{:.0} {:.0}x{:.0}  confidence {:.2}",
            b.x, b.y, b.width, b.height, face.confidence
        );
        if let Some(attrs) = &face.attributes {
            let (expression, p) = attrs.expressions.dominant();
            print!(
                "  {expression} ({:.0}%)  age {:.0}  {} ({:.0}%)",
                p * 100.0,
                attrs.age,
                attrs.gender.gender,
                attrs.gender.probability * 100.0
            );
        }
        println!();
    }
}
