use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cinerec::collab::{CollabConfig, SvdModel};
use cinerec::config::Paths;
use cinerec::content::{ContentConfig, ContentIndex};
use cinerec::data::{self, MovieTable, RatingTable};
use cinerec::hybrid::ModelBundle;
use cinerec::server;

#[derive(Parser)]
#[command(name = "cinerec")]
#[command(about = "Hybrid MovieLens recommender: data prep, model training and serving")]
struct Cli {
    /// Directory with the raw and cleaned CSV tables
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory with the trained model artifacts
    #[arg(long)]
    models_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean the raw MovieLens CSVs into the derived tables
    Prep,

    /// Train the content and collaborative models from the cleaned tables
    Train {
        /// Latent factors for the collaborative model
        #[arg(long, default_value = "50")]
        factors: usize,

        /// Training epochs for the collaborative model
        #[arg(long, default_value = "25")]
        epochs: usize,

        /// Random seed for reproducible training
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Fraction of ratings held out for offline evaluation
        #[arg(long, default_value = "0.15")]
        holdout: f32,

        /// Vocabulary cap for the TF-IDF vectorizer
        #[arg(long, default_value = "10000")]
        max_features: usize,
    },

    /// Serve the recommendation API
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, default_value = "8000")]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut paths = Paths::from_env();
    if let Some(data_dir) = cli.data_dir {
        paths.data_dir = data_dir;
    }
    if let Some(models_dir) = cli.models_dir {
        paths.models_dir = models_dir;
    }

    match cli.command {
        Commands::Prep => {
            data::prep(&paths)?;
        }
        Commands::Train {
            factors,
            epochs,
            seed,
            holdout,
            max_features,
        } => {
            std::fs::create_dir_all(&paths.models_dir)
                .with_context(|| format!("failed to create {:?}", paths.models_dir))?;

            let movies = MovieTable::load(paths.movies_clean())
                .context("cleaned movies table missing, run `cinerec prep` first")?;
            let content = ContentIndex::build(&movies, &ContentConfig { max_features });
            content.save(paths.content_model())?;

            let ratings = RatingTable::load(paths.ratings_clean())
                .context("cleaned ratings table missing, run `cinerec prep` first")?;
            let collab_config = CollabConfig {
                n_factors: factors,
                n_epochs: epochs,
                seed,
                holdout_frac: holdout,
                ..CollabConfig::default()
            };
            let model = SvdModel::train(&ratings, &collab_config);
            model.save(paths.collab_model())?;

            info!("training complete");
        }
        Commands::Serve { host, port } => {
            let bundle = Arc::new(ModelBundle::load(&paths)?);
            server::serve(bundle, &host, port).await?;
        }
    }

    Ok(())
}
