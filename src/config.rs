use std::env;
use std::path::PathBuf;

/// Locations of the raw CSVs, cleaned tables and model artifacts.
///
/// Defaults come from the environment so the binary works out of a plain
/// checkout; the CLI can override both directories per invocation.
#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub models_dir: PathBuf,
}

impl Paths {
    pub fn from_env() -> Self {
        Paths {
            data_dir: env::var("CINEREC_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            models_dir: env::var("CINEREC_MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
        }
    }

    pub fn new(data_dir: PathBuf, models_dir: PathBuf) -> Self {
        Paths { data_dir, models_dir }
    }

    // Raw MovieLens inputs.
    pub fn raw_movies(&self) -> PathBuf {
        self.data_dir.join("movies.csv")
    }

    pub fn raw_ratings(&self) -> PathBuf {
        self.data_dir.join("ratings.csv")
    }

    pub fn raw_tags(&self) -> PathBuf {
        self.data_dir.join("tags.csv")
    }

    // Cleaned tables written by `prep`.
    pub fn movies_clean(&self) -> PathBuf {
        self.data_dir.join("movies_clean.csv")
    }

    pub fn ratings_clean(&self) -> PathBuf {
        self.data_dir.join("ratings_clean.csv")
    }

    pub fn movie_tags(&self) -> PathBuf {
        self.data_dir.join("movie_tags.csv")
    }

    // Model artifacts written by `train`, one per model.
    pub fn content_model(&self) -> PathBuf {
        self.models_dir.join("cb_model.json")
    }

    pub fn collab_model(&self) -> PathBuf {
        self.models_dir.join("cf_model.json")
    }
}
