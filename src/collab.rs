use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::{Rating, RatingTable};

#[derive(Debug, Clone)]
pub struct CollabConfig {
    pub n_factors: usize,
    pub n_epochs: usize,
    pub learning_rate: f32,
    pub regularization: f32,
    pub seed: u64,
    /// Fraction of ratings held out for offline RMSE, not used at inference.
    pub holdout_frac: f32,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            n_factors: 50,
            n_epochs: 25,
            learning_rate: 0.005,
            regularization: 0.02,
            seed: 42,
            holdout_frac: 0.15,
        }
    }
}

/// A point prediction. `fallback` marks estimates built from biases only
/// because the user and/or movie was absent from the training set; that is
/// a degraded signal, not an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub est: f32,
    pub fallback: bool,
}

/// Biased matrix-factorization rating predictor:
/// r ~ mu + b_u + b_i + p_u . q_i, trained by SGD with a fixed seed.
#[derive(Debug, Serialize, Deserialize)]
pub struct SvdModel {
    global_mean: f32,
    user_bias: Vec<f32>,
    item_bias: Vec<f32>,
    user_factors: Array2<f32>,
    item_factors: Array2<f32>,
    user_index: HashMap<i64, usize>,
    item_index: HashMap<i64, usize>,
    rating_min: f32,
    rating_max: f32,
}

impl SvdModel {
    pub fn train(ratings: &RatingTable, config: &CollabConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut rows: Vec<&Rating> = ratings.all().iter().collect();
        rows.shuffle(&mut rng);
        let n_holdout = ((rows.len() as f32) * config.holdout_frac).round() as usize;
        let (holdout, train) = rows.split_at(n_holdout.min(rows.len()));

        // The valid rating scale comes from the observed data.
        let (rating_min, rating_max) = ratings.rating_scale();

        let mut user_index: HashMap<i64, usize> = HashMap::new();
        let mut item_index: HashMap<i64, usize> = HashMap::new();
        for r in train {
            let next = user_index.len();
            user_index.entry(r.user_id).or_insert(next);
            let next = item_index.len();
            item_index.entry(r.movie_id).or_insert(next);
        }
        let n_users = user_index.len();
        let n_items = item_index.len();
        let k = config.n_factors;

        let global_mean = if train.is_empty() {
            0.0
        } else {
            train.iter().map(|r| r.rating).sum::<f32>() / train.len() as f32
        };

        let mut user_bias = vec![0.0f32; n_users];
        let mut item_bias = vec![0.0f32; n_items];
        let mut user_factors = Array2::<f32>::zeros((n_users, k));
        let mut item_factors = Array2::<f32>::zeros((n_items, k));
        for f in user_factors.iter_mut().chain(item_factors.iter_mut()) {
            *f = rng.gen_range(-0.1..0.1);
        }

        info!(
            "training SVD: {} train / {} holdout ratings, {} users, {} items, {} factors, {} epochs",
            train.len(),
            holdout.len(),
            n_users,
            n_items,
            k,
            config.n_epochs
        );

        let lr = config.learning_rate;
        let reg = config.regularization;
        for epoch in 0..config.n_epochs {
            let mut sq_err = 0.0f64;
            for r in train {
                let u = user_index[&r.user_id];
                let i = item_index[&r.movie_id];
                let dot: f32 = user_factors.row(u).dot(&item_factors.row(i));
                let err = r.rating - (global_mean + user_bias[u] + item_bias[i] + dot);
                sq_err += (err as f64) * (err as f64);

                user_bias[u] += lr * (err - reg * user_bias[u]);
                item_bias[i] += lr * (err - reg * item_bias[i]);
                for f in 0..k {
                    let pu = user_factors[[u, f]];
                    let qi = item_factors[[i, f]];
                    user_factors[[u, f]] += lr * (err * qi - reg * pu);
                    item_factors[[i, f]] += lr * (err * pu - reg * qi);
                }
            }
            if !train.is_empty() && (epoch + 1) % 5 == 0 {
                let rmse = (sq_err / train.len() as f64).sqrt();
                info!("epoch {}/{}: train RMSE {:.4}", epoch + 1, config.n_epochs, rmse);
            }
        }

        let model = SvdModel {
            global_mean,
            user_bias,
            item_bias,
            user_factors,
            item_factors,
            user_index,
            item_index,
            rating_min,
            rating_max,
        };

        if !holdout.is_empty() {
            let sq_err: f64 = holdout
                .iter()
                .map(|r| {
                    let err = r.rating - model.predict(r.user_id, r.movie_id).est;
                    (err as f64) * (err as f64)
                })
                .sum();
            let rmse = (sq_err / holdout.len() as f64).sqrt();
            info!("held-out RMSE {:.4} over {} ratings", rmse, holdout.len());
        }

        model
    }

    /// Estimate the rating for (user, movie). Unknown users or movies get
    /// a bias-only estimate flagged as a fallback; this never fails.
    pub fn predict(&self, user_id: i64, movie_id: i64) -> Prediction {
        let u = self.user_index.get(&user_id).copied();
        let i = self.item_index.get(&movie_id).copied();

        let mut est = self.global_mean;
        if let Some(u) = u {
            est += self.user_bias[u];
        }
        if let Some(i) = i {
            est += self.item_bias[i];
        }
        if let (Some(u), Some(i)) = (u, i) {
            est += self.user_factors.row(u).dot(&self.item_factors.row(i));
        }

        Prediction {
            est: est.clamp(self.rating_min, self.rating_max),
            fallback: u.is_none() || i.is_none(),
        }
    }

    pub fn n_users(&self) -> usize {
        self.user_index.len()
    }

    pub fn n_items(&self) -> usize {
        self.item_index.len()
    }

    pub fn n_factors(&self) -> usize {
        self.user_factors.ncols()
    }

    pub fn rating_scale(&self) -> (f32, f32) {
        (self.rating_min, self.rating_max)
    }

    /// A bias-only model that predicts a constant, for scorer tests that
    /// need exact collaborative scores.
    #[cfg(test)]
    pub(crate) fn constant(global_mean: f32, rating_min: f32, rating_max: f32) -> Self {
        SvdModel {
            global_mean,
            user_bias: Vec::new(),
            item_bias: Vec::new(),
            user_factors: Array2::zeros((0, 0)),
            item_factors: Array2::zeros((0, 0)),
            user_index: HashMap::new(),
            item_index: HashMap::new(),
            rating_min,
            rating_max,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("failed to create {:?}", path.as_ref()))?;
        serde_json::to_writer(BufWriter::new(file), self)
            .context("failed to serialize collaborative model")?;
        info!("saved collaborative model -> {:?}", path.as_ref());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("failed to open collaborative model {:?}", path.as_ref()))?;
        let model: SvdModel = serde_json::from_reader(BufReader::new(file))
            .context("failed to parse collaborative model")?;
        info!(
            "loaded collaborative model: {} users, {} items, {} factors",
            model.n_users(),
            model.n_items(),
            model.n_factors()
        );
        Ok(model)
    }
}
