use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::collab::SvdModel;
use crate::config::Paths;
use crate::content::ContentIndex;
use crate::data::{MovieTable, RatingTable, ScoredMovie};

/// Ratings are weighted against the 5-star cap of the MovieLens scale,
/// a fixed constant independent of the observed rating range.
const RATING_NORM: f32 = 5.0;

/// How many of the user's top-rated movies feed the content signal.
const CONTENT_TOP_K: usize = 5;

/// A per-candidate content score that distinguishes "computed" from
/// "no signal" (cold-start user, or no liked movie present in the index).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Score(f32),
    Neutral,
}

impl Signal {
    /// Neutral contributes nothing to the combined score.
    pub fn value(&self) -> f32 {
        match self {
            Signal::Score(s) => *s,
            Signal::Neutral => 0.0,
        }
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self, Signal::Neutral)
    }
}

/// How the candidate set is chosen before scoring.
#[derive(Debug, Clone, Copy, Default)]
pub enum CandidatePolicy {
    /// Score the entire catalog. Tractable for catalogs in the low tens
    /// of thousands.
    #[default]
    FullCatalog,
    /// Prune to the k most-rated movies before scoring.
    PopularTopK(usize),
}

/// Everything the scorers need, loaded once at startup and shared
/// immutably across requests.
pub struct ModelBundle {
    pub movies: MovieTable,
    pub ratings: RatingTable,
    pub content: ContentIndex,
    pub cf: SvdModel,
}

impl ModelBundle {
    pub fn load(paths: &Paths) -> Result<Self> {
        let movies =
            MovieTable::load(paths.movies_clean()).context("failed to load movie table")?;
        let ratings =
            RatingTable::load(paths.ratings_clean()).context("failed to load rating table")?;
        let content =
            ContentIndex::load(paths.content_model()).context("failed to load content index")?;
        let cf =
            SvdModel::load(paths.collab_model()).context("failed to load collaborative model")?;
        info!(
            "model bundle ready: {} movies, {} ratings, {} users",
            movies.len(),
            ratings.len(),
            ratings.n_users()
        );
        Ok(ModelBundle {
            movies,
            ratings,
            content,
            cf,
        })
    }
}

/// Request-scoped hybrid scoring over the read-only model bundle.
#[derive(Clone)]
pub struct HybridScorer {
    bundle: Arc<ModelBundle>,
}

impl HybridScorer {
    pub fn new(bundle: Arc<ModelBundle>) -> Self {
        HybridScorer { bundle }
    }

    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    /// The user's top-k highest-rated movies; empty means cold start.
    pub fn user_top_ratings(&self, user_id: i64, top_k: usize) -> Vec<(i64, f32)> {
        self.bundle.ratings.user_top(user_id, top_k)
    }

    /// Content score per candidate: cosine similarity to each of the
    /// user's liked movies, weighted by the liked rating over 5, averaged
    /// over the weights. Candidates or liked movies missing from the
    /// index are skipped; an empty denominator yields `Signal::Neutral`.
    pub fn aggregate_content_score(
        &self,
        user_id: i64,
        candidates: &[i64],
        top_k: usize,
    ) -> HashMap<i64, Signal> {
        let liked = self.user_top_ratings(user_id, top_k);
        if liked.is_empty() {
            debug!("user {} has no rating history, content signal is neutral", user_id);
            return candidates.iter().map(|&m| (m, Signal::Neutral)).collect();
        }

        let content = &self.bundle.content;
        let mut scores: HashMap<i64, f32> = HashMap::new();
        let mut denoms: HashMap<i64, f32> = HashMap::new();
        for (liked_id, rating) in liked {
            let Some(liked_row) = content.row_of(liked_id) else {
                continue;
            };
            let sims = content.similarities(liked_row);
            let weight = rating / RATING_NORM;
            for &m in candidates {
                if let Some(candidate_row) = content.row_of(m) {
                    *scores.entry(m).or_insert(0.0) += sims[candidate_row] * weight;
                    *denoms.entry(m).or_insert(0.0) += weight;
                }
            }
        }

        candidates
            .iter()
            .map(|&m| {
                let denom = denoms.get(&m).copied().unwrap_or(0.0);
                if denom > 0.0 {
                    (m, Signal::Score(scores[&m] / denom))
                } else {
                    (m, Signal::Neutral)
                }
            })
            .collect()
    }

    /// Candidate ids in catalog order, optionally pruned by popularity.
    pub fn candidates(&self, policy: CandidatePolicy) -> Vec<i64> {
        match policy {
            CandidatePolicy::FullCatalog => self.bundle.movies.ids(),
            CandidatePolicy::PopularTopK(k) => {
                let counts = self.bundle.ratings.counts_by_movie();
                let mut ids = self.bundle.movies.ids();
                // Stable sort: equally popular movies keep catalog order.
                ids.sort_by(|a, b| {
                    counts
                        .get(b)
                        .unwrap_or(&0)
                        .cmp(counts.get(a).unwrap_or(&0))
                });
                ids.truncate(k);
                let chosen: HashSet<i64> = ids.into_iter().collect();
                self.bundle
                    .movies
                    .ids()
                    .into_iter()
                    .filter(|id| chosen.contains(id))
                    .collect()
            }
        }
    }

    /// Rank the candidate set by the weighted combination of content and
    /// collaborative scores, dropping movies the user already rated.
    /// Cold-start users still get a list, driven by the collaborative
    /// fallback alone.
    pub fn recommend(
        &self,
        user_id: i64,
        top_n: usize,
        cb_weight: f32,
        cf_weight: f32,
        policy: CandidatePolicy,
    ) -> Vec<ScoredMovie> {
        let candidates = self.candidates(policy);
        let cb_scores = self.aggregate_content_score(user_id, &candidates, CONTENT_TOP_K);

        let cf_scores: Vec<f32> = candidates
            .par_iter()
            .map(|&m| {
                let p = self.bundle.cf.predict(user_id, m);
                if p.est.is_finite() {
                    p.est / RATING_NORM
                } else {
                    0.0
                }
            })
            .collect();

        let mut combined: Vec<(i64, f32)> = candidates
            .iter()
            .zip(cf_scores)
            .map(|(&m, cf_score)| {
                let cb_score = cb_scores.get(&m).map(Signal::value).unwrap_or(0.0);
                (m, cb_weight * cb_score + cf_weight * cf_score)
            })
            .collect();
        // Stable sort: score ties keep catalog order.
        combined.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let rated = self.bundle.ratings.rated_by(user_id);
        combined
            .into_iter()
            .filter(|(m, _)| !rated.contains(m))
            .take(top_n)
            .filter_map(|(m, score)| {
                self.bundle.movies.get(m).map(|movie| ScoredMovie {
                    movie_id: m,
                    title: movie.title.clone(),
                    score,
                })
            })
            .collect()
    }

    /// Content-only lookup: movies most similar to the given one.
    pub fn similar_to(&self, movie_id: i64, top_n: usize) -> Vec<ScoredMovie> {
        self.bundle.content.similar_to(movie_id, top_n)
    }
}
