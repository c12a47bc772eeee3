use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::data::ScoredMovie;
use crate::error::AppError;
use crate::hybrid::{CandidatePolicy, HybridScorer, ModelBundle};

#[derive(Clone)]
pub struct AppState {
    scorer: HybridScorer,
}

impl AppState {
    pub fn new(bundle: Arc<ModelBundle>) -> Self {
        AppState {
            scorer: HybridScorer::new(bundle),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecommendParams {
    n: Option<usize>,
    cb_weight: Option<f32>,
    cf_weight: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct SimilarParams {
    n: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct MoviesParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    movies_count: usize,
    ratings_count: usize,
    users_count: usize,
    cf_factors: usize,
    vocabulary_size: usize,
    version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MovieSummary {
    movie_id: i64,
    title: String,
    genres: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/recommend/user/:user_id", get(recommend_user_handler))
        .route("/recommend/movie/:movie_id", get(similar_movie_handler))
        .route("/movies", get(list_movies_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bundle: Arc<ModelBundle>, host: &str, port: u16) -> Result<()> {
    let state = AppState::new(bundle);
    let app = router(state);

    let addr = format!("{}:{}", host, port)
        .parse::<SocketAddr>()
        .context("invalid bind address")?;
    info!("server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let bundle = state.scorer.bundle();
    Json(HealthResponse {
        status: "healthy".to_string(),
        movies_count: bundle.movies.len(),
        ratings_count: bundle.ratings.len(),
        users_count: bundle.ratings.n_users(),
        cf_factors: bundle.cf.n_factors(),
        vocabulary_size: bundle.content.vocab_size(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Hybrid recommendations for one user. Cold-start users get an empty or
/// fallback-driven list with HTTP 200, never an error.
async fn recommend_user_handler(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<RecommendParams>,
) -> Result<Json<Vec<ScoredMovie>>, AppError> {
    let request_id = uuid::Uuid::new_v4();
    let n = params.n.unwrap_or(10).min(100);
    let cb_weight = params.cb_weight.unwrap_or(0.5);
    let cf_weight = params.cf_weight.unwrap_or(0.5);
    if !cb_weight.is_finite() || !cf_weight.is_finite() {
        return Err(AppError::BadRequest(
            "cb_weight and cf_weight must be finite numbers".to_string(),
        ));
    }

    info!(
        "request {}: recommend user={} n={} cb={} cf={}",
        request_id, user_id, n, cb_weight, cf_weight
    );
    let recs = state
        .scorer
        .recommend(user_id, n, cb_weight, cf_weight, CandidatePolicy::default());
    Ok(Json(recs))
}

/// Movies most similar to the given one. Unknown ids yield an empty list
/// with HTTP 200.
async fn similar_movie_handler(
    State(state): State<AppState>,
    Path(movie_id): Path<i64>,
    Query(params): Query<SimilarParams>,
) -> Result<Json<Vec<ScoredMovie>>, AppError> {
    let n = params.n.unwrap_or(10).min(100);
    info!("similar movies for movie={} n={}", movie_id, n);
    Ok(Json(state.scorer.similar_to(movie_id, n)))
}

/// A catalog sample for the UI table.
async fn list_movies_handler(
    State(state): State<AppState>,
    Query(params): Query<MoviesParams>,
) -> Json<Vec<MovieSummary>> {
    let limit = params.limit.unwrap_or(200);
    let movies = state
        .scorer
        .bundle()
        .movies
        .iter()
        .take(limit)
        .map(|m| MovieSummary {
            movie_id: m.movie_id,
            title: m.title.clone(),
            genres: m.genres.clone(),
        })
        .collect();
    Json(movies)
}
