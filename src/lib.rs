//! Hybrid MovieLens recommender.
//!
//! Pipeline: raw CSVs -> [`data::prep`] -> cleaned tables ->
//! [`content::ContentIndex`] (TF-IDF similarity) and [`collab::SvdModel`]
//! (matrix-factorization rating predictor), combined per request by
//! [`hybrid::HybridScorer`] behind the axum API in [`server`].

pub mod collab;
pub mod config;
pub mod content;
pub mod data;
pub mod error;
pub mod hybrid;
pub mod server;
