use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Paths;
use crate::error::AppError;

/// A cleaned catalog entry. Immutable once written by `prep`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub movie_id: i64,
    pub title: String,
    pub genres: String,
    pub year: String,
    pub tags: String,
    pub metadata: String,
}

/// A cleaned rating row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub user_id: i64,
    pub movie_id: i64,
    pub rating: f32,
    pub timestamp: i64,
}

/// One row of the ranked output returned by both recommenders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredMovie {
    pub movie_id: i64,
    pub title: String,
    pub score: f32,
}

/// Movie catalog with lookup by id. Preserves table order, which the
/// scorers rely on for stable tie-breaking.
#[derive(Debug, Clone)]
pub struct MovieTable {
    movies: Vec<Movie>,
    index: HashMap<i64, usize>,
}

impl MovieTable {
    pub fn from_movies(movies: Vec<Movie>) -> Self {
        let index = movies
            .iter()
            .enumerate()
            .map(|(i, m)| (m.movie_id, i))
            .collect();
        MovieTable { movies, index }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())
            .with_context(|| format!("failed to open movies table {:?}", path.as_ref()))?;
        let mut movies = Vec::new();
        for result in reader.deserialize() {
            let movie: Movie = result.context("failed to parse movie record")?;
            movies.push(movie);
        }
        info!("loaded {} movies from {:?}", movies.len(), path.as_ref());
        Ok(Self::from_movies(movies))
    }

    pub fn get(&self, movie_id: i64) -> Option<&Movie> {
        self.index.get(&movie_id).map(|&i| &self.movies[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Movie> {
        self.movies.iter()
    }

    /// All movie ids in catalog order.
    pub fn ids(&self) -> Vec<i64> {
        self.movies.iter().map(|m| m.movie_id).collect()
    }

    pub fn len(&self) -> usize {
        self.movies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }
}

/// Rating history with a per-user index, loaded read-only at serving time.
#[derive(Debug, Clone)]
pub struct RatingTable {
    ratings: Vec<Rating>,
    by_user: HashMap<i64, Vec<usize>>,
}

impl RatingTable {
    pub fn from_ratings(ratings: Vec<Rating>) -> Self {
        let mut by_user: HashMap<i64, Vec<usize>> = HashMap::new();
        for (i, r) in ratings.iter().enumerate() {
            by_user.entry(r.user_id).or_default().push(i);
        }
        RatingTable { ratings, by_user }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())
            .with_context(|| format!("failed to open ratings table {:?}", path.as_ref()))?;
        let mut ratings = Vec::new();
        for result in reader.deserialize() {
            let rating: Rating = result.context("failed to parse rating record")?;
            ratings.push(rating);
        }
        info!("loaded {} ratings from {:?}", ratings.len(), path.as_ref());
        Ok(Self::from_ratings(ratings))
    }

    pub fn all(&self) -> &[Rating] {
        &self.ratings
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    pub fn n_users(&self) -> usize {
        self.by_user.len()
    }

    /// The user's top-k rated movies, highest rating first. Ties keep the
    /// order of the rating file. Empty for users with no history.
    pub fn user_top(&self, user_id: i64, top_k: usize) -> Vec<(i64, f32)> {
        let Some(rows) = self.by_user.get(&user_id) else {
            return Vec::new();
        };
        let mut pairs: Vec<(i64, f32)> = rows
            .iter()
            .map(|&i| (self.ratings[i].movie_id, self.ratings[i].rating))
            .collect();
        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        pairs.truncate(top_k);
        pairs
    }

    /// Every movie the user has rated, for filtering recommendations.
    pub fn rated_by(&self, user_id: i64) -> HashSet<i64> {
        self.by_user
            .get(&user_id)
            .map(|rows| rows.iter().map(|&i| self.ratings[i].movie_id).collect())
            .unwrap_or_default()
    }

    /// How many ratings each movie received, for popularity pruning.
    pub fn counts_by_movie(&self) -> HashMap<i64, usize> {
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for r in &self.ratings {
            *counts.entry(r.movie_id).or_insert(0) += 1;
        }
        counts
    }

    /// Observed rating scale of this table.
    pub fn rating_scale(&self) -> (f32, f32) {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for r in &self.ratings {
            min = min.min(r.rating);
            max = max.max(r.rating);
        }
        if self.ratings.is_empty() {
            (0.0, 0.0)
        } else {
            (min, max)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMovieRecord {
    movie_id: i64,
    title: Option<String>,
    genres: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTagRecord {
    #[serde(default)]
    #[allow(dead_code)]
    user_id: Option<i64>,
    movie_id: i64,
    tag: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MovieTagsRecord<'a> {
    movie_id: i64,
    tags: &'a str,
}

/// Extract a 4-digit year in parentheses from a title, e.g.
/// "Toy Story (1995)" -> "1995". Absent year is empty, not an error.
pub fn extract_year(title: &str) -> String {
    let bytes = title.as_bytes();
    let mut i = 0;
    while i + 5 < bytes.len() {
        if bytes[i] == b'('
            && bytes[i + 1].is_ascii_digit()
            && bytes[i + 2].is_ascii_digit()
            && bytes[i + 3].is_ascii_digit()
            && bytes[i + 4].is_ascii_digit()
            && bytes[i + 5] == b')'
        {
            return title[i + 1..i + 5].to_string();
        }
        i += 1;
    }
    String::new()
}

fn parse_id(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
}

/// Read and clean the raw ratings table: rows with unparseable ids or
/// ratings are dropped, duplicate (user, movie, timestamp) rows keep the
/// last occurrence. Missing required columns abort with a schema error.
pub fn clean_ratings_file(path: &Path) -> Result<Vec<Rating>, AppError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let col = |name: &str| headers.iter().position(|h| h == name);

    let (Some(user_col), Some(movie_col), Some(rating_col)) =
        (col("userId"), col("movieId"), col("rating"))
    else {
        return Err(AppError::Schema(
            "ratings table must contain userId, movieId and rating columns".to_string(),
        ));
    };
    let ts_col = col("timestamp");

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for record in reader.records() {
        let record = record?;
        let user_id = record.get(user_col).and_then(parse_id);
        let movie_id = record.get(movie_col).and_then(parse_id);
        let rating = record
            .get(rating_col)
            .and_then(|s| s.trim().parse::<f32>().ok())
            .filter(|r| r.is_finite());
        let (Some(user_id), Some(movie_id), Some(rating)) = (user_id, movie_id, rating) else {
            dropped += 1;
            continue;
        };
        let timestamp = ts_col
            .and_then(|i| record.get(i))
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(0);
        rows.push(Rating {
            user_id,
            movie_id,
            rating,
            timestamp,
        });
    }
    if dropped > 0 {
        info!("dropped {} rating rows with missing fields", dropped);
    }
    Ok(dedup_keep_last(rows))
}

fn dedup_keep_last(rows: Vec<Rating>) -> Vec<Rating> {
    let mut last: HashMap<(i64, i64, i64), usize> = HashMap::new();
    for (i, r) in rows.iter().enumerate() {
        last.insert((r.user_id, r.movie_id, r.timestamp), i);
    }
    rows.into_iter()
        .enumerate()
        .filter(|(i, r)| last[&(r.user_id, r.movie_id, r.timestamp)] == *i)
        .map(|(_, r)| r)
        .collect()
}

/// Group tags by movie, deduplicated in first-seen order, one joined
/// string per movie.
fn aggregate_tags(tags: Vec<RawTagRecord>) -> HashMap<i64, String> {
    let mut seen: HashMap<i64, HashSet<String>> = HashMap::new();
    let mut ordered: HashMap<i64, Vec<String>> = HashMap::new();
    for record in tags {
        let Some(tag) = record.tag else { continue };
        let tag = tag.trim().to_string();
        if tag.is_empty() {
            continue;
        }
        if seen.entry(record.movie_id).or_default().insert(tag.clone()) {
            ordered.entry(record.movie_id).or_default().push(tag);
        }
    }
    ordered
        .into_iter()
        .map(|(movie_id, tags)| (movie_id, tags.join(" ")))
        .collect()
}

fn clean_movies(
    raw: Vec<RawMovieRecord>,
    tags_by_movie: &HashMap<i64, String>,
) -> Vec<Movie> {
    raw.into_iter()
        .map(|record| {
            let title = record.title.unwrap_or_default().trim().to_string();
            let genres = record.genres.unwrap_or_default().trim().to_string();
            let year = extract_year(&title);
            let tags = tags_by_movie
                .get(&record.movie_id)
                .cloned()
                .unwrap_or_default();
            let metadata =
                format!("{} {} {}", title, genres.replace('|', " "), tags).to_lowercase();
            Movie {
                movie_id: record.movie_id,
                title,
                genres,
                year,
                tags,
                metadata,
            }
        })
        .collect()
}

fn load_raw_movies(path: &Path) -> Result<Vec<RawMovieRecord>, AppError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut movies = Vec::new();
    for result in reader.deserialize() {
        let record: RawMovieRecord = result?;
        movies.push(record);
    }
    Ok(movies)
}

fn load_raw_tags(path: &Path) -> Result<Vec<RawTagRecord>, AppError> {
    if !path.exists() {
        info!("no tags file at {:?}, movies get empty tag strings", path);
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut tags = Vec::new();
    for result in reader.deserialize() {
        let record: RawTagRecord = result?;
        tags.push(record);
    }
    Ok(tags)
}

/// Clean the raw MovieLens tables and write the three derived CSVs that
/// every downstream component consumes.
pub fn prep(paths: &Paths) -> Result<(), AppError> {
    let raw_movies = load_raw_movies(&paths.raw_movies())?;
    let raw_tags = load_raw_tags(&paths.raw_tags())?;
    let ratings = clean_ratings_file(&paths.raw_ratings())?;

    let tags_by_movie = aggregate_tags(raw_tags);
    let movies = clean_movies(raw_movies, &tags_by_movie);

    info!(
        "cleaned {} movies and {} ratings",
        movies.len(),
        ratings.len()
    );

    let mut writer = csv::Writer::from_path(paths.movies_clean())?;
    for movie in &movies {
        writer.serialize(movie)?;
    }
    writer.flush()?;

    let mut writer = csv::Writer::from_path(paths.ratings_clean())?;
    for rating in &ratings {
        writer.serialize(rating)?;
    }
    writer.flush()?;

    let mut writer = csv::Writer::from_path(paths.movie_tags())?;
    for movie in &movies {
        writer.serialize(MovieTagsRecord {
            movie_id: movie.movie_id,
            tags: &movie.tags,
        })?;
    }
    writer.flush()?;

    info!(
        "wrote {:?}, {:?}, {:?}",
        paths.movies_clean(),
        paths.ratings_clean(),
        paths.movie_tags()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn extracts_year_from_title() {
        assert_eq!(extract_year("Toy Story (1995)"), "1995");
        assert_eq!(extract_year("Heat (1995) "), "1995");
        assert_eq!(extract_year("No Year Here"), "");
        assert_eq!(extract_year("Short (95)"), "");
    }

    #[test]
    fn clean_ratings_drops_bad_rows_and_dedups_keep_last() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "userId,movieId,rating,timestamp")?;
        writeln!(file, "1,10,4.0,100")?;
        writeln!(file, "1,10,2.5,100")?; // duplicate triple, this one wins
        writeln!(file, ",10,3.0,101")?; // missing userId
        writeln!(file, "2,abc,3.0,102")?; // bad movieId
        writeln!(file, "2,20,,103")?; // missing rating
        writeln!(file, "2,20,5.0,104")?;

        let ratings = clean_ratings_file(file.path())?;
        assert_eq!(ratings.len(), 2);
        assert_eq!(ratings[0].user_id, 1);
        assert_eq!(ratings[0].rating, 2.5);
        assert_eq!(ratings[1].user_id, 2);
        assert_eq!(ratings[1].rating, 5.0);
        Ok(())
    }

    #[test]
    fn clean_ratings_missing_column_is_schema_error() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "userId,movieId,timestamp")?;
        writeln!(file, "1,10,100")?;

        let err = clean_ratings_file(file.path()).unwrap_err();
        assert!(matches!(err, AppError::Schema(_)));
        Ok(())
    }

    #[test]
    fn clean_movies_builds_metadata_and_year() {
        let raw = vec![RawMovieRecord {
            movie_id: 1,
            title: Some(" Toy Story (1995) ".to_string()),
            genres: Some("Adventure|Animation".to_string()),
        }];
        let mut tags = HashMap::new();
        tags.insert(1, "pixar fun".to_string());

        let movies = clean_movies(raw, &tags);
        assert_eq!(movies[0].title, "Toy Story (1995)");
        assert_eq!(movies[0].year, "1995");
        assert_eq!(
            movies[0].metadata,
            "toy story (1995) adventure animation pixar fun"
        );
    }

    #[test]
    fn clean_movies_missing_genres_and_tags_are_empty() {
        let raw = vec![RawMovieRecord {
            movie_id: 2,
            title: Some("Untagged".to_string()),
            genres: None,
        }];
        let movies = clean_movies(raw, &HashMap::new());
        assert_eq!(movies[0].genres, "");
        assert_eq!(movies[0].tags, "");
        assert_eq!(movies[0].metadata, "untagged  ");
    }

    #[test]
    fn aggregate_tags_dedups_in_first_seen_order() {
        let tags = vec![
            RawTagRecord {
                user_id: Some(1),
                movie_id: 1,
                tag: Some("funny".to_string()),
            },
            RawTagRecord {
                user_id: Some(2),
                movie_id: 1,
                tag: Some("pixar".to_string()),
            },
            RawTagRecord {
                user_id: Some(3),
                movie_id: 1,
                tag: Some("funny".to_string()),
            },
        ];
        let agg = aggregate_tags(tags);
        assert_eq!(agg[&1], "funny pixar");
    }

    #[test]
    fn user_top_orders_by_rating_descending() {
        let table = RatingTable::from_ratings(vec![
            Rating { user_id: 1, movie_id: 10, rating: 3.0, timestamp: 1 },
            Rating { user_id: 1, movie_id: 11, rating: 5.0, timestamp: 2 },
            Rating { user_id: 1, movie_id: 12, rating: 4.0, timestamp: 3 },
            Rating { user_id: 2, movie_id: 10, rating: 1.0, timestamp: 4 },
        ]);
        let top = table.user_top(1, 2);
        assert_eq!(top, vec![(11, 5.0), (12, 4.0)]);
        assert!(table.user_top(99, 5).is_empty());
    }

    #[test]
    fn rating_scale_uses_observed_min_max() {
        let table = RatingTable::from_ratings(vec![
            Rating { user_id: 1, movie_id: 10, rating: 0.5, timestamp: 1 },
            Rating { user_id: 1, movie_id: 11, rating: 4.5, timestamp: 2 },
        ]);
        assert_eq!(table.rating_scale(), (0.5, 4.5));
    }
}
