use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::{MovieTable, ScoredMovie};

/// English stop words removed before vocabulary construction, in the
/// spirit of the usual IR stop lists.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "cannot", "could", "did", "do", "does", "doing", "down", "during", "each",
    "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here",
    "hers", "herself", "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it",
    "its", "itself", "me", "more", "most", "my", "myself", "no", "nor", "not", "of", "off",
    "on", "once", "only", "or", "other", "ought", "our", "ours", "ourselves", "out", "over",
    "own", "same", "she", "should", "so", "some", "such", "than", "that", "the", "their",
    "theirs", "them", "themselves", "then", "there", "these", "they", "this", "those",
    "through", "to", "too", "under", "until", "up", "very", "was", "we", "were", "what",
    "when", "where", "which", "while", "who", "whom", "why", "with", "would", "you", "your",
    "yours", "yourself", "yourselves",
];

#[derive(Debug, Clone)]
pub struct ContentConfig {
    /// Vocabulary cap; highest corpus-frequency terms are kept.
    pub max_features: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            max_features: 10_000,
        }
    }
}

/// TF-IDF document-vector space over movie metadata.
///
/// One L2-normalized sparse vector per movie in catalog order, so cosine
/// similarity reduces to a sparse dot product. Read-only at serving time.
#[derive(Debug, Serialize, Deserialize)]
pub struct ContentIndex {
    vocab: HashMap<String, u32>,
    idf: Vec<f32>,
    /// Sparse rows, term ids ascending within each row.
    rows: Vec<Vec<(u32, f32)>>,
    movie_ids: Vec<i64>,
    titles: Vec<String>,
    index: HashMap<i64, usize>,
}

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// Lowercase alphanumeric tokens of length >= 2, stop words removed,
/// then unigrams plus adjacent bigrams over the surviving tokens.
fn tokenize(text: &str) -> Vec<String> {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2 && !is_stop_word(w))
        .map(|w| w.to_string())
        .collect();

    let mut terms = words.clone();
    for pair in words.windows(2) {
        terms.push(format!("{} {}", pair[0], pair[1]));
    }
    terms
}

fn sparse_dot(a: &[(u32, f32)], b: &[(u32, f32)]) -> f32 {
    let mut sum = 0.0;
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

impl ContentIndex {
    /// Fit the vectorizer and vectorize every movie's metadata.
    pub fn build(movies: &MovieTable, config: &ContentConfig) -> Self {
        let docs: Vec<Vec<String>> = movies.iter().map(|m| tokenize(&m.metadata)).collect();
        let n_docs = docs.len();

        // Corpus term frequency (for the vocabulary cap) and document
        // frequency (for IDF).
        let mut corpus_tf: HashMap<&str, u64> = HashMap::new();
        let mut df: HashMap<&str, u32> = HashMap::new();
        for doc in &docs {
            for term in doc {
                *corpus_tf.entry(term.as_str()).or_insert(0) += 1;
            }
            let unique: HashSet<&str> = doc.iter().map(|t| t.as_str()).collect();
            for term in unique {
                *df.entry(term).or_insert(0) += 1;
            }
        }

        // Cap the vocabulary at the most frequent terms; ties break
        // lexicographically so the fit is deterministic.
        let mut terms: Vec<(&str, u64)> = corpus_tf.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        terms.truncate(config.max_features);
        terms.sort_by(|a, b| a.0.cmp(b.0));

        let mut vocab: HashMap<String, u32> = HashMap::new();
        let mut idf: Vec<f32> = Vec::with_capacity(terms.len());
        for (term_id, (term, _)) in terms.iter().enumerate() {
            vocab.insert(term.to_string(), term_id as u32);
            let d = df[term] as f32;
            idf.push(((1.0 + n_docs as f32) / (1.0 + d)).ln() + 1.0);
        }

        let rows: Vec<Vec<(u32, f32)>> = docs
            .par_iter()
            .map(|doc| {
                let mut counts: HashMap<u32, f32> = HashMap::new();
                for term in doc {
                    if let Some(&term_id) = vocab.get(term.as_str()) {
                        *counts.entry(term_id).or_insert(0.0) += 1.0;
                    }
                }
                let mut row: Vec<(u32, f32)> = counts
                    .into_iter()
                    .map(|(term_id, tf)| (term_id, tf * idf[term_id as usize]))
                    .collect();
                row.sort_by_key(|&(term_id, _)| term_id);
                let norm = row.iter().map(|&(_, w)| w * w).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for entry in &mut row {
                        entry.1 /= norm;
                    }
                }
                row
            })
            .collect();

        let movie_ids: Vec<i64> = movies.iter().map(|m| m.movie_id).collect();
        let titles: Vec<String> = movies.iter().map(|m| m.title.clone()).collect();
        let index: HashMap<i64, usize> = movie_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        info!(
            "built content index: {} movies, vocabulary {}",
            movie_ids.len(),
            vocab.len()
        );

        ContentIndex {
            vocab,
            idf,
            rows,
            movie_ids,
            titles,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.movie_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movie_ids.is_empty()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn row_of(&self, movie_id: i64) -> Option<usize> {
        self.index.get(&movie_id).copied()
    }

    /// Cosine similarity of one indexed movie against the whole catalog,
    /// in catalog order.
    pub fn similarities(&self, row: usize) -> Vec<f32> {
        let query = &self.rows[row];
        self.rows
            .par_iter()
            .map(|other| sparse_dot(query, other))
            .collect()
    }

    /// The movies most similar to `movie_id`, never including the query
    /// movie itself. Unknown ids yield an empty list.
    pub fn similar_to(&self, movie_id: i64, top_n: usize) -> Vec<ScoredMovie> {
        let Some(query_row) = self.row_of(movie_id) else {
            return Vec::new();
        };
        let scores = self.similarities(query_row);

        let mut order: Vec<usize> = (0..self.rows.len()).filter(|&i| i != query_row).collect();
        // Stable sort keeps catalog order on score ties.
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        order
            .into_iter()
            .take(top_n)
            .map(|i| ScoredMovie {
                movie_id: self.movie_ids[i],
                title: self.titles[i].clone(),
                score: scores[i],
            })
            .collect()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("failed to create {:?}", path.as_ref()))?;
        serde_json::to_writer(BufWriter::new(file), self)
            .context("failed to serialize content index")?;
        info!("saved content index -> {:?}", path.as_ref());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("failed to open content index {:?}", path.as_ref()))?;
        let index: ContentIndex = serde_json::from_reader(BufReader::new(file))
            .context("failed to parse content index")?;
        info!(
            "loaded content index: {} movies, vocabulary {}",
            index.len(),
            index.vocab_size()
        );
        Ok(index)
    }

    /// Assemble an index from raw vectors, for scorer tests that need
    /// exact cosine values.
    #[cfg(test)]
    pub(crate) fn from_parts(entries: Vec<(i64, String, Vec<(u32, f32)>)>) -> Self {
        let movie_ids: Vec<i64> = entries.iter().map(|e| e.0).collect();
        let titles: Vec<String> = entries.iter().map(|e| e.1.clone()).collect();
        let rows: Vec<Vec<(u32, f32)>> = entries.into_iter().map(|e| e.2).collect();
        let index = movie_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        ContentIndex {
            vocab: HashMap::new(),
            idf: Vec::new(),
            rows,
            movie_ids,
            titles,
            index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Movie;

    fn movie(movie_id: i64, title: &str, metadata: &str) -> Movie {
        Movie {
            movie_id,
            title: title.to_string(),
            genres: String::new(),
            year: String::new(),
            tags: String::new(),
            metadata: metadata.to_string(),
        }
    }

    fn sample_table() -> MovieTable {
        MovieTable::from_movies(vec![
            movie(1, "Space One", "space adventure alien ship"),
            movie(2, "Space Two", "space adventure alien crew"),
            movie(3, "Romance", "love story paris romance"),
            movie(4, "Blank", ""),
        ])
    }

    #[test]
    fn tokenize_builds_unigrams_and_bigrams_without_stop_words() {
        let terms = tokenize("the space adventure");
        assert_eq!(terms, vec!["space", "adventure", "space adventure"]);
    }

    #[test]
    fn rows_are_l2_normalized() {
        let index = ContentIndex::build(&sample_table(), &ContentConfig::default());
        let sims = index.similarities(0);
        assert!((sims[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn similar_to_excludes_query_and_orders_descending() {
        let index = ContentIndex::build(&sample_table(), &ContentConfig::default());
        let similar = index.similar_to(1, 10);

        assert!(similar.len() <= 3);
        assert!(similar.iter().all(|s| s.movie_id != 1));
        for pair in similar.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // The other space movie is the closest match.
        assert_eq!(similar[0].movie_id, 2);
    }

    #[test]
    fn similar_to_respects_top_n() {
        let index = ContentIndex::build(&sample_table(), &ContentConfig::default());
        assert_eq!(index.similar_to(1, 1).len(), 1);
    }

    #[test]
    fn similar_to_unknown_movie_is_empty() {
        let index = ContentIndex::build(&sample_table(), &ContentConfig::default());
        assert!(index.similar_to(999, 5).is_empty());
    }

    #[test]
    fn vocabulary_cap_limits_features() {
        let index = ContentIndex::build(
            &sample_table(),
            &ContentConfig { max_features: 3 },
        );
        assert!(index.vocab_size() <= 3);
    }

    #[test]
    fn ties_keep_catalog_order() {
        // Two identical docs are equally similar to the query.
        let table = MovieTable::from_movies(vec![
            movie(1, "Query", "alpha beta"),
            movie(2, "First twin", "alpha beta"),
            movie(3, "Second twin", "alpha beta"),
        ]);
        let index = ContentIndex::build(&table, &ContentConfig::default());
        let similar = index.similar_to(1, 2);
        assert_eq!(similar[0].movie_id, 2);
        assert_eq!(similar[1].movie_id, 3);
    }

    #[test]
    fn save_and_load_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cb_model.json");
        let index = ContentIndex::build(&sample_table(), &ContentConfig::default());
        index.save(&path)?;

        let loaded = ContentIndex::load(&path)?;
        assert_eq!(loaded.len(), index.len());
        assert_eq!(
            loaded.similar_to(1, 2).first().map(|s| s.movie_id),
            index.similar_to(1, 2).first().map(|s| s.movie_id)
        );
        Ok(())
    }
}
