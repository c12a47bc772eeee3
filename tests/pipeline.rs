//! Full pipeline: raw CSVs -> prep -> train -> load bundle -> score.

use std::fs;
use std::sync::Arc;

use cinerec::collab::{CollabConfig, SvdModel};
use cinerec::config::Paths;
use cinerec::content::{ContentConfig, ContentIndex};
use cinerec::data::{self, MovieTable, RatingTable};
use cinerec::hybrid::{CandidatePolicy, HybridScorer, ModelBundle};

fn write_fixtures(paths: &Paths) {
    fs::write(
        paths.raw_movies(),
        "movieId,title,genres\n\
         1,Toy Story (1995),Adventure|Animation|Children|Comedy|Fantasy\n\
         2,Jumanji (1995),Adventure|Children|Fantasy\n\
         3,Heat (1995),Action|Crime|Thriller\n\
         4,GoldenEye (1995),Action|Adventure|Thriller\n\
         5,Casino (1995),Crime|Drama\n",
    )
    .unwrap();
    fs::write(
        paths.raw_ratings(),
        "userId,movieId,rating,timestamp\n\
         1,1,5.0,100\n\
         1,2,4.0,101\n\
         1,3,2.0,102\n\
         2,1,4.5,103\n\
         2,4,3.5,104\n\
         2,4,4.0,104\n\
         3,2,3.0,105\n\
         3,5,4.5,106\n\
         ,5,1.0,107\n\
         3,bad,1.0,108\n",
    )
    .unwrap();
    fs::write(
        paths.raw_tags(),
        "userId,movieId,tag,timestamp\n\
         10,1,pixar,200\n\
         11,1,pixar,201\n\
         12,1,fun,202\n\
         13,3,heist,203\n",
    )
    .unwrap();
}

fn prepared_paths(dir: &tempfile::TempDir) -> Paths {
    let paths = Paths::new(dir.path().join("data"), dir.path().join("models"));
    fs::create_dir_all(&paths.data_dir).unwrap();
    fs::create_dir_all(&paths.models_dir).unwrap();
    write_fixtures(&paths);
    data::prep(&paths).unwrap();
    paths
}

fn train_models(paths: &Paths) {
    let movies = MovieTable::load(paths.movies_clean()).unwrap();
    let content = ContentIndex::build(&movies, &ContentConfig::default());
    content.save(paths.content_model()).unwrap();

    let ratings = RatingTable::load(paths.ratings_clean()).unwrap();
    let config = CollabConfig {
        n_factors: 4,
        n_epochs: 10,
        holdout_frac: 0.0,
        ..CollabConfig::default()
    };
    let model = SvdModel::train(&ratings, &config);
    model.save(paths.collab_model()).unwrap();
}

#[test]
fn prep_writes_clean_tables() {
    let dir = tempfile::tempdir().unwrap();
    let paths = prepared_paths(&dir);

    let movies = MovieTable::load(paths.movies_clean()).unwrap();
    assert_eq!(movies.len(), 5);
    let toy_story = movies.get(1).unwrap();
    assert_eq!(toy_story.year, "1995");
    assert_eq!(toy_story.tags, "pixar fun");
    assert_eq!(
        toy_story.metadata,
        "toy story (1995) adventure animation children comedy fantasy pixar fun"
    );
    // Movies without tags get an empty string.
    assert_eq!(movies.get(2).unwrap().tags, "");

    let ratings = RatingTable::load(paths.ratings_clean()).unwrap();
    // 10 raw rows: one missing userId, one bad movieId, one duplicate
    // (user, movie, timestamp) triple resolved keep-last.
    assert_eq!(ratings.len(), 7);
    let user2_top = ratings.user_top(2, 10);
    assert_eq!(user2_top[0], (1, 4.5));
    // The duplicate kept the later 4.0 rating for movie 4.
    assert!(user2_top.contains(&(4, 4.0)));

    assert!(paths.movie_tags().exists());
}

#[test]
fn trained_bundle_recommends_and_finds_similar() {
    let dir = tempfile::tempdir().unwrap();
    let paths = prepared_paths(&dir);
    train_models(&paths);

    let bundle = Arc::new(ModelBundle::load(&paths).unwrap());
    let scorer = HybridScorer::new(bundle);

    // User 1 rated movies 1, 2 and 3; they must never come back.
    let recs = scorer.recommend(1, 10, 0.5, 0.5, CandidatePolicy::FullCatalog);
    assert!(!recs.is_empty());
    assert!(recs.len() <= 2); // catalog 5 minus 3 rated
    assert!(recs.iter().all(|r| ![1, 2, 3].contains(&r.movie_id)));
    for pair in recs.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    // Identical request, identical ranked output.
    let again = scorer.recommend(1, 10, 0.5, 0.5, CandidatePolicy::FullCatalog);
    assert_eq!(recs.len(), again.len());
    for (a, b) in recs.iter().zip(again.iter()) {
        assert_eq!(a.movie_id, b.movie_id);
        assert_eq!(a.score, b.score);
    }

    // Adventure/fantasy family: Jumanji is closest to Toy Story.
    let similar = scorer.similar_to(1, 3);
    assert!(similar.iter().all(|s| s.movie_id != 1));
    assert_eq!(similar[0].movie_id, 2);

    // Unknown movie: empty list, not an error.
    assert!(scorer.similar_to(999, 5).is_empty());
}

#[test]
fn cold_start_user_still_gets_a_ranked_list() {
    let dir = tempfile::tempdir().unwrap();
    let paths = prepared_paths(&dir);
    train_models(&paths);

    let bundle = Arc::new(ModelBundle::load(&paths).unwrap());
    let scorer = HybridScorer::new(bundle);

    let scores = scorer.aggregate_content_score(999, &[1, 2, 3, 4, 5], 5);
    assert!(scores.values().all(|s| s.is_neutral()));

    // Nothing rated, so the whole catalog is eligible and the ranking is
    // driven by the collaborative fallback alone.
    let recs = scorer.recommend(999, 10, 0.5, 0.5, CandidatePolicy::FullCatalog);
    assert_eq!(recs.len(), 5);
}
