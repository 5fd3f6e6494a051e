use nalgebra::DMatrix;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use crate::{
    error::{AppError, AppResult},
    models::{MovieId, Rating, UserId, UserKey},
};

pub const RATINGS_FILE: &str = "ratings.csv";

/// In-memory ratings table plus its dense user × movie view
///
/// Rows are distinct user IDs and columns distinct movie IDs, both in
/// ascending order. Unrated pairs hold 0, so "not rated" and "rated 0" are
/// the same thing to every consumer of the matrix.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RatingStore {
    ratings: Vec<Rating>,
    user_ids: Vec<UserId>,
    movie_ids: Vec<MovieId>,
    user_index: HashMap<UserId, usize>,
    movie_index: HashMap<MovieId, usize>,
    matrix: DMatrix<f64>,
    global_mean: f64,
    movie_means: HashMap<MovieId, f64>,
    /// Movie IDs ordered by mean rating, best first (ties by ascending ID)
    by_mean_rating: Vec<MovieId>,
}

impl RatingStore {
    /// Loads `ratings.csv` from the data directory
    pub fn load(data_dir: &Path) -> AppResult<Self> {
        let path = data_dir.join(RATINGS_FILE);
        if !path.exists() {
            return Err(AppError::Dataset(format!(
                "Required data file not found: {}",
                path.display()
            )));
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let ratings = reader
            .deserialize::<Rating>()
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            path = %path.display(),
            rows = ratings.len(),
            "Loaded ratings table"
        );

        Self::from_ratings(ratings)
    }

    /// Builds the store from already-parsed rating rows
    pub fn from_ratings(ratings: Vec<Rating>) -> AppResult<Self> {
        if ratings.is_empty() {
            return Err(AppError::Dataset("Ratings table is empty".to_string()));
        }

        if let Some(bad) = ratings.iter().find(|r| !r.rating.is_finite()) {
            return Err(AppError::Dataset(format!(
                "Non-finite rating for user {} and movie {}",
                bad.user_id, bad.movie_id
            )));
        }

        let user_ids: Vec<UserId> = ratings
            .iter()
            .map(|r| r.user_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let movie_ids: Vec<MovieId> = ratings
            .iter()
            .map(|r| r.movie_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let user_index: HashMap<UserId, usize> =
            user_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let movie_index: HashMap<MovieId, usize> =
            movie_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut matrix = DMatrix::zeros(user_ids.len(), movie_ids.len());
        let mut filled = HashSet::with_capacity(ratings.len());
        let mut duplicates = 0usize;
        for rating in &ratings {
            let row = user_index[&rating.user_id];
            let col = movie_index[&rating.movie_id];
            if !filled.insert((row, col)) {
                duplicates += 1;
            }
            matrix[(row, col)] = rating.rating;
        }

        if duplicates > 0 {
            tracing::warn!(
                duplicates,
                "Duplicate (user, movie) ratings found; keeping the last occurrence"
            );
        }

        let global_mean = ratings.iter().map(|r| r.rating).sum::<f64>() / ratings.len() as f64;

        let mut sums: HashMap<MovieId, (f64, usize)> = HashMap::new();
        for rating in &ratings {
            let entry = sums.entry(rating.movie_id).or_insert((0.0, 0));
            entry.0 += rating.rating;
            entry.1 += 1;
        }
        let movie_means: HashMap<MovieId, f64> = sums
            .into_iter()
            .map(|(id, (sum, count))| (id, sum / count as f64))
            .collect();

        let mut by_mean_rating = movie_ids.clone();
        by_mean_rating.sort_by(|a, b| movie_means[b].total_cmp(&movie_means[a]));

        tracing::info!(
            users = user_ids.len(),
            movies = movie_ids.len(),
            global_mean,
            "Built user-movie matrix"
        );

        Ok(Self {
            ratings,
            user_ids,
            movie_ids,
            user_index,
            movie_index,
            matrix,
            global_mean,
            movie_means,
            by_mean_rating,
        })
    }

    pub fn user_ids(&self) -> &[UserId] {
        &self.user_ids
    }

    pub fn movie_ids(&self) -> &[MovieId] {
        &self.movie_ids
    }

    pub fn num_users(&self) -> usize {
        self.user_ids.len()
    }

    pub fn num_movies(&self) -> usize {
        self.movie_ids.len()
    }

    /// Dense user × movie ratings, 0 where unrated
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn user_index(&self, user_id: UserId) -> Option<usize> {
        self.user_index.get(&user_id).copied()
    }

    pub fn movie_index(&self, movie_id: MovieId) -> Option<usize> {
        self.movie_index.get(&movie_id).copied()
    }

    pub fn movie_id_at(&self, index: usize) -> Option<MovieId> {
        self.movie_ids.get(index).copied()
    }

    /// Row index of a known user; opaque or unknown IDs resolve to `None`
    pub fn resolve_user(&self, user: &UserKey) -> Option<usize> {
        match user {
            UserKey::Numeric(id) => self.user_index(*id),
            UserKey::Opaque(_) => None,
        }
    }

    pub fn contains_user(&self, user_id: UserId) -> bool {
        self.user_index.contains_key(&user_id)
    }

    pub fn contains_movie(&self, movie_id: MovieId) -> bool {
        self.movie_index.contains_key(&movie_id)
    }

    /// Matrix lookup; 0 for unrated pairs and unknown IDs
    pub fn rating(&self, user_id: UserId, movie_id: MovieId) -> f64 {
        match (self.user_index(user_id), self.movie_index(movie_id)) {
            (Some(row), Some(col)) => self.matrix[(row, col)],
            _ => 0.0,
        }
    }

    /// Copy of a user's matrix row
    pub fn user_row(&self, user_index: usize) -> Vec<f64> {
        self.matrix.row(user_index).iter().copied().collect()
    }

    /// Movies with a non-zero entry in the user's matrix row
    pub fn rated_movies(&self, user_index: usize) -> HashSet<MovieId> {
        self.matrix
            .row(user_index)
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != 0.0)
            .map(|(col, _)| self.movie_ids[col])
            .collect()
    }

    pub fn global_mean(&self) -> f64 {
        self.global_mean
    }

    pub fn movie_mean(&self, movie_id: MovieId) -> Option<f64> {
        self.movie_means.get(&movie_id).copied()
    }

    pub fn movie_means(&self) -> &HashMap<MovieId, f64> {
        &self.movie_means
    }

    /// All movies, highest mean rating first
    pub fn top_rated_movies(&self) -> &[MovieId] {
        &self.by_mean_rating
    }

    pub fn max_user_id(&self) -> UserId {
        self.user_ids.last().copied().unwrap_or_default()
    }

    /// A user's ratings, most recent first
    pub fn user_history(&self, user_id: UserId) -> Vec<Rating> {
        let mut history: Vec<Rating> = self
            .ratings
            .iter()
            .filter(|r| r.user_id == user_id)
            .copied()
            .collect();
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        history
    }
}
