use serde::Serialize;
use std::collections::HashMap;

use super::{parse_rating_map, MovieId, UserKey};

/// A recommendation request after input normalization
#[derive(Debug, Clone, PartialEq)]
pub struct UserQuery {
    pub user: UserKey,
    /// Ratings supplied by the caller; also the "already seen" set
    pub ratings: HashMap<MovieId, f64>,
}

impl UserQuery {
    pub fn new(user_id: &str, ratings: &HashMap<String, f64>) -> Self {
        Self {
            user: UserKey::parse(user_id),
            ratings: parse_rating_map(ratings),
        }
    }

    /// Query for a user that supplied no ratings
    pub fn anonymous(user_id: &str) -> Self {
        Self {
            user: UserKey::parse(user_id),
            ratings: HashMap::new(),
        }
    }
}

/// A movie paired with a predicted score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredMovie {
    pub movie_id: MovieId,
    pub score: f64,
}

impl ScoredMovie {
    pub fn new(movie_id: MovieId, score: f64) -> Self {
        Self { movie_id, score }
    }
}

/// Ranked recommendations and the predicted score of each one
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResult {
    /// Unique movie IDs, best first
    pub recommended_ids: Vec<String>,
    /// Predicted score for exactly the IDs in `recommended_ids`
    pub scores: HashMap<String, f64>,
}

impl RecommendationResult {
    pub fn len(&self) -> usize {
        self.recommended_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recommended_ids.is_empty()
    }

    /// Recommended IDs in numeric form
    pub fn movie_ids(&self) -> Vec<MovieId> {
        self.recommended_ids
            .iter()
            .filter_map(|id| id.parse().ok())
            .collect()
    }

    pub fn score(&self, movie_id: MovieId) -> Option<f64> {
        self.scores.get(&movie_id.to_string()).copied()
    }
}
