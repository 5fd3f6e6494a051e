use std::collections::{HashMap, HashSet};

use crate::{
    error::AppResult,
    models::{MovieId, ScoredMovie, UserQuery},
};

/// Candidate scores produced by a predictor for one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction {
    /// Candidate pool, excluded movies already removed; may contain duplicates
    pub candidates: Vec<ScoredMovie>,
    /// Predicted score of every movie the predictor scored, keyed by ID string
    pub scores: HashMap<String, f64>,
    /// Movies that must never be recommended for this request
    pub excluded: HashSet<MovieId>,
}

/// Rating predictor behind the recommendation engine
///
/// Implementations do their training or artifact loading in their
/// constructor; `predict` only reads immutable state and is safe to call
/// from many requests at once.
pub trait Predictor: Send + Sync {
    /// Scores the candidate movies for a known or cold-start user
    fn predict(&self, query: &UserQuery) -> AppResult<Prediction>;

    /// Predictor name for logging and debugging
    fn name(&self) -> &'static str;
}
