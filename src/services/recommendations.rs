use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::{
    data::RatingStore,
    error::AppResult,
    models::{RecommendationResult, UserQuery},
    services::{
        predictor::Predictor,
        ranking::{pad_with_popular, reconcile, select, Diversifier},
    },
};

/// Turns predictor scores into a diversified top-K list
///
/// Holds the one active predictor, the rating store used for popularity
/// padding, and the shared diversification generator.
pub struct RecommendationEngine {
    predictor: Arc<dyn Predictor>,
    store: Arc<RatingStore>,
    diversifier: Diversifier,
}

impl RecommendationEngine {
    pub fn new(predictor: Arc<dyn Predictor>, store: Arc<RatingStore>, diversifier: Diversifier) -> Self {
        Self {
            predictor,
            store,
            diversifier,
        }
    }

    pub fn predictor_name(&self) -> &'static str {
        self.predictor.name()
    }

    /// Recommends up to `top_k` unseen movies.
    ///
    /// `user_id` selects the known-user path when it names a user in the
    /// rating matrix; any other value is a cold-start user described only by
    /// `ratings`. Rating keys that are not numeric movie IDs are ignored.
    pub fn recommend(
        &self,
        user_id: &str,
        ratings: &HashMap<String, f64>,
        top_k: usize,
    ) -> AppResult<RecommendationResult> {
        let start = Instant::now();
        let query = UserQuery::new(user_id, ratings);
        let prediction = self.predictor.predict(&query)?;

        let mut chosen = select(&prediction.candidates, top_k, &self.diversifier);
        let padded = pad_with_popular(
            &mut chosen,
            self.store.top_rated_movies(),
            &prediction.excluded,
            top_k,
        );

        let result = reconcile(&chosen, &prediction.scores);

        tracing::info!(
            user = %query.user,
            predictor = self.predictor.name(),
            candidates = prediction.candidates.len(),
            padded,
            returned = result.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Generated recommendations"
        );

        Ok(result)
    }
}
