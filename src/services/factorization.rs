use nalgebra::{DMatrix, DVector, SVD};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::{
    data::RatingStore,
    error::{AppError, AppResult},
    models::{MovieId, ScoredMovie, UserId, UserQuery},
    services::predictor::{Prediction, Predictor},
};

pub const RATING_FLOOR: f64 = 0.5;
pub const RATING_CEILING: f64 = 5.0;

/// Truncated SVD of the row-centered rating matrix
#[derive(Debug, Clone)]
pub struct LatentFactors {
    /// users × k
    pub u: DMatrix<f64>,
    /// k singular values, largest first
    pub sigma: DVector<f64>,
    /// k × movies
    pub v_t: DMatrix<f64>,
    /// Mean of each user's row, zero-filled entries included
    pub row_means: DVector<f64>,
}

impl LatentFactors {
    /// Centers each row of `matrix` and keeps the top `rank` singular triplets
    pub fn decompose(matrix: &DMatrix<f64>, rank: usize) -> AppResult<Self> {
        let (rows, cols) = matrix.shape();
        let row_means = DVector::from_iterator(rows, matrix.row_iter().map(|row| row.mean()));

        let mut centered = matrix.clone();
        for i in 0..rows {
            for j in 0..cols {
                centered[(i, j)] -= row_means[i];
            }
        }

        let svd = SVD::try_new(centered, true, true, f64::EPSILON, 0)
            .ok_or_else(|| AppError::Model("SVD did not converge".to_string()))?;
        let u = svd
            .u
            .ok_or_else(|| AppError::Model("SVD failed to compute U".to_string()))?;
        let v_t = svd
            .v_t
            .ok_or_else(|| AppError::Model("SVD failed to compute V^T".to_string()))?;
        let singular_values = svd.singular_values;

        let mut order: Vec<usize> = (0..singular_values.len()).collect();
        order.sort_by(|&a, &b| singular_values[b].total_cmp(&singular_values[a]));
        order.truncate(rank);

        Ok(Self {
            u: u.select_columns(order.iter()),
            sigma: DVector::from_iterator(order.len(), order.iter().map(|&i| singular_values[i])),
            v_t: v_t.select_rows(order.iter()),
            row_means,
        })
    }

    pub fn rank(&self) -> usize {
        self.sigma.len()
    }

    /// U · diag(Σ) · Vᵗ + row mean
    pub fn reconstruct(&self) -> DMatrix<f64> {
        let mut scaled_u = self.u.clone();
        for (j, s) in self.sigma.iter().enumerate() {
            let mut column = scaled_u.column_mut(j);
            column *= *s;
        }

        let mut predicted = scaled_u * &self.v_t;
        for (i, mean) in self.row_means.iter().enumerate() {
            predicted.row_mut(i).add_scalar_mut(*mean);
        }
        predicted
    }
}

/// Rank of the decomposition for a rows × cols matrix, capped at `max_rank`
pub fn factorization_rank(rows: usize, cols: usize, max_rank: usize) -> usize {
    max_rank.min(rows.min(cols).saturating_sub(1))
}

/// SVD-based rating predictor
///
/// Known users read their row of the reconstructed rating matrix. Cold-start
/// users get item-to-item propagation: each movie they rated spreads
/// `similarity * (rating - global mean)` to every other movie, where
/// similarity is the cosine between the movies' reconstructed columns.
pub struct FactorizationPredictor {
    store: Arc<RatingStore>,
    factors: LatentFactors,
    predicted: DMatrix<f64>,
    /// L2 norm of every column of `predicted`
    column_norms: Vec<f64>,
}

impl FactorizationPredictor {
    /// Factorizes the rating matrix; fails when the dataset is too small for rank ≥ 1
    pub fn train(store: Arc<RatingStore>, max_rank: usize) -> AppResult<Self> {
        let start = Instant::now();
        let (rows, cols) = store.matrix().shape();
        let rank = factorization_rank(rows, cols, max_rank);
        if rank < 1 {
            return Err(AppError::Model(format!(
                "Dataset too small to factorize: {}x{} matrix gives rank {}",
                rows, cols, rank
            )));
        }

        let factors = LatentFactors::decompose(store.matrix(), rank)?;
        let predicted = factors.reconstruct();
        let column_norms = predicted.column_iter().map(|c| c.norm()).collect();

        tracing::info!(
            users = rows,
            movies = cols,
            rank,
            elapsed_ms = start.elapsed().as_millis(),
            "Trained factorization model"
        );

        Ok(Self {
            store,
            factors,
            predicted,
            column_norms,
        })
    }

    pub fn factors(&self) -> &LatentFactors {
        &self.factors
    }

    /// Reconstructed users × movies rating matrix
    pub fn predicted_ratings(&self) -> &DMatrix<f64> {
        &self.predicted
    }

    pub fn predicted_rating(&self, user_id: UserId, movie_id: MovieId) -> Option<f64> {
        let row = self.store.user_index(user_id)?;
        let col = self.store.movie_index(movie_id)?;
        Some(self.predicted[(row, col)])
    }

    fn predict_known(&self, row: usize, query: &UserQuery) -> Prediction {
        let mut excluded = self.store.rated_movies(row);
        excluded.extend(query.ratings.keys().copied());

        let predicted_row = self.predicted.row(row);
        let mut scores = HashMap::with_capacity(self.store.num_movies());
        let mut candidates = Vec::new();

        for (col, &movie_id) in self.store.movie_ids().iter().enumerate() {
            let score = predicted_row[col];
            scores.insert(movie_id.to_string(), score);
            if !excluded.contains(&movie_id) {
                candidates.push(ScoredMovie::new(movie_id, score));
            }
        }

        Prediction {
            candidates,
            scores,
            excluded,
        }
    }

    fn predict_cold_start(&self, query: &UserQuery) -> Prediction {
        let global_mean = self.store.global_mean();
        let movie_ids = self.store.movie_ids();
        let mut accumulated: Vec<Option<f64>> = vec![None; movie_ids.len()];

        // Fixed order keeps the float accumulation reproducible
        let mut rated: Vec<(MovieId, f64)> = query.ratings.iter().map(|(&id, &r)| (id, r)).collect();
        rated.sort_by_key(|&(id, _)| id);

        for (movie_id, rating) in rated {
            let Some(col) = self.store.movie_index(movie_id) else {
                continue;
            };
            let profile = self.predicted.column(col);
            let profile_norm = self.column_norms[col];
            let deviation = rating - global_mean;

            for (other, other_id) in movie_ids.iter().enumerate() {
                if other == col || query.ratings.contains_key(other_id) {
                    continue;
                }

                let denominator = profile_norm * self.column_norms[other];
                let similarity = if denominator > 0.0 {
                    profile.dot(&self.predicted.column(other)) / denominator
                } else {
                    0.0
                };

                *accumulated[other].get_or_insert(0.0) += similarity * deviation;
            }
        }

        let mut scores = HashMap::new();
        let mut candidates = Vec::new();
        for (col, total) in accumulated.into_iter().enumerate() {
            let Some(total) = total else {
                continue;
            };
            // Rank on the raw estimate; only the reported rating is clipped
            let estimate = global_mean + total;
            scores.insert(
                movie_ids[col].to_string(),
                estimate.clamp(RATING_FLOOR, RATING_CEILING),
            );
            candidates.push(ScoredMovie::new(movie_ids[col], estimate));
        }

        Prediction {
            candidates,
            scores,
            excluded: query.ratings.keys().copied().collect::<HashSet<_>>(),
        }
    }
}

impl Predictor for FactorizationPredictor {
    fn predict(&self, query: &UserQuery) -> AppResult<Prediction> {
        let prediction = match self.store.resolve_user(&query.user) {
            Some(row) => self.predict_known(row, query),
            None => self.predict_cold_start(query),
        };

        tracing::debug!(
            user = %query.user,
            candidates = prediction.candidates.len(),
            "Factorization scores computed"
        );

        Ok(prediction)
    }

    fn name(&self) -> &'static str {
        "factorization"
    }
}
