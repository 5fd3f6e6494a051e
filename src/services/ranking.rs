use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use crate::{
    error::{AppError, AppResult},
    models::{normalize_id_key, MovieId, RecommendationResult, ScoredMovie},
};

/// How many raw-score candidates are kept per requested recommendation
pub const CANDIDATE_MULTIPLIER: usize = 5;

/// Gaussian score perturbation used to vary results near the cutoff
///
/// The generator is shared by every request, so it sits behind a mutex.
/// A standard deviation of 0 turns the perturbation off entirely, which
/// keeps the raw-score order.
pub struct Diversifier {
    noise: Option<Normal<f64>>,
    rng: Mutex<StdRng>,
}

impl Diversifier {
    /// Creates a diversifier; an unset seed draws one from OS entropy
    pub fn new(std_dev: f64, seed: Option<u64>) -> AppResult<Self> {
        if !std_dev.is_finite() || std_dev < 0.0 {
            return Err(AppError::InvalidInput(format!(
                "Diversity noise must be a finite, non-negative standard deviation, got {}",
                std_dev
            )));
        }

        let noise = if std_dev > 0.0 {
            Some(
                Normal::new(0.0, std_dev)
                    .map_err(|e| AppError::InvalidInput(format!("Invalid diversity noise: {}", e)))?,
            )
        } else {
            None
        };

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            noise,
            rng: Mutex::new(rng),
        })
    }

    /// Zero-variance diversifier
    pub fn deterministic() -> Self {
        Self {
            noise: None,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    fn perturb(&self, candidates: &[ScoredMovie]) -> Vec<f64> {
        let Some(noise) = &self.noise else {
            return candidates.iter().map(|c| c.score).collect();
        };

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        candidates
            .iter()
            .map(|c| c.score + noise.sample(&mut *rng))
            .collect()
    }
}

/// NaN scores sort last
fn rank_key(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}

/// Picks up to `top_k` unique movies from a scored candidate pool.
///
/// Candidates are deduplicated (first occurrence wins) and sorted by raw
/// score. The best `5 * top_k` are kept; when that still exceeds `top_k`
/// they are re-sorted by a noise-perturbed score and cut to `top_k`.
/// Short results are backfilled from the raw-score order.
pub fn select(candidates: &[ScoredMovie], top_k: usize, diversifier: &Diversifier) -> Vec<MovieId> {
    if top_k == 0 {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut ranked: Vec<ScoredMovie> = candidates
        .iter()
        .filter(|c| seen.insert(c.movie_id))
        .copied()
        .collect();
    ranked.sort_by(|a, b| rank_key(b.score).total_cmp(&rank_key(a.score)));

    let cut = ranked.len().min(top_k.saturating_mul(CANDIDATE_MULTIPLIER));
    let head = &ranked[..cut];

    let mut chosen: Vec<MovieId> = if head.len() > top_k {
        let perturbed = diversifier.perturb(head);
        let mut order: Vec<usize> = (0..head.len()).collect();
        order.sort_by(|&a, &b| rank_key(perturbed[b]).total_cmp(&rank_key(perturbed[a])));
        order
            .into_iter()
            .take(top_k)
            .map(|i| head[i].movie_id)
            .collect()
    } else {
        head.iter().map(|c| c.movie_id).collect()
    };

    if chosen.len() < top_k {
        let missing = top_k - chosen.len();
        let taken: HashSet<MovieId> = chosen.iter().copied().collect();
        chosen.extend(
            ranked
                .iter()
                .map(|c| c.movie_id)
                .filter(|id| !taken.contains(id))
                .take(missing),
        );
    }

    chosen
}

/// Tops up `chosen` with the best-rated movies that are neither excluded nor
/// already chosen, until `top_k` is reached or the list runs out.
///
/// Returns how many movies were added.
pub fn pad_with_popular(
    chosen: &mut Vec<MovieId>,
    popular: &[MovieId],
    excluded: &HashSet<MovieId>,
    top_k: usize,
) -> usize {
    if chosen.len() >= top_k {
        return 0;
    }

    let missing = top_k - chosen.len();
    let taken: HashSet<MovieId> = chosen.iter().copied().collect();
    let before = chosen.len();
    chosen.extend(
        popular
            .iter()
            .copied()
            .filter(|id| !taken.contains(id) && !excluded.contains(id))
            .take(missing),
    );
    chosen.len() - before
}

/// Pairs every chosen ID with its pre-diversification score.
///
/// Lookup is by exact key first, then by normalized key (so a score stored
/// under `"30.0"` still resolves for movie 30). Unresolved or non-finite
/// scores become 0.0; IDs are never dropped.
pub fn reconcile(chosen: &[MovieId], scores: &HashMap<String, f64>) -> RecommendationResult {
    let mut normalized: Option<HashMap<String, f64>> = None;
    let mut result = RecommendationResult::default();

    for movie_id in chosen {
        let key = movie_id.to_string();
        if result.scores.contains_key(&key) {
            continue;
        }

        let score = match scores.get(&key) {
            Some(score) => Some(*score),
            None => normalized
                .get_or_insert_with(|| {
                    scores
                        .iter()
                        .filter_map(|(k, v)| normalize_id_key(k).map(|nk| (nk, *v)))
                        .collect()
                })
                .get(&key)
                .copied(),
        };

        let score = match score {
            Some(score) if score.is_finite() => score,
            _ => {
                tracing::debug!(movie_id, "No usable predicted score, defaulting to 0.0");
                0.0
            }
        };

        result.recommended_ids.push(key.clone());
        result.scores.insert(key, score);
    }

    result
}
