use std::sync::Arc;
use std::time::Instant;

use crate::{
    config::{Config, PredictorKind},
    data::{MovieCatalog, RatingStore},
    error::AppResult,
    services::{
        Diversifier, EmbeddingPredictor, FactorizationPredictor, Predictor, RecommendationEngine,
    },
};

/// Everything a request handler reads, built once before the server starts
pub struct AppContext {
    pub config: Config,
    pub ratings: Arc<RatingStore>,
    pub catalog: Arc<MovieCatalog>,
    pub engine: RecommendationEngine,
}

impl AppContext {
    /// Loads the dataset and trains or loads the configured predictor.
    ///
    /// Blocking and CPU-heavy; callers on an async runtime should run it on
    /// the blocking pool.
    pub fn load(config: Config) -> AppResult<Self> {
        let start = Instant::now();

        let ratings = Arc::new(RatingStore::load(&config.data_dir)?);
        let catalog = Arc::new(MovieCatalog::load(&config.data_dir)?);

        let predictor: Arc<dyn Predictor> = match config.predictor {
            PredictorKind::Factorization => {
                Arc::new(FactorizationPredictor::train(ratings.clone(), config.max_rank)?)
            }
            PredictorKind::Embedding => {
                Arc::new(EmbeddingPredictor::load(ratings.clone(), &config.model_path)?)
            }
        };

        let diversifier = Diversifier::new(config.diversity_noise_std, config.rng_seed)?;
        let engine = RecommendationEngine::new(predictor, ratings.clone(), diversifier);

        tracing::info!(
            users = ratings.num_users(),
            movies = ratings.num_movies(),
            catalog = catalog.len(),
            predictor = engine.predictor_name(),
            elapsed_ms = start.elapsed().as_millis(),
            "Application context ready"
        );

        Ok(Self {
            config,
            ratings,
            catalog,
            engine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::path::PathBuf;

    fn fixture_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("movie-rec-ctx-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("ratings.csv"),
            "userId,movieId,rating,timestamp\n1,10,5.0,100\n1,20,3.0,300\n2,10,4.0,200\n2,30,2.0,400\n3,20,5.0,500\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("movies.csv"),
            "movieId,title,genres\n10,Alpha (1999),Action|Drama\n20,Beta (2001),Comedy\n30,Gamma (2005),Drama\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_load_factorization_context() {
        let dir = fixture_dir();
        let config = Config {
            data_dir: dir.clone(),
            diversity_noise_std: 0.0,
            ..Config::default()
        };

        let ctx = AppContext::load(config).unwrap();
        assert_eq!(ctx.ratings.num_users(), 3);
        assert_eq!(ctx.catalog.len(), 3);
        assert_eq!(ctx.engine.predictor_name(), "factorization");

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_embedding_context_requires_artifact() {
        let dir = fixture_dir();
        let config = Config {
            data_dir: dir.clone(),
            predictor: PredictorKind::Embedding,
            model_path: dir.join("missing.safetensors"),
            ..Config::default()
        };

        assert!(matches!(AppContext::load(config), Err(AppError::Model(_))));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_dataset_is_fatal() {
        let config = Config {
            data_dir: std::env::temp_dir().join(format!("movie-rec-none-{}", uuid::Uuid::new_v4())),
            ..Config::default()
        };
        assert!(AppContext::load(config).is_err());
    }
}
