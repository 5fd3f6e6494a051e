use serde::Deserialize;
use std::path::PathBuf;

/// Which predictor backs the recommendation engine
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PredictorKind {
    /// Truncated SVD over the rating matrix, trained at startup
    Factorization,
    /// Pretrained artifact (inference graph or item embeddings)
    Embedding,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Directory holding ratings.csv, movies.csv and the optional enrichment tables
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Active predictor implementation
    #[serde(default = "default_predictor")]
    pub predictor: PredictorKind,

    /// Pretrained artifact, only read by the embedding predictor
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Number of recommendations when the request does not ask for a count
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Upper bound on the SVD rank
    #[serde(default = "default_max_rank")]
    pub max_rank: usize,

    /// Standard deviation of the diversification noise; 0 disables it
    #[serde(default = "default_diversity_noise_std")]
    pub diversity_noise_std: f64,

    /// Seed for the diversification generator; entropy-seeded when unset
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_predictor() -> PredictorKind {
    PredictorKind::Factorization
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/movie_model.safetensors")
}

fn default_top_k() -> usize {
    10
}

fn default_max_rank() -> usize {
    50
}

fn default_diversity_noise_std() -> f64 {
    0.2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            host: default_host(),
            port: default_port(),
            predictor: default_predictor(),
            model_path: default_model_path(),
            default_top_k: default_top_k(),
            max_rank: default_max_rank(),
            diversity_noise_std: default_diversity_noise_std(),
            rng_seed: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }
}
