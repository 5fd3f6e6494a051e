use nalgebra::{DMatrix, DVector};
use safetensors::{Dtype, SafeTensors};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::{
    data::RatingStore,
    error::{AppError, AppResult},
    models::{MovieId, ScoredMovie, UserQuery},
    services::{
        onnx::OnnxModule,
        predictor::{Prediction, Predictor},
    },
};

/// Movies seeded into an otherwise empty user vector
pub const FALLBACK_MOVIES: usize = 5;
/// Rating given to each seeded movie
pub const FALLBACK_RATING: f64 = 5.0;
/// Keeps cosine similarity finite for zero-norm vectors
const COSINE_EPSILON: f64 = 1e-8;

/// A complete scoring network: user vector in, one score per movie out
#[cfg_attr(test, mockall::automock)]
pub trait InferenceModule: Send + Sync {
    fn infer(&self, user_vector: &[f32]) -> AppResult<Vec<f32>>;
}

/// Item embedding table, one row per catalog movie
pub struct ItemEmbeddings {
    vectors: DMatrix<f64>,
    norms: Vec<f64>,
}

impl ItemEmbeddings {
    pub fn new(vectors: DMatrix<f64>) -> Self {
        let norms = vectors.row_iter().map(|row| row.norm()).collect();
        Self { vectors, norms }
    }

    pub fn num_items(&self) -> usize {
        self.vectors.nrows()
    }

    pub fn dimensions(&self) -> usize {
        self.vectors.ncols()
    }

    /// Cosine similarity of every item with the rating-weighted mean of the
    /// rated items' embeddings
    pub fn score(&self, user_vector: &[f64]) -> AppResult<Vec<f64>> {
        let weights = DVector::from_column_slice(user_vector);
        let total: f64 = weights.sum();
        if weights.iter().all(|w| *w == 0.0) || total.abs() < f64::EPSILON {
            return Err(AppError::Inference(
                "Cannot build a user profile without rated movies".to_string(),
            ));
        }

        let profile = self.vectors.tr_mul(&weights) / total;
        let profile_norm = profile.norm();
        let dots = &self.vectors * &profile;

        Ok(dots
            .iter()
            .zip(&self.norms)
            .map(|(dot, norm)| dot / (norm * profile_norm + COSINE_EPSILON))
            .collect())
    }
}

/// Pretrained model loaded from the configured artifact
pub enum ModelArtifact {
    /// Full scoring network
    Inference(Box<dyn InferenceModule>),
    /// Raw item embeddings extracted from a named-tensor archive
    ItemEmbeddings(ItemEmbeddings),
}

impl ModelArtifact {
    pub fn load(path: &Path, num_movies: usize) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::Model(format!(
                "Model artifact not found: {}",
                path.display()
            )));
        }

        let bytes = std::fs::read(path)?;
        let artifact = Self::from_bytes(&bytes, num_movies)?;

        tracing::info!(
            path = %path.display(),
            kind = artifact.kind(),
            "Loaded model artifact"
        );

        Ok(artifact)
    }

    /// Detects the artifact kind from its content.
    ///
    /// A safetensors archive is read as raw item embeddings; anything else
    /// must parse as an ONNX graph.
    pub fn from_bytes(bytes: &[u8], num_movies: usize) -> AppResult<Self> {
        match SafeTensors::deserialize(bytes) {
            Ok(tensors) => {
                return item_embeddings_from(&tensors, num_movies).map(ModelArtifact::ItemEmbeddings)
            }
            Err(e) => tracing::debug!(error = %e, "Artifact is not a safetensors archive"),
        }

        match OnnxModule::from_bytes(bytes, num_movies) {
            Ok(module) => Ok(ModelArtifact::Inference(Box::new(module))),
            Err(e) => Err(AppError::Model(format!(
                "Unrecognized model artifact (neither safetensors nor ONNX): {}",
                e
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ModelArtifact::Inference(_) => "inference",
            ModelArtifact::ItemEmbeddings(_) => "item_embeddings",
        }
    }
}

/// Picks the item-embedding tensor name: the first name, in sorted order,
/// containing both "item" and "embedding" (case-insensitive)
pub fn find_item_embedding_key<'a, I>(names: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut names: Vec<&str> = names.into_iter().collect();
    names.sort_unstable();
    names.into_iter().find(|name| {
        let lower = name.to_lowercase();
        lower.contains("item") && lower.contains("embedding")
    })
}

fn item_embeddings_from(tensors: &SafeTensors<'_>, num_movies: usize) -> AppResult<ItemEmbeddings> {
    let names = tensors.names();
    let key = find_item_embedding_key(names.iter().map(|name| name.as_str())).ok_or_else(|| {
        AppError::Model("No item embedding tensor found in model artifact".to_string())
    })?;

    let view = tensors
        .tensor(key)
        .map_err(|e| AppError::Model(format!("Failed to read tensor {}: {}", key, e)))?;

    let &[rows, dims] = view.shape() else {
        return Err(AppError::Model(format!(
            "Tensor {} must be two-dimensional, got shape {:?}",
            key,
            view.shape()
        )));
    };

    if dims == 0 || rows < num_movies {
        return Err(AppError::Model(format!(
            "Tensor {} has shape [{}, {}] but the catalog has {} movies",
            key, rows, dims, num_movies
        )));
    }

    if rows > num_movies {
        tracing::warn!(
            tensor = key,
            rows,
            movies = num_movies,
            "Embedding table is larger than the catalog; extra rows ignored"
        );
    }

    let values: Vec<f64> = match view.dtype() {
        Dtype::F32 => view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
            .collect(),
        Dtype::F64 => view
            .data()
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect(),
        other => {
            return Err(AppError::Model(format!(
                "Unsupported dtype {:?} for tensor {}",
                other, key
            )))
        }
    };

    tracing::info!(tensor = key, movies = num_movies, dims, "Extracted item embeddings");

    Ok(ItemEmbeddings::new(DMatrix::from_row_slice(
        num_movies,
        dims,
        &values[..num_movies * dims],
    )))
}

/// Predictor backed by a pretrained artifact
pub struct EmbeddingPredictor {
    store: Arc<RatingStore>,
    model: ModelArtifact,
}

impl EmbeddingPredictor {
    pub fn load(store: Arc<RatingStore>, model_path: &Path) -> AppResult<Self> {
        let model = ModelArtifact::load(model_path, store.num_movies())?;
        Ok(Self::with_model(store, model))
    }

    pub fn with_model(store: Arc<RatingStore>, model: ModelArtifact) -> Self {
        Self { store, model }
    }

    /// Dense ratings over every catalog movie.
    ///
    /// Known users get their matrix row; everyone else gets the supplied
    /// ratings of catalog movies. An all-zero result is replaced by a
    /// perfect rating on the best-rated movies.
    pub fn build_user_vector(&self, query: &UserQuery) -> Vec<f64> {
        let mut vector = match self.store.resolve_user(&query.user) {
            Some(row) => self.store.user_row(row),
            None => {
                let mut vector = vec![0.0; self.store.num_movies()];
                for (movie_id, rating) in &query.ratings {
                    if let Some(col) = self.store.movie_index(*movie_id) {
                        vector[col] = *rating;
                    }
                }
                vector
            }
        };

        if vector.iter().all(|v| *v == 0.0) {
            tracing::debug!(user = %query.user, "No usable ratings, seeding with top-rated movies");
            for movie_id in self.store.top_rated_movies().iter().take(FALLBACK_MOVIES) {
                if let Some(col) = self.store.movie_index(*movie_id) {
                    vector[col] = FALLBACK_RATING;
                }
            }
        }

        vector
    }

    /// One score per catalog movie, in column order
    pub fn predict_scores(&self, user_vector: &[f64]) -> AppResult<Vec<f64>> {
        match &self.model {
            ModelArtifact::Inference(module) => {
                let input: Vec<f32> = user_vector.iter().map(|v| *v as f32).collect();
                let output = module.infer(&input)?;
                if output.len() != self.store.num_movies() {
                    return Err(AppError::Inference(format!(
                        "Model returned {} scores for {} movies",
                        output.len(),
                        self.store.num_movies()
                    )));
                }
                Ok(output.into_iter().map(f64::from).collect())
            }
            ModelArtifact::ItemEmbeddings(embeddings) => embeddings.score(user_vector),
        }
    }

    /// Movies never recommended to this user
    fn rated_set(&self, query: &UserQuery) -> HashSet<MovieId> {
        let mut rated: HashSet<MovieId> = query.ratings.keys().copied().collect();
        if let Some(row) = self.store.resolve_user(&query.user) {
            rated.extend(self.store.rated_movies(row));
        }
        rated
    }
}

impl Predictor for EmbeddingPredictor {
    fn predict(&self, query: &UserQuery) -> AppResult<Prediction> {
        let user_vector = self.build_user_vector(query);
        let mut raw_scores = self.predict_scores(&user_vector).map_err(|e| {
            tracing::error!(user = %query.user, error = %e, "Embedding prediction failed");
            e
        })?;

        let excluded = self.rated_set(query);
        let mut prediction = Prediction {
            excluded,
            ..Default::default()
        };

        for (col, &movie_id) in self.store.movie_ids().iter().enumerate() {
            if prediction.excluded.contains(&movie_id) {
                raw_scores[col] = f64::NEG_INFINITY;
                continue;
            }
            prediction.scores.insert(movie_id.to_string(), raw_scores[col]);
            prediction.candidates.push(ScoredMovie::new(movie_id, raw_scores[col]));
        }

        Ok(prediction)
    }

    fn name(&self) -> &'static str {
        "embedding"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::ratings::tests::sample_store;
    use crate::services::onnx::tests::negation_graph;
    use safetensors::tensor::TensorView;
    use std::collections::HashMap;

    pub(crate) fn safetensors_bytes(name: &str, shape: Vec<usize>, values: &[f32]) -> Vec<u8> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let view = TensorView::new(Dtype::F32, shape, &data).unwrap();
        let tensors: HashMap<String, TensorView> = [(name.to_string(), view)].into_iter().collect();
        safetensors::serialize(tensors, &None).unwrap()
    }

    /// Movies 10, 20, 30 embedded at [1,0], [0,1], [1,1]
    fn embedding_predictor() -> EmbeddingPredictor {
        let bytes = safetensors_bytes("item_embedding.weight", vec![3, 2], &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let model = ModelArtifact::from_bytes(&bytes, 3).unwrap();
        EmbeddingPredictor::with_model(Arc::new(sample_store()), model)
    }

    fn ratings(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_find_item_embedding_key() {
        let names = ["user_embedding.weight", "model.Item_Embedding.weight", "fc.bias"];
        assert_eq!(find_item_embedding_key(names), Some("model.Item_Embedding.weight"));
        assert_eq!(find_item_embedding_key(["items.weight", "embedding.bias"]), None);
        assert_eq!(
            find_item_embedding_key(["item_embedding_b", "item_embedding_a"]),
            Some("item_embedding_a")
        );
    }

    #[test]
    fn test_onnx_artifact_detected_and_scored() {
        let model = ModelArtifact::from_bytes(&negation_graph(3), 3).unwrap();
        assert_eq!(model.kind(), "inference");

        let predictor = EmbeddingPredictor::with_model(Arc::new(sample_store()), model);
        let scores = predictor.predict_scores(&[5.0, 0.0, 2.0]).unwrap();
        assert_eq!(scores, vec![-5.0, 0.0, -2.0]);

        let prediction = predictor
            .predict(&UserQuery::new("guest", &ratings(&[("10", 4.0)])))
            .unwrap();
        let ids: Vec<MovieId> = prediction.candidates.iter().map(|c| c.movie_id).collect();
        assert_eq!(ids, vec![20, 30]);
        assert_eq!(prediction.scores["20"], 0.0);
    }

    #[test]
    fn test_safetensors_artifact_detected() {
        let predictor = embedding_predictor();
        assert_eq!(predictor.model.kind(), "item_embeddings");
    }

    #[test]
    fn test_missing_item_tensor_is_fatal() {
        let bytes = safetensors_bytes("user_embedding.weight", vec![3, 2], &[0.0; 6]);
        let result = ModelArtifact::from_bytes(&bytes, 3);
        assert!(matches!(result, Err(AppError::Model(_))));
    }

    #[test]
    fn test_embedding_table_smaller_than_catalog_is_fatal() {
        let bytes = safetensors_bytes("item_embeddings", vec![2, 2], &[0.0; 4]);
        assert!(matches!(ModelArtifact::from_bytes(&bytes, 3), Err(AppError::Model(_))));
    }

    #[test]
    fn test_embedding_table_must_be_two_dimensional() {
        let bytes = safetensors_bytes("item_embeddings", vec![6], &[0.0; 6]);
        assert!(matches!(ModelArtifact::from_bytes(&bytes, 3), Err(AppError::Model(_))));
    }

    #[test]
    fn test_unrecognized_artifact_is_fatal() {
        let result = ModelArtifact::from_bytes(b"\x00\x01 not a model", 3);
        assert!(matches!(result, Err(AppError::Model(_))));
    }

    #[test]
    fn test_missing_artifact_file_is_fatal() {
        let path = std::env::temp_dir().join(format!("{}.safetensors", uuid::Uuid::new_v4()));
        assert!(matches!(ModelArtifact::load(&path, 3), Err(AppError::Model(_))));
    }

    #[test]
    fn test_build_user_vector_known_user() {
        let predictor = embedding_predictor();
        let vector = predictor.build_user_vector(&UserQuery::anonymous("2"));
        assert_eq!(vector, vec![4.0, 0.0, 2.0]);
    }

    #[test]
    fn test_build_user_vector_cold_start_skips_unknown_movies() {
        let predictor = embedding_predictor();
        let query = UserQuery::new("guest", &ratings(&[("30", 3.5), ("999", 5.0)]));
        assert_eq!(predictor.build_user_vector(&query), vec![0.0, 0.0, 3.5]);
    }

    #[test]
    fn test_build_user_vector_falls_back_to_top_rated() {
        let predictor = embedding_predictor();
        let vector = predictor.build_user_vector(&UserQuery::anonymous("guest"));
        assert_eq!(vector, vec![FALLBACK_RATING; 3]);
    }

    #[test]
    fn test_cosine_scores() {
        let predictor = embedding_predictor();
        let scores = predictor.predict_scores(&[5.0, 0.0, 0.0]).unwrap();
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert!(scores[1].abs() < 1e-6);
        assert!((scores[2] - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_empty_profile_is_an_error() {
        let predictor = embedding_predictor();
        let result = predictor.predict_scores(&[0.0, 0.0, 0.0]);
        assert!(matches!(result, Err(AppError::Inference(_))));
    }

    #[test]
    fn test_predict_excludes_rated_movies() {
        let predictor = embedding_predictor();
        let query = UserQuery::new("guest", &ratings(&[("10", 5.0)]));
        let prediction = predictor.predict(&query).unwrap();

        let ids: Vec<MovieId> = prediction.candidates.iter().map(|c| c.movie_id).collect();
        assert_eq!(ids, vec![20, 30]);
        assert!(!prediction.scores.contains_key("10"));
        assert!(prediction.scores["30"] > prediction.scores["20"]);
    }

    #[test]
    fn test_predict_known_user_excludes_matrix_ratings() {
        let predictor = embedding_predictor();
        let prediction = predictor.predict(&UserQuery::anonymous("1")).unwrap();
        let ids: Vec<MovieId> = prediction.candidates.iter().map(|c| c.movie_id).collect();
        assert_eq!(ids, vec![30]);
    }

    #[test]
    fn test_inference_module_scores() {
        let mut module = MockInferenceModule::new();
        module
            .expect_infer()
            .times(1)
            .returning(|input| Ok(input.iter().map(|v| 5.0 - v).collect()));

        let predictor = EmbeddingPredictor::with_model(
            Arc::new(sample_store()),
            ModelArtifact::Inference(Box::new(module)),
        );

        let query = UserQuery::new("guest", &ratings(&[("20", 4.0)]));
        let prediction = predictor.predict(&query).unwrap();
        assert_eq!(prediction.scores["10"], 5.0);
        assert_eq!(prediction.scores["30"], 5.0);
        assert_eq!(prediction.candidates.len(), 2);
    }

    #[test]
    fn test_inference_output_length_mismatch() {
        let mut module = MockInferenceModule::new();
        module.expect_infer().returning(|_| Ok(vec![1.0]));

        let predictor = EmbeddingPredictor::with_model(
            Arc::new(sample_store()),
            ModelArtifact::Inference(Box::new(module)),
        );
        let result = predictor.predict(&UserQuery::anonymous("1"));
        assert!(matches!(result, Err(AppError::Inference(_))));
    }

    #[test]
    fn test_inference_failure_propagates() {
        let mut module = MockInferenceModule::new();
        module
            .expect_infer()
            .returning(|_| Err(AppError::Inference("graph exploded".to_string())));

        let predictor = EmbeddingPredictor::with_model(
            Arc::new(sample_store()),
            ModelArtifact::Inference(Box::new(module)),
        );
        let result = predictor.predict(&UserQuery::anonymous("guest"));
        assert!(matches!(result, Err(AppError::Inference(msg)) if msg == "graph exploded"));
    }
}
