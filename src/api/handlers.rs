use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::{
    error::{AppError, AppResult},
    models::{Movie, MovieId, UserId},
};

use super::AppState;

const DEFAULT_PAGE: usize = 1;
const DEFAULT_PAGE_SIZE: usize = 10;
const DEFAULT_GENRE_LIMIT: usize = 20;
const UNKNOWN_TITLE: &str = "Unknown Movie";

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct RecommendationRequest {
    pub user_id: String,
    #[serde(default)]
    pub ratings: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Catalog details of one recommended movie plus its predicted score
#[derive(Debug, Serialize)]
pub struct RecommendedMovie {
    pub id: String,
    #[serde(rename = "movieId")]
    pub movie_id: String,
    pub title: String,
    pub genres: Vec<String>,
    pub poster_path: Option<String>,
    pub overview: Option<String>,
    pub vote_average: Option<f64>,
    pub predicted_rating: Option<f64>,
    pub actual_rating: Option<f64>,
}

impl RecommendedMovie {
    fn new(movie: &Movie, predicted_rating: Option<f64>) -> Self {
        Self {
            id: movie.movie_id.to_string(),
            movie_id: movie.movie_id.to_string(),
            title: movie.title.clone(),
            genres: movie.genres.clone(),
            poster_path: movie.poster_path.clone(),
            overview: movie.overview.clone(),
            vote_average: movie.vote_average,
            predicted_rating,
            actual_rating: movie.vote_average,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecommendationsResponse {
    pub recommendations: Vec<RecommendedMovie>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateIdParams {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateIdResponse {
    pub valid: bool,
    #[serde(rename = "maxUserId")]
    pub max_user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct UserRatingsRequest {
    pub user_id: String,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct UserRatingEntry {
    #[serde(rename = "movieId")]
    pub movie_id: String,
    pub rating: f64,
    pub title: String,
    /// RFC 3339 rendering of the rating timestamp
    pub rated_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserRatingsResponse {
    pub ratings: Vec<UserRatingEntry>,
    pub total_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct MoviesByGenreParams {
    pub genre: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct GenreMovie {
    pub id: MovieId,
    pub title: String,
    pub genres: Vec<String>,
    pub poster_path: String,
    pub overview: String,
}

impl From<&Movie> for GenreMovie {
    fn from(movie: &Movie) -> Self {
        Self {
            id: movie.movie_id,
            title: movie.title.clone(),
            genres: movie.genres.clone(),
            poster_path: movie.poster_path.clone().unwrap_or_default(),
            overview: movie.overview.clone().unwrap_or_default(),
        }
    }
}

fn parse_user_id(raw: &str) -> AppResult<UserId> {
    raw.trim()
        .parse::<UserId>()
        .map_err(|_| AppError::InvalidInput("Invalid user_id format".to_string()))
}

// Handlers

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Movie Recommendation API is running" }))
}

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Recommends movies for a known or cold-start user
///
/// Scoring runs on the blocking pool; the result is joined with the catalog
/// in recommendation order. IDs missing from the catalog are dropped here.
pub async fn recommendations(
    State(state): State<AppState>,
    Json(request): Json<RecommendationRequest>,
) -> AppResult<Json<RecommendationsResponse>> {
    let top_k = request.top_k.unwrap_or(state.ctx.config.default_top_k);
    let ratings = request.ratings.unwrap_or_default();
    let ctx = state.ctx.clone();
    let user_id = request.user_id;

    let result = tokio::task::spawn_blocking(move || ctx.engine.recommend(&user_id, &ratings, top_k))
        .await
        .map_err(|e| AppError::Internal(format!("Recommendation task failed: {}", e)))??;

    let recommendations = state
        .ctx
        .catalog
        .details(&result.movie_ids())
        .into_iter()
        .map(|movie| RecommendedMovie::new(movie, result.score(movie.movie_id)))
        .collect();

    Ok(Json(RecommendationsResponse { recommendations }))
}

/// Reports whether a user exists in the rating matrix
pub async fn validate_id(
    State(state): State<AppState>,
    Query(params): Query<ValidateIdParams>,
) -> AppResult<Json<ValidateIdResponse>> {
    let user_id = parse_user_id(&params.user_id)?;

    Ok(Json(ValidateIdResponse {
        valid: state.ctx.ratings.contains_user(user_id),
        max_user_id: state.ctx.ratings.max_user_id(),
    }))
}

/// Paginated rating history, newest first
pub async fn user_ratings(
    State(state): State<AppState>,
    Json(request): Json<UserRatingsRequest>,
) -> AppResult<Json<UserRatingsResponse>> {
    if request.user_id.trim().is_empty() {
        return Err(AppError::InvalidInput("user_id is required".to_string()));
    }
    let user_id = parse_user_id(&request.user_id)?;

    let page = request.page.unwrap_or(DEFAULT_PAGE).max(1);
    let limit = request.limit.unwrap_or(DEFAULT_PAGE_SIZE);

    let history = state.ctx.ratings.user_history(user_id);
    let total_count = history.len();

    let ratings = history
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .map(|rating| UserRatingEntry {
            movie_id: rating.movie_id.to_string(),
            rating: rating.rating,
            title: state
                .ctx
                .catalog
                .title(rating.movie_id)
                .unwrap_or(UNKNOWN_TITLE)
                .to_string(),
            rated_at: chrono::DateTime::from_timestamp(rating.timestamp, 0).map(|t| t.to_rfc3339()),
        })
        .collect();

    Ok(Json(UserRatingsResponse {
        ratings,
        total_count,
    }))
}

/// All genres in the catalog, sorted
pub async fn genres(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.ctx.catalog.genres())
}

/// Movies with the requested genre; a random sample when there are more than `limit`
pub async fn movies_by_genre(
    State(state): State<AppState>,
    Query(params): Query<MoviesByGenreParams>,
) -> Json<Vec<GenreMovie>> {
    let limit = params.limit.unwrap_or(DEFAULT_GENRE_LIMIT);
    let matching = state.ctx.catalog.movies_with_genre(&params.genre);

    let movies: Vec<GenreMovie> = if matching.len() > limit {
        matching
            .choose_multiple(&mut rand::thread_rng(), limit)
            .map(|movie| GenreMovie::from(*movie))
            .collect()
    } else {
        matching.into_iter().map(GenreMovie::from).collect()
    };

    tracing::debug!(genre = %params.genre, returned = movies.len(), "Genre query");

    Json(movies)
}
