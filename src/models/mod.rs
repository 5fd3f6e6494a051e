use serde::{Deserialize, Serialize};
use std::{
    collections::{hash_map::Entry, HashMap},
    fmt::Display,
};

pub mod movie;
pub mod recommendation;

pub use movie::Movie;
pub use recommendation::{RecommendationResult, ScoredMovie, UserQuery};

pub type UserId = i64;
pub type MovieId = i64;

/// A single row of the ratings table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub rating: f64,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
}

/// Parses an identifier made only of ASCII digits (e.g. "42").
///
/// Signs, whitespace and decimal points are rejected, so "-1" or " 7" never
/// resolve to a known user.
pub fn parse_numeric_id(raw: &str) -> Option<i64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// Canonical string form of a movie ID key.
///
/// Accepts leading zeros, surrounding whitespace and integral floats, so
/// `"030"`, `" 30 "` and `"30.0"` all normalize to `"30"`.
pub fn normalize_id_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if let Some(id) = parse_numeric_id(trimmed) {
        return Some(id.to_string());
    }

    let value: f64 = trimmed.parse().ok()?;
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= i64::MAX as f64 {
        Some((value as i64).to_string())
    } else {
        None
    }
}

/// Identifier of a user as submitted by a client
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserKey {
    /// Numeric ID that may exist in the ratings table
    Numeric(UserId),
    /// Anything else; always served as a cold-start user
    Opaque(String),
}

impl UserKey {
    pub fn parse(raw: &str) -> Self {
        match parse_numeric_id(raw) {
            Some(id) => UserKey::Numeric(id),
            None => UserKey::Opaque(raw.to_string()),
        }
    }
}

impl Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserKey::Numeric(id) => write!(f, "{}", id),
            UserKey::Opaque(raw) => write!(f, "{}", raw),
        }
    }
}

/// Converts client-supplied `movieId -> rating` pairs into typed form.
///
/// Keys that are not plain integers are dropped. When several keys name the
/// same movie (`"10"` and `"010"`), the canonical spelling wins, otherwise
/// the lexicographically smallest key.
pub fn parse_rating_map(raw: &HashMap<String, f64>) -> HashMap<MovieId, f64> {
    let mut keyed: Vec<(MovieId, &str, f64)> = raw
        .iter()
        .filter_map(|(key, rating)| parse_numeric_id(key.trim()).map(|id| (id, key.as_str(), *rating)))
        .collect();
    keyed.sort_by_key(|&(id, key, _)| (id, key.trim() != id.to_string(), key));

    let mut parsed = HashMap::with_capacity(keyed.len());
    for (movie_id, key, rating) in keyed {
        match parsed.entry(movie_id) {
            Entry::Vacant(slot) => {
                slot.insert(rating);
            }
            Entry::Occupied(_) => {
                tracing::warn!(movie_id, key, "Duplicate rating key for one movie; ignoring it");
            }
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_id() {
        assert_eq!(parse_numeric_id("42"), Some(42));
        assert_eq!(parse_numeric_id("007"), Some(7));
        assert_eq!(parse_numeric_id(""), None);
        assert_eq!(parse_numeric_id("-1"), None);
        assert_eq!(parse_numeric_id("abc"), None);
        assert_eq!(parse_numeric_id("4.5"), None);
    }

    #[test]
    fn test_normalize_id_key() {
        assert_eq!(normalize_id_key("30"), Some("30".to_string()));
        assert_eq!(normalize_id_key("030"), Some("30".to_string()));
        assert_eq!(normalize_id_key(" 30 "), Some("30".to_string()));
        assert_eq!(normalize_id_key("30.0"), Some("30".to_string()));
        assert_eq!(normalize_id_key("30.5"), None);
        assert_eq!(normalize_id_key("tt0111161"), None);
    }

    #[test]
    fn test_user_key_parse() {
        assert_eq!(UserKey::parse("12"), UserKey::Numeric(12));
        assert_eq!(UserKey::parse("guest"), UserKey::Opaque("guest".to_string()));
        assert_eq!(UserKey::parse("guest").to_string(), "guest");
    }

    #[test]
    fn test_parse_rating_map_skips_non_numeric_keys() {
        let raw: HashMap<String, f64> = [
            ("10".to_string(), 4.5),
            ("abc".to_string(), 3.0),
            (" 20".to_string(), 2.0),
        ]
        .into_iter()
        .collect();

        let parsed = parse_rating_map(&raw);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get(&10), Some(&4.5));
        assert_eq!(parsed.get(&20), Some(&2.0));
    }

    #[test]
    fn test_parse_rating_map_colliding_keys_resolve_the_same_way() {
        for _ in 0..20 {
            let raw: HashMap<String, f64> = [
                ("010".to_string(), 1.0),
                ("10".to_string(), 4.0),
                ("007".to_string(), 3.0),
                ("0007".to_string(), 5.0),
            ]
            .into_iter()
            .collect();

            let parsed = parse_rating_map(&raw);
            assert_eq!(parsed.len(), 2);
            assert_eq!(parsed[&10], 4.0);
            assert_eq!(parsed[&7], 5.0);
        }
    }

    #[test]
    fn test_rating_deserializes_camel_case() {
        let rating: Rating = serde_json::from_str(
            r#"{"userId": 1, "movieId": 10, "rating": 4.5, "timestamp": 964982703}"#,
        )
        .unwrap();
        assert_eq!(rating.user_id, 1);
        assert_eq!(rating.movie_id, 10);
        assert_eq!(rating.rating, 4.5);
    }
}
