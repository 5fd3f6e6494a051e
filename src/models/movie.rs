use serde::{Deserialize, Serialize};

use super::MovieId;

/// A movie from the catalog, with whatever enrichment data is available
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Movie {
    pub movie_id: MovieId,
    pub title: String,
    pub genres: Vec<String>,
    pub poster_path: Option<String>,
    pub overview: Option<String>,
    pub vote_average: Option<f64>,
}

impl Movie {
    /// Creates a movie from the identity table fields.
    ///
    /// `genres` is the pipe-separated field from movies.csv.
    pub fn new(movie_id: MovieId, title: String, genres: &str) -> Self {
        Self {
            movie_id,
            title,
            genres: split_genres(genres),
            poster_path: None,
            overview: None,
            vote_average: None,
        }
    }

    pub fn has_genre(&self, genre: &str) -> bool {
        self.genres.iter().any(|g| g == genre)
    }
}

fn split_genres(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_movie_splits_genres() {
        let movie = Movie::new(1, "Toy Story (1995)".to_string(), "Adventure|Animation| Comedy");
        assert_eq!(movie.genres, vec!["Adventure", "Animation", "Comedy"]);
        assert!(movie.has_genre("Comedy"));
        assert!(!movie.has_genre("Drama"));
    }

    #[test]
    fn test_new_movie_empty_genres() {
        let movie = Movie::new(2, "Untitled".to_string(), "");
        assert!(movie.genres.is_empty());
    }
}
