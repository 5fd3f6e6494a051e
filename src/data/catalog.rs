use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::{
    error::{AppError, AppResult},
    models::{Movie, MovieId},
};

pub const MOVIES_FILE: &str = "movies.csv";
pub const LINKS_FILE: &str = "links.csv";
pub const TMDB_FILE: &str = "tmdb_data.csv";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovieRecord {
    movie_id: MovieId,
    title: String,
    #[serde(default)]
    genres: String,
    #[serde(default, rename = "vote_average")]
    vote_average: Option<f64>,
}

/// Row of links.csv: MovieLens ID to external platform IDs
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkRecord {
    movie_id: MovieId,
    #[serde(default)]
    tmdb_id: Option<i64>,
}

/// Row of tmdb_data.csv
#[derive(Debug, Deserialize)]
struct TmdbRecord {
    id: i64,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    vote_average: Option<f64>,
}

/// Movie identity table joined with the optional TMDb enrichment tables
#[derive(Debug, Clone, Default)]
pub struct MovieCatalog {
    movies: HashMap<MovieId, Movie>,
    /// IDs in file order
    order: Vec<MovieId>,
}

impl MovieCatalog {
    /// Loads movies.csv and, when both are present, links.csv + tmdb_data.csv
    pub fn load(data_dir: &Path) -> AppResult<Self> {
        let movies_path = data_dir.join(MOVIES_FILE);
        if !movies_path.exists() {
            return Err(AppError::Dataset(format!(
                "Required data file not found: {}",
                movies_path.display()
            )));
        }

        let mut reader = csv::Reader::from_path(&movies_path)?;
        let mut movies = Vec::new();
        for record in reader.deserialize::<MovieRecord>() {
            let record = record?;
            let mut movie = Movie::new(record.movie_id, record.title, &record.genres);
            movie.vote_average = record.vote_average;
            movies.push(movie);
        }

        let mut catalog = Self::from_movies(movies);

        let links_path = data_dir.join(LINKS_FILE);
        let tmdb_path = data_dir.join(TMDB_FILE);
        if links_path.exists() && tmdb_path.exists() {
            let enriched = catalog.enrich(&links_path, &tmdb_path)?;
            tracing::info!(enriched, "Joined TMDb metadata into catalog");
        }

        tracing::info!(movies = catalog.len(), "Loaded movie catalog");

        Ok(catalog)
    }

    pub fn from_movies(movies: Vec<Movie>) -> Self {
        let mut catalog = Self::default();
        for movie in movies {
            if catalog.movies.insert(movie.movie_id, movie.clone()).is_none() {
                catalog.order.push(movie.movie_id);
            }
        }
        catalog
    }

    /// Attaches poster, overview and vote average through the tmdbId link.
    ///
    /// Returns the number of movies that received metadata.
    fn enrich(&mut self, links_path: &Path, tmdb_path: &Path) -> AppResult<usize> {
        let mut tmdb: HashMap<i64, TmdbRecord> = HashMap::new();
        for record in csv::Reader::from_path(tmdb_path)?.deserialize::<TmdbRecord>() {
            let record = record?;
            tmdb.insert(record.id, record);
        }

        let mut enriched = 0;
        for link in csv::Reader::from_path(links_path)?.deserialize::<LinkRecord>() {
            let link = link?;
            let (Some(tmdb_id), Some(movie)) = (link.tmdb_id, self.movies.get_mut(&link.movie_id))
            else {
                continue;
            };

            if let Some(details) = tmdb.get(&tmdb_id) {
                movie.poster_path = details.poster_path.clone();
                movie.overview = details.overview.clone();
                movie.vote_average = details.vote_average;
                enriched += 1;
            }
        }

        Ok(enriched)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, movie_id: MovieId) -> Option<&Movie> {
        self.movies.get(&movie_id)
    }

    pub fn title(&self, movie_id: MovieId) -> Option<&str> {
        self.get(movie_id).map(|m| m.title.as_str())
    }

    /// Movies for the given IDs in the same order; unknown IDs are skipped
    pub fn details(&self, movie_ids: &[MovieId]) -> Vec<&Movie> {
        movie_ids.iter().filter_map(|id| self.get(*id)).collect()
    }

    /// Every distinct genre, sorted
    pub fn genres(&self) -> Vec<String> {
        self.movies
            .values()
            .flat_map(|m| m.genres.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Movies tagged with `genre`, in file order
    pub fn movies_with_genre(&self, genre: &str) -> Vec<&Movie> {
        self.order
            .iter()
            .filter_map(|id| self.movies.get(id))
            .filter(|m| m.has_genre(genre))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("catalog-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_movies(dir: &Path) {
        fs::write(
            dir.join(MOVIES_FILE),
            "movieId,title,genres\n\
             10,Heat (1995),Action|Crime|Thriller\n\
             20,\"American President, The (1995)\",Comedy|Drama|Romance\n\
             30,Balto (1995),Adventure|Animation|Children\n",
        )
        .unwrap();
    }

    #[test]
    fn test_load_movies_only() {
        let dir = temp_dir();
        write_movies(&dir);

        let catalog = MovieCatalog::load(&dir).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.title(20), Some("American President, The (1995)"));
        assert!(catalog.get(10).unwrap().poster_path.is_none());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_with_tmdb_enrichment() {
        let dir = temp_dir();
        write_movies(&dir);
        fs::write(
            dir.join(LINKS_FILE),
            "movieId,imdbId,tmdbId\n10,0113277,949\n20,0112346,9087\n30,0112453,\n",
        )
        .unwrap();
        fs::write(
            dir.join(TMDB_FILE),
            "id,poster_path,overview,vote_average\n949,/heat.jpg,A group of thieves,7.9\n",
        )
        .unwrap();

        let catalog = MovieCatalog::load(&dir).unwrap();
        let heat = catalog.get(10).unwrap();
        assert_eq!(heat.poster_path.as_deref(), Some("/heat.jpg"));
        assert_eq!(heat.vote_average, Some(7.9));
        assert!(catalog.get(20).unwrap().overview.is_none());
        assert!(catalog.get(30).unwrap().overview.is_none());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_movies_file_is_fatal() {
        let dir = temp_dir();
        let result = MovieCatalog::load(&dir);
        assert!(matches!(result, Err(AppError::Dataset(_))));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_genres_and_filtering() {
        let catalog = MovieCatalog::from_movies(vec![
            Movie::new(1, "A".to_string(), "Drama|Comedy"),
            Movie::new(2, "B".to_string(), "Action"),
            Movie::new(3, "C".to_string(), "Comedy"),
        ]);

        assert_eq!(catalog.genres(), vec!["Action", "Comedy", "Drama"]);
        let comedies: Vec<MovieId> = catalog
            .movies_with_genre("Comedy")
            .iter()
            .map(|m| m.movie_id)
            .collect();
        assert_eq!(comedies, vec![1, 3]);
        assert!(catalog.movies_with_genre("Horror").is_empty());
    }

    #[test]
    fn test_details_preserves_order_and_skips_unknown() {
        let catalog = MovieCatalog::from_movies(vec![
            Movie::new(1, "A".to_string(), ""),
            Movie::new(2, "B".to_string(), ""),
        ]);
        let details: Vec<MovieId> = catalog.details(&[2, 99, 1]).iter().map(|m| m.movie_id).collect();
        assert_eq!(details, vec![2, 1]);
    }
}
