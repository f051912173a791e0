//! Data lookup collaborator: the film catalogue.
//!
//! Three queries: title search, lookup by id and the streaming listing. "Nothing matched"
//! is an ordinary result (empty list or `None`), never an error; errors are reserved
//! for the backing store itself failing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod sqlite;

pub use sqlite::SqliteCatalog;

/// One catalogue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmRecord {
    pub film_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub release_year: Option<i32>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub rating: Option<String>,
    pub rental_rate: f64,
    pub rental_duration: i32,
    #[serde(default)]
    pub length: Option<i32>,
    #[serde(default)]
    pub streaming_available: bool,
}

impl FilmRecord {
    /// Store recommendation rule: adult-rated titles that rent for under $3.
    pub fn is_recommended(&self) -> bool {
        matches!(self.rating.as_deref(), Some("R") | Some("NC-17")) && self.rental_rate < 3.0
    }
}

#[async_trait]
pub trait DataLookup: Send + Sync {
    /// Case-insensitive substring match on title, ordered by title, at most `limit` rows.
    async fn find_by_title(&self, text: &str, limit: usize) -> Result<Vec<FilmRecord>>;

    async fn get_by_id(&self, id: i64) -> Result<Option<FilmRecord>>;

    /// Films available for streaming, ordered by title, at most `limit` rows.
    async fn streaming(&self, limit: usize) -> Result<Vec<FilmRecord>>;
}

/// Catalogue held in memory; used by tests and the offline demo.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    films: Vec<FilmRecord>,
}

impl InMemoryCatalog {
    pub fn new(mut films: Vec<FilmRecord>) -> Self {
        films.sort_by(|a, b| a.title.cmp(&b.title));
        Self { films }
    }

    pub fn sample() -> Self {
        Self::new(sample_films())
    }

    pub fn len(&self) -> usize {
        self.films.len()
    }

    pub fn is_empty(&self) -> bool {
        self.films.is_empty()
    }
}

#[async_trait]
impl DataLookup for InMemoryCatalog {
    async fn find_by_title(&self, text: &str, limit: usize) -> Result<Vec<FilmRecord>> {
        let needle = text.to_lowercase();
        Ok(self
            .films
            .iter()
            .filter(|f| f.title.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<FilmRecord>> {
        Ok(self.films.iter().find(|f| f.film_id == id).cloned())
    }

    async fn streaming(&self, limit: usize) -> Result<Vec<FilmRecord>> {
        Ok(self
            .films
            .iter()
            .filter(|f| f.streaming_available)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[allow(clippy::too_many_arguments)]
fn film(
    film_id: i64,
    title: &str,
    category: &str,
    rating: &str,
    rental_rate: f64,
    rental_duration: i32,
    length: i32,
    streaming_available: bool,
) -> FilmRecord {
    FilmRecord {
        film_id,
        title: title.to_string(),
        description: None,
        release_year: Some(2006),
        category: Some(category.to_string()),
        rating: Some(rating.to_string()),
        rental_rate,
        rental_duration,
        length: Some(length),
        streaming_available,
    }
}

/// A handful of rows from the DVD rental sample database.
pub fn sample_films() -> Vec<FilmRecord> {
    vec![
        film(1, "ACADEMY DINOSAUR", "Documentary", "PG", 0.99, 6, 86, true),
        film(2, "ACE GOLDFINGER", "Horror", "G", 4.99, 3, 48, false),
        film(8, "AIRPORT POLLOCK", "Horror", "R", 4.99, 6, 54, false),
        film(10, "ALADDIN CALENDAR", "Sports", "NC-17", 4.99, 6, 63, true),
        film(12, "ALASKA PHANTOM", "Music", "PG", 0.99, 6, 136, false),
        film(13, "ALI FOREVER", "Horror", "PG", 4.99, 4, 150, false),
        film(15, "ALIEN CENTER", "Foreign", "NC-17", 2.99, 5, 46, true),
        film(21, "AMERICAN CIRCUS", "Action", "R", 4.99, 3, 129, false),
        film(31, "APACHE DIVINE", "Family", "NC-17", 4.99, 5, 92, false),
        film(133, "CHAMBER ITALIAN", "Music", "NC-17", 4.99, 7, 117, true),
        film(384, "GROSSE WONDERFUL", "Horror", "R", 4.99, 5, 49, false),
        film(869, "SUSPECTS QUILLS", "Music", "PG", 2.99, 4, 47, true),
        film(998, "ZHIVAGO CORE", "Horror", "NC-17", 0.99, 6, 105, false),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn title_search_is_case_insensitive_and_ordered() {
        let catalog = InMemoryCatalog::sample();
        let found = catalog.find_by_title("al", 10).await.unwrap();
        let titles: Vec<&str> = found.iter().map(|f| f.title.as_str()).collect();
        let mut sorted = titles.clone();
        sorted.sort();
        assert_eq!(titles, sorted);
        assert!(titles.contains(&"ALIEN CENTER"));
        assert!(titles.contains(&"ALASKA PHANTOM"));
    }

    #[tokio::test]
    async fn title_search_respects_limit_and_empty_result() {
        let catalog = InMemoryCatalog::sample();
        assert_eq!(catalog.find_by_title("a", 2).await.unwrap().len(), 2);
        assert!(catalog.find_by_title("fifa", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_by_id_returns_none_when_missing() {
        let catalog = InMemoryCatalog::sample();
        assert_eq!(
            catalog.get_by_id(15).await.unwrap().unwrap().title,
            "ALIEN CENTER"
        );
        assert!(catalog.get_by_id(4242).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn streaming_lists_only_streamable_titles() {
        let catalog = InMemoryCatalog::sample();
        let films = catalog.streaming(3).await.unwrap();
        let titles: Vec<&str> = films.iter().map(|f| f.title.as_str()).collect();
        assert_eq!(titles, ["ACADEMY DINOSAUR", "ALADDIN CALENDAR", "ALIEN CENTER"]);
        assert!(InMemoryCatalog::default().streaming(5).await.unwrap().is_empty());
    }

    #[test]
    fn recommendation_rule() {
        let films = sample_films();
        let by_title = |t: &str| films.iter().find(|f| f.title == t).unwrap().clone();
        assert!(by_title("ALIEN CENTER").is_recommended());
        assert!(by_title("ZHIVAGO CORE").is_recommended());
        // R but too expensive
        assert!(!by_title("AIRPORT POLLOCK").is_recommended());
        // cheap but family friendly
        assert!(!by_title("ACADEMY DINOSAUR").is_recommended());
    }
}
