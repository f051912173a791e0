//! # SQLite-backed film catalogue
//!
//! [`SqliteCatalog`] implements [`DataLookup`] over a single `film` table. The table
//! is created on connect, so a fresh file or `sqlite::memory:` database works out
//! of the box; [`SqliteCatalog::insert`] seeds rows for demos and tests.
//!
//! ```rust,no_run
//! use tower_handoff::lookup::{sample_films, DataLookup, SqliteCatalog};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = SqliteCatalog::new_in_memory().await?;
//! catalog.seed(&sample_films()).await?;
//! let found = catalog.find_by_title("alien", 5).await?;
//! assert_eq!(found[0].title, "ALIEN CENTER");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use tracing::debug;

use super::{DataLookup, FilmRecord};
use crate::error::Result;

const FILM_COLUMNS: &str = "film_id, title, description, release_year, category, rating, \
                            rental_rate, rental_duration, length, streaming_available";

pub struct SqliteCatalog {
    pool: Pool<Sqlite>,
}

impl SqliteCatalog {
    /// Connects to `database_url` (e.g. `sqlite:films.db`) and creates the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory catalogue. A single connection keeps every query on the same database.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS film (
                film_id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                release_year INTEGER,
                category TEXT,
                rating TEXT,
                rental_rate REAL NOT NULL DEFAULT 4.99,
                rental_duration INTEGER NOT NULL DEFAULT 3,
                length INTEGER,
                streaming_available INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_film_title ON film(title)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Insert or replace one film.
    pub async fn insert(&self, film: &FilmRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO film ({FILM_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(film.film_id)
        .bind(&film.title)
        .bind(&film.description)
        .bind(film.release_year)
        .bind(&film.category)
        .bind(&film.rating)
        .bind(film.rental_rate)
        .bind(film.rental_duration)
        .bind(film.length)
        .bind(film.streaming_available)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn seed(&self, films: &[FilmRecord]) -> Result<()> {
        for film in films {
            self.insert(film).await?;
        }
        debug!(count = films.len(), "seeded film catalogue");
        Ok(())
    }

    fn row_to_film(row: &SqliteRow) -> Result<FilmRecord> {
        Ok(FilmRecord {
            film_id: row.try_get("film_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            release_year: row.try_get("release_year")?,
            category: row.try_get("category")?,
            rating: row.try_get("rating")?,
            rental_rate: row.try_get("rental_rate")?,
            rental_duration: row.try_get("rental_duration")?,
            length: row.try_get("length")?,
            streaming_available: row.try_get("streaming_available")?,
        })
    }
}

/// Escape LIKE wildcards so user text only ever matches literally.
fn like_pattern(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl DataLookup for SqliteCatalog {
    async fn find_by_title(&self, text: &str, limit: usize) -> Result<Vec<FilmRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {FILM_COLUMNS} FROM film WHERE title LIKE ? ESCAPE '\\' ORDER BY title LIMIT ?"
        ))
        .bind(like_pattern(text))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_film).collect()
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<FilmRecord>> {
        let row = sqlx::query(&format!("SELECT {FILM_COLUMNS} FROM film WHERE film_id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_film).transpose()
    }

    async fn streaming(&self, limit: usize) -> Result<Vec<FilmRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {FILM_COLUMNS} FROM film WHERE streaming_available = 1 ORDER BY title LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_film).collect()
    }
}
