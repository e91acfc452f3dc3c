//! Movie repository.
//!
//! Movies are the catalogue resource; every field change goes through the
//! versioned update in [`VersionedStore`].

use super::filters::{Filters, Metadata};
use super::versioned::{Versioned, VersionedStore, edit_conflict};
use super::DbError;
use crate::validator::{Validator, unique};
use async_trait::async_trait;
use chrono::Datelike;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::SqlitePool;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sort keys accepted by [`MovieRepository::list`].
pub const MOVIE_SORT_SAFELIST: &[&str] = &[
    "id", "-id", "title", "-title", "year", "-year", "runtime", "-runtime",
];

/// Running time in minutes, rendered as `"<n> mins"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Runtime(pub i32);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid runtime format")]
pub struct RuntimeFormatError;

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mins", self.0)
    }
}

impl FromStr for Runtime {
    type Err = RuntimeFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (minutes, unit) = s.split_once(' ').ok_or(RuntimeFormatError)?;
        if unit != "mins" {
            return Err(RuntimeFormatError);
        }
        minutes.parse().map(Runtime).map_err(|_| RuntimeFormatError)
    }
}

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Movie {
    pub id: i64,
    #[serde(skip)]
    pub created_at: i64,
    pub title: String,
    #[serde(skip_serializing_if = "is_zero_year")]
    pub year: i32,
    #[serde(skip_serializing_if = "is_zero_runtime")]
    pub runtime: Runtime,
    pub genres: Vec<String>,
    pub version: i64,
}

fn is_zero_year(year: &i32) -> bool {
    *year == 0
}

fn is_zero_runtime(runtime: &Runtime) -> bool {
    runtime.0 == 0
}

impl Versioned for Movie {
    fn id(&self) -> i64 {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }
}

/// Input for creating a movie.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewMovie {
    pub title: String,
    pub year: i32,
    pub runtime: Runtime,
    #[serde(default)]
    pub genres: Vec<String>,
}

/// Partial update: `None` leaves a field alone, `Some` replaces it.
///
/// `genres: Some(vec![])` clears the genre list; an absent `genres` key
/// keeps it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovieUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub runtime: Option<Runtime>,
    #[serde(default)]
    pub genres: Option<Vec<String>>,
}

impl MovieUpdate {
    pub fn apply(self, movie: &mut Movie) {
        if let Some(title) = self.title {
            movie.title = title;
        }
        if let Some(year) = self.year {
            movie.year = year;
        }
        if let Some(runtime) = self.runtime {
            movie.runtime = runtime;
        }
        if let Some(genres) = self.genres {
            movie.genres = genres;
        }
    }
}

type MovieRow = (i64, i64, String, i32, i32, String, i64);

const MOVIE_COLUMNS: &str = "id, created_at, title, year, runtime, genres, version";

fn movie_from_row(row: MovieRow) -> Result<Movie, DbError> {
    let (id, created_at, title, year, runtime, genres, version) = row;
    let genres = serde_json::from_str(&genres)
        .map_err(|e| DbError::Internal(format!("movie {} has corrupt genres: {}", id, e)))?;
    Ok(Movie {
        id,
        created_at,
        title,
        year,
        runtime: Runtime(runtime),
        genres,
        version,
    })
}

fn encode_genres(genres: &[String]) -> Result<String, DbError> {
    serde_json::to_string(genres).map_err(|e| DbError::Internal(e.to_string()))
}

/// Escape LIKE wildcards so a title filter is matched literally.
fn like_pattern(title: &str) -> String {
    let escaped = title
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Repository for movie operations.
pub struct MovieRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MovieRepository<'a> {
    /// Create a new movie repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, movie: &NewMovie) -> Result<Movie, DbError> {
        let now = chrono::Utc::now().timestamp();

        let (id, version) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            INSERT INTO movies (created_at, title, year, runtime, genres)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, version
            "#,
        )
        .bind(now)
        .bind(&movie.title)
        .bind(movie.year)
        .bind(movie.runtime.0)
        .bind(encode_genres(&movie.genres)?)
        .fetch_one(self.pool)
        .await?;

        Ok(Movie {
            id,
            created_at: now,
            title: movie.title.clone(),
            year: movie.year,
            runtime: movie.runtime,
            genres: movie.genres.clone(),
            version,
        })
    }

    /// One page of movies whose title contains `title` (case-insensitive,
    /// empty matches all) and whose genres include every entry of `genres`.
    pub async fn list(
        &self,
        title: &str,
        genres: &[String],
        filters: &Filters,
    ) -> Result<(Vec<Movie>, Metadata), DbError> {
        let column = filters
            .sort_column()
            .ok_or_else(|| DbError::Internal(format!("unsafe sort parameter: {}", filters.sort)))?;

        // `column` and the direction come from static safelists only.
        let sql = format!(
            r#"
            SELECT COUNT(*) OVER(), {columns}
            FROM movies
            WHERE (? = '' OR title LIKE ? ESCAPE '\')
              AND NOT EXISTS (
                SELECT 1 FROM json_each(?) AS wanted
                WHERE wanted.value NOT IN (SELECT value FROM json_each(movies.genres))
              )
            ORDER BY {column} {direction}, id ASC
            LIMIT ? OFFSET ?
            "#,
            columns = MOVIE_COLUMNS,
            column = column,
            direction = filters.sort_direction(),
        );

        let rows = sqlx::query_as::<_, (i64, i64, i64, String, i32, i32, String, i64)>(&sql)
            .bind(title)
            .bind(like_pattern(title))
            .bind(encode_genres(genres)?)
            .bind(filters.limit())
            .bind(filters.offset())
            .fetch_all(self.pool)
            .await?;

        let mut total_records = 0;
        let mut movies = Vec::with_capacity(rows.len());
        for (total, id, created_at, title, year, runtime, genres, version) in rows {
            total_records = total;
            movies.push(movie_from_row((id, created_at, title, year, runtime, genres, version))?);
        }

        let metadata = Metadata::calculate(total_records, filters.page, filters.page_size);
        Ok((movies, metadata))
    }
}

#[async_trait]
impl VersionedStore for MovieRepository<'_> {
    type Entity = Movie;

    const KIND: &'static str = "movie";

    async fn get(&self, id: i64) -> Result<Movie, DbError> {
        if id < 1 {
            return Err(DbError::NotFound);
        }

        let row = sqlx::query_as::<_, MovieRow>(&format!(
            "SELECT {} FROM movies WHERE id = ?",
            MOVIE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(movie_from_row).transpose()?.ok_or(DbError::NotFound)
    }

    async fn update(&self, movie: &mut Movie) -> Result<i64, DbError> {
        let genres = encode_genres(&movie.genres)?;

        let version = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE movies
            SET title = ?, year = ?, runtime = ?, genres = ?, version = version + 1
            WHERE id = ? AND version = ?
            RETURNING version
            "#,
        )
        .bind(&movie.title)
        .bind(movie.year)
        .bind(movie.runtime.0)
        .bind(genres)
        .bind(movie.id)
        .bind(movie.version)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| edit_conflict(Self::KIND, movie.id, movie.version))?;

        movie.version = version;
        Ok(version)
    }
}

/// Validate a movie's fields. An empty genre list is allowed so that a
/// partial update can clear it.
pub fn validate_movie(v: &mut Validator, movie: &Movie) {
    v.check(!movie.title.is_empty(), "title", "must be provided");
    v.check(movie.title.len() <= 500, "title", "must not be more than 500 bytes long");

    v.check(movie.year != 0, "year", "must be provided");
    v.check(movie.year >= 1888, "year", "must be greater than 1888");
    v.check(
        movie.year <= chrono::Utc::now().year(),
        "year",
        "must not be in the future",
    );

    v.check(movie.runtime.0 != 0, "runtime", "must be provided");
    v.check(movie.runtime.0 > 0, "runtime", "must be a positive integer");

    v.check(movie.genres.len() <= 5, "genres", "must not contain more than 5 genres");
    v.check(unique(&movie.genres), "genres", "must not contain duplicate values");
}
