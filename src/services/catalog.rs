//! Movie catalogue flows.

use crate::db::{
    Database, Filters, Metadata, Movie, MovieUpdate, NewMovie, VersionedStore, update_versioned,
    validate_filters, validate_movie,
};
use crate::error::{AppError, AppResult};
use crate::telemetry::{FlowTimer, spans};
use crate::validator::Validator;
use tracing::{Instrument, info};

/// Catalogue service.
#[derive(Clone)]
pub struct CatalogService {
    db: Database,
}

impl CatalogService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create_movie(&self, input: NewMovie) -> AppResult<Movie> {
        let timer = FlowTimer::new("create_movie");
        timer.observe(self.create(input).instrument(spans::flow("create_movie")).await)
    }

    async fn create(&self, input: NewMovie) -> AppResult<Movie> {
        let draft = Movie {
            id: 0,
            created_at: 0,
            title: input.title.clone(),
            year: input.year,
            runtime: input.runtime,
            genres: input.genres.clone(),
            version: 1,
        };
        let mut v = Validator::new();
        validate_movie(&mut v, &draft);
        v.into_result()?;

        let movie = self.db.movies().insert(&input).await?;
        info!(movie_id = movie.id, "Movie created");
        Ok(movie)
    }

    pub async fn show_movie(&self, id: i64) -> AppResult<Movie> {
        let timer = FlowTimer::new("show_movie");
        timer.observe(self.db.movies().get(id).await.map_err(AppError::from))
    }

    /// Apply a partial update under optimistic concurrency.
    ///
    /// `expected_version`, when given, must match the stored version or the
    /// call fails with [`AppError::EditConflict`] before anything is
    /// validated. The merged movie is validated before the conditional write.
    pub async fn update_movie(
        &self,
        id: i64,
        expected_version: Option<i64>,
        update: MovieUpdate,
    ) -> AppResult<Movie> {
        let timer = FlowTimer::new("update_movie");
        let movies = self.db.movies();

        let result = update_versioned(&movies, id, expected_version, |movie: &mut Movie| {
            update.apply(movie);
            let mut v = Validator::new();
            validate_movie(&mut v, movie);
            v.into_result().map_err(AppError::from)
        })
        .instrument(spans::flow("update_movie"))
        .await;

        if let Ok(ref movie) = result {
            info!(movie_id = movie.id, version = movie.version, "Movie updated");
        }
        timer.observe(result)
    }

    /// One page of movies matching `title` and containing all `genres`.
    pub async fn list_movies(
        &self,
        title: &str,
        genres: &[String],
        filters: Filters,
    ) -> AppResult<(Vec<Movie>, Metadata)> {
        let timer = FlowTimer::new("list_movies");

        let mut v = Validator::new();
        validate_filters(&mut v, &filters);
        if let Err(errors) = v.into_result() {
            return timer.observe(Err(errors.into()));
        }

        timer.observe(
            self.db
                .movies()
                .list(title, genres, &filters)
                .await
                .map_err(AppError::from),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MOVIE_SORT_SAFELIST, Runtime};

    async fn setup() -> CatalogService {
        CatalogService::new(Database::new(":memory:").await.unwrap())
    }

    fn casablanca() -> NewMovie {
        NewMovie {
            title: "Casablanca".to_string(),
            year: 1942,
            runtime: Runtime(102),
            genres: vec!["drama".to_string(), "romance".to_string()],
        }
    }

    #[tokio::test]
    async fn test_create_and_show() {
        let catalog = setup().await;
        let created = catalog.create_movie(casablanca()).await.unwrap();
        assert_eq!(created.version, 1);

        let shown = catalog.show_movie(created.id).await.unwrap();
        assert_eq!(shown, created);
        assert!(matches!(catalog.show_movie(999).await, Err(AppError::NotFound)));
        assert!(matches!(catalog.show_movie(0).await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_invalid_movie_is_rejected() {
        let catalog = setup().await;
        let err = catalog
            .create_movie(NewMovie {
                title: String::new(),
                year: 1700,
                runtime: Runtime(-5),
                genres: vec!["a".to_string(), "a".to_string()],
            })
            .await
            .unwrap_err();

        match err {
            AppError::Validation(errors) => {
                assert_eq!(
                    errors.fields().collect::<Vec<_>>(),
                    vec!["genres", "runtime", "title", "year"]
                );
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_partial_update_bumps_version() {
        let catalog = setup().await;
        let movie = catalog.create_movie(casablanca()).await.unwrap();

        let updated = catalog
            .update_movie(
                movie.id,
                Some(1),
                MovieUpdate {
                    year: Some(1943),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.year, 1943);
        assert_eq!(updated.title, "Casablanca");
        assert_eq!(updated.version, 2);

        // The client still holds version 1.
        assert!(matches!(
            catalog
                .update_movie(movie.id, Some(1), MovieUpdate::default())
                .await,
            Err(AppError::EditConflict)
        ));
    }

    #[tokio::test]
    async fn test_invalid_update_writes_nothing() {
        let catalog = setup().await;
        let movie = catalog.create_movie(casablanca()).await.unwrap();

        let err = catalog
            .update_movie(
                movie.id,
                None,
                MovieUpdate {
                    title: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let stored = catalog.show_movie(movie.id).await.unwrap();
        assert_eq!(stored.title, "Casablanca");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_update_missing_movie() {
        let catalog = setup().await;
        assert!(matches!(
            catalog.update_movie(42, None, MovieUpdate::default()).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_validates_filters() {
        let catalog = setup().await;
        catalog.create_movie(casablanca()).await.unwrap();

        let (movies, metadata) = catalog
            .list_movies("casa", &[], Filters::new(1, 20, "-year", MOVIE_SORT_SAFELIST))
            .await
            .unwrap();
        assert_eq!(movies.len(), 1);
        assert_eq!(metadata.total_records, 1);

        match catalog
            .list_movies("", &[], Filters::new(0, 500, "budget", MOVIE_SORT_SAFELIST))
            .await
        {
            Err(AppError::Validation(errors)) => {
                assert_eq!(
                    errors.fields().collect::<Vec<_>>(),
                    vec!["page", "page_size", "sort"]
                );
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
