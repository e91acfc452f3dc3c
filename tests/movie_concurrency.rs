mod common;
use common::TestApp;
use greenlight::AppError;
use greenlight::db::{MOVIE_SORT_SAFELIST, Filters, MovieUpdate, NewMovie, Runtime};

fn movie(title: &str, genres: &[&str]) -> NewMovie {
    NewMovie {
        title: title.to_string(),
        year: 1999,
        runtime: Runtime(136),
        genres: genres.iter().map(|g| g.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_racing_updates_have_one_winner() -> anyhow::Result<()> {
    let t = TestApp::spawn().await?;
    let catalog = &t.app.catalog;
    let original = catalog.create_movie(movie("The Matrix", &["sci-fi"])).await?;
    let other = catalog.create_movie(movie("eXistenZ", &["sci-fi"])).await?;

    let (a, b) = tokio::join!(
        catalog.update_movie(
            original.id,
            Some(original.version),
            MovieUpdate {
                year: Some(2000),
                ..Default::default()
            },
        ),
        catalog.update_movie(
            original.id,
            Some(original.version),
            MovieUpdate {
                runtime: Some(Runtime(150)),
                ..Default::default()
            },
        ),
    );

    let outcomes = [a.is_ok(), b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let loser = if a.is_ok() { b } else { a };
    let err = loser.unwrap_err();
    assert!(matches!(err, AppError::EditConflict));
    assert!(err.is_retryable());

    let stored = catalog.show_movie(original.id).await?;
    assert_eq!(stored.version, original.version + 1);

    // Nothing else moved.
    assert_eq!(catalog.show_movie(other.id).await?, other);
    Ok(())
}

#[tokio::test]
async fn test_genres_absent_versus_empty() -> anyhow::Result<()> {
    let t = TestApp::spawn().await?;
    let catalog = &t.app.catalog;
    let created = catalog.create_movie(movie("Heat", &["drama"])).await?;

    let renamed = catalog
        .update_movie(
            created.id,
            None,
            MovieUpdate {
                title: Some("Heat (1995)".to_string()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(renamed.genres, vec!["drama".to_string()]);

    let cleared = catalog
        .update_movie(
            created.id,
            None,
            MovieUpdate {
                genres: Some(Vec::new()),
                ..Default::default()
            },
        )
        .await?;
    assert!(cleared.genres.is_empty());
    assert_eq!(cleared.version, created.version + 2);
    Ok(())
}

#[tokio::test]
async fn test_listing_filters_by_title_and_genre() -> anyhow::Result<()> {
    let t = TestApp::spawn().await?;
    let catalog = &t.app.catalog;
    catalog.create_movie(movie("Alien", &["horror", "sci-fi"])).await?;
    catalog.create_movie(movie("Aliens", &["action", "sci-fi"])).await?;
    catalog.create_movie(movie("Amélie", &["romance"])).await?;

    let (found, metadata) = catalog
        .list_movies(
            "alien",
            &["sci-fi".to_string()],
            Filters::new(1, 1, "-title", MOVIE_SORT_SAFELIST),
        )
        .await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "Aliens");
    assert_eq!(metadata.total_records, 2);
    assert_eq!(metadata.last_page, 2);

    let (none, metadata) = catalog
        .list_movies("", &["western".to_string()], Filters::new(1, 20, "id", MOVIE_SORT_SAFELIST))
        .await?;
    assert!(none.is_empty());
    assert_eq!(metadata.total_records, 0);
    Ok(())
}
