//! Optimistic concurrency shared by every mutable entity.
//!
//! Writers never lock across a request. Each entity carries a version; an
//! update is a conditional write against the version the caller read, and
//! the store bumps it by exactly one when the write lands. A writer that
//! lost the race gets [`DbError::EditConflict`] and must re-read.

use super::DbError;
use async_trait::async_trait;

/// An entity guarded by a monotonic version stamp.
pub trait Versioned {
    fn id(&self) -> i64;
    fn version(&self) -> i64;
}

/// Read/update protocol implemented by each versioned repository.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    type Entity: Versioned + Send;

    /// Label used in logs and metrics.
    const KIND: &'static str;

    /// Fetch the current snapshot, or [`DbError::NotFound`].
    async fn get(&self, id: i64) -> Result<Self::Entity, DbError>;

    /// Write `entity` if the stored version still equals `entity.version()`.
    ///
    /// On success the entity's version is advanced in place and returned.
    async fn update(&self, entity: &mut Self::Entity) -> Result<i64, DbError>;
}

/// Fast-fail when a client-supplied version is already stale.
///
/// Only an optimization: the conditional write is what settles the race.
pub fn check_expected_version<E: Versioned>(entity: &E, expected: Option<i64>) -> Result<(), DbError> {
    match expected {
        Some(expected) if expected != entity.version() => {
            tracing::debug!(id = entity.id(), expected, actual = entity.version(), "Stale expected version");
            Err(DbError::EditConflict)
        }
        _ => Ok(()),
    }
}

/// Read, pre-check, mutate, then conditionally write.
///
/// `mutate` applies the caller's changes and may reject them (for example
/// with validation errors); nothing is written in that case.
pub async fn update_versioned<S, E, F>(
    store: &S,
    id: i64,
    expected: Option<i64>,
    mutate: F,
) -> Result<S::Entity, E>
where
    S: VersionedStore,
    E: From<DbError>,
    F: FnOnce(&mut S::Entity) -> Result<(), E> + Send,
{
    let mut entity = store.get(id).await?;
    check_expected_version(&entity, expected)?;
    mutate(&mut entity)?;
    store.update(&mut entity).await?;
    Ok(entity)
}

/// The conditional write matched no row.
pub(crate) fn edit_conflict(kind: &'static str, id: i64, version: i64) -> DbError {
    tracing::info!(kind, id, version, "Edit conflict on versioned update");
    crate::metrics::record_edit_conflict(kind);
    DbError::EditConflict
}
