use async_trait::async_trait;

use super::{filter::Query, Assignments, Entity};
use crate::error::AppResult;

/// Persistence session contract a [`Repository`](super::Repository) runs on.
///
/// Every mutation is committed before the call returns.
#[async_trait]
pub trait Store<E: Entity>: Send + Sync {
    /// Point lookup by primary key, regardless of soft-delete state.
    async fn find(&self, id: i64) -> AppResult<Option<E>>;

    async fn select(&self, query: &Query) -> AppResult<Vec<E>>;

    async fn insert(&self, values: Assignments) -> AppResult<E>;

    /// Applies `values` and refreshes `updated_at`. `None` if the row is gone.
    async fn update(&self, id: i64, values: Assignments) -> AppResult<Option<E>>;

    /// Flags a live row as deleted. `None` if missing or already deleted.
    async fn soft_delete(&self, id: i64) -> AppResult<Option<E>>;

    async fn remove(&self, id: i64) -> AppResult<Option<E>>;
}
