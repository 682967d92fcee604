//! Generic, entity-agnostic data access.
//!
//! [`Repository`] layers soft-delete visibility and filter validation over a
//! [`Store`], which owns the actual persistence session.

use std::sync::Arc;

use sqlx::{postgres::PgRow, FromRow};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{AppError, AppResult};

pub mod filter;
#[cfg(test)]
pub mod memory;
pub mod postgres;
pub mod store;

pub use filter::{ColumnDef, Combine, Filters, Kind, Operator, Query, SearchOptions, Value};
pub use store::Store;

/// Column assignments produced by a changeset, in column order.
pub type Assignments = Vec<(&'static str, Value)>;

/// Input types that turn into column assignments. Patches only emit the
/// fields that are present.
pub trait Changeset {
    fn into_assignments(self) -> Assignments;
}

/// Capability set every persisted record provides.
pub trait Entity: for<'r> FromRow<'r, PgRow> + Clone + Send + Sync + Unpin + 'static {
    const TABLE: &'static str;
    const COLUMNS: &'static [ColumnDef];
    /// Columns carrying a store-level UNIQUE constraint.
    const UNIQUE: &'static [&'static str] = &[];
    /// Association names accepted by `search`.
    const RELATIONS: &'static [&'static str] = &[];

    type Create: Changeset + Send + 'static;
    type Patch: Changeset + Send + 'static;

    fn id(&self) -> i64;
    fn is_deleted(&self) -> bool;
    fn created_at(&self) -> OffsetDateTime;
    fn updated_at(&self) -> OffsetDateTime;

    // Row-level access for the in-memory store.

    /// Typed read of a column from the column table.
    #[cfg(test)]
    fn value(&self, column: &str) -> Option<Value>;

    /// Typed write of a column from the column table.
    #[cfg(test)]
    fn assign(&mut self, column: &str, value: Value) -> AppResult<()>;

    /// A row holding store defaults, used by stores that build rows themselves.
    #[cfg(test)]
    fn blank(id: i64, now: OffsetDateTime) -> Self;

    fn column(name: &str) -> Option<&'static ColumnDef> {
        Self::COLUMNS.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    Physical,
    Logical,
}

pub struct Repository<E: Entity> {
    store: Arc<dyn Store<E>>,
    delete_mode: DeleteMode,
    include_deleted: bool,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            delete_mode: self.delete_mode,
            include_deleted: self.include_deleted,
        }
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(store: Arc<dyn Store<E>>, delete_mode: DeleteMode) -> Self {
        Self {
            store,
            delete_mode,
            include_deleted: false,
        }
    }

    /// A copy of this repository that also sees soft-deleted rows.
    pub fn with_deleted(&self) -> Self {
        Self {
            include_deleted: true,
            ..self.clone()
        }
    }

    pub async fn get(&self, id: i64) -> AppResult<Option<E>> {
        let row = self.store.find(id).await?;
        Ok(row.filter(|r| self.include_deleted || !r.is_deleted()))
    }

    pub async fn get_all(&self, skip: i64, limit: i64) -> AppResult<Vec<E>> {
        check_page(skip, limit)?;
        let query = Query {
            include_deleted: self.include_deleted,
            skip,
            limit: Some(limit),
            ..Query::default()
        };
        self.store.select(&query).await
    }

    pub async fn search(&self, filters: &Filters, options: &SearchOptions) -> AppResult<Vec<E>> {
        if let Some(unknown) = options
            .relations
            .iter()
            .find(|r| !E::RELATIONS.contains(&r.as_str()))
        {
            return Err(AppError::validation(format!(
                "Relation {unknown} does not exist in the model."
            )));
        }
        let clauses = filter::compile::<E>(filters)?;
        let (skip, limit) = if options.single_result {
            (0, 1)
        } else {
            check_page(options.skip, options.limit)?;
            (options.skip, options.limit)
        };
        let query = Query {
            clauses,
            combine: options.combine_with,
            include_deleted: self.include_deleted,
            skip,
            limit: Some(limit),
        };
        self.store.select(&query).await
    }

    pub async fn search_one(&self, filters: &Filters) -> AppResult<Option<E>> {
        let options = SearchOptions {
            single_result: true,
            ..SearchOptions::default()
        };
        Ok(self.search(filters, &options).await?.into_iter().next())
    }

    pub async fn create(&self, data: E::Create) -> AppResult<E> {
        let row = self.store.insert(data.into_assignments()).await?;
        debug!(table = E::TABLE, id = row.id(), "row created");
        Ok(row)
    }

    pub async fn update(&self, existing: &E, patch: E::Patch) -> AppResult<E> {
        let values = patch.into_assignments();
        if values.is_empty() {
            return Ok(existing.clone());
        }
        let id = existing.id();
        let row = self
            .store
            .update(id, values)
            .await?
            .ok_or_else(|| AppError::not_found(format!("{} {id} not found", E::TABLE)))?;
        debug!(table = E::TABLE, id, "row updated");
        Ok(row)
    }

    /// Soft-deletes or removes the row depending on the delete mode. Returns
    /// `None` when nothing was affected, including a row already soft-deleted.
    pub async fn delete(&self, id: i64) -> AppResult<Option<E>> {
        let row = match self.delete_mode {
            DeleteMode::Logical => self.store.soft_delete(id).await?,
            DeleteMode::Physical => self.store.remove(id).await?,
        };
        if row.is_some() {
            debug!(table = E::TABLE, id, mode = ?self.delete_mode, "row deleted");
        }
        Ok(row)
    }
}

fn check_page(skip: i64, limit: i64) -> AppResult<()> {
    if skip < 0 || limit < 0 {
        return Err(AppError::validation("skip and limit must be non-negative"));
    }
    Ok(())
}
