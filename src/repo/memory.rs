use std::collections::BTreeMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{filter::Query, Assignments, Entity, Store};
use crate::error::{AppError, AppResult};

struct Rows<E> {
    by_id: BTreeMap<i64, E>,
    next_id: i64,
}

/// In-process [`Store`] used by tests and by `AppState::fake`. Enforces the
/// entity's UNIQUE columns the way the database would.
pub struct MemoryStore<E> {
    rows: RwLock<Rows<E>>,
}

impl<E: Entity> MemoryStore<E> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Rows {
                by_id: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }
}

impl<E: Entity> Default for MemoryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn check_unique<E: Entity>(rows: &BTreeMap<i64, E>, candidate: &E) -> AppResult<()> {
    for &column in E::UNIQUE {
        let Some(value) = candidate.value(column).filter(|v| !v.is_null()) else {
            continue;
        };
        let taken = rows
            .values()
            .filter(|other| other.id() != candidate.id())
            .any(|other| other.value(column).as_ref() == Some(&value));
        if taken {
            return Err(AppError::conflict(Some(column)));
        }
    }
    Ok(())
}

#[async_trait]
impl<E: Entity> Store<E> for MemoryStore<E> {
    async fn find(&self, id: i64) -> AppResult<Option<E>> {
        Ok(self.rows.read().await.by_id.get(&id).cloned())
    }

    async fn select(&self, query: &Query) -> AppResult<Vec<E>> {
        let rows = self.rows.read().await;
        let skip = usize::try_from(query.skip).unwrap_or(0);
        let limit = query
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(0));
        Ok(rows
            .by_id
            .values()
            .filter(|row| query.matches(*row))
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert(&self, values: Assignments) -> AppResult<E> {
        let mut rows = self.rows.write().await;
        let id = rows.next_id;
        let mut row = E::blank(id, OffsetDateTime::now_utc());
        for (column, value) in values {
            row.assign(column, value)?;
        }
        check_unique(&rows.by_id, &row)?;
        rows.next_id += 1;
        rows.by_id.insert(id, row.clone());
        Ok(row)
    }

    async fn update(&self, id: i64, values: Assignments) -> AppResult<Option<E>> {
        let mut rows = self.rows.write().await;
        let Some(mut row) = rows.by_id.get(&id).cloned() else {
            return Ok(None);
        };
        for (column, value) in values {
            row.assign(column, value)?;
        }
        row.assign("updated_at", OffsetDateTime::now_utc().into())?;
        check_unique(&rows.by_id, &row)?;
        rows.by_id.insert(id, row.clone());
        Ok(Some(row))
    }

    async fn soft_delete(&self, id: i64) -> AppResult<Option<E>> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.by_id.get_mut(&id).filter(|r| !r.is_deleted()) else {
            return Ok(None);
        };
        row.assign("is_deleted", true.into())?;
        row.assign("updated_at", OffsetDateTime::now_utc().into())?;
        Ok(Some(row.clone()))
    }

    async fn remove(&self, id: i64) -> AppResult<Option<E>> {
        Ok(self.rows.write().await.by_id.remove(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{filter::compile, Changeset, Filters, Operator};
    use crate::users::repo_types::{NewUser, Role, User, UserPatch};

    fn new_user(name: &str, phone: &str) -> NewUser {
        NewUser {
            username: name.into(),
            email: format!("{name}@example.com"),
            phone_number: phone.into(),
            password_hash: "hash".into(),
            role: Role::IndividualUser,
        }
    }

    #[tokio::test]
    async fn duplicate_unique_column_conflicts() {
        let store = MemoryStore::<User>::new();
        store
            .insert(new_user("ann", "1").into_assignments())
            .await
            .unwrap();

        let mut dup = new_user("bob", "1");
        dup.email = "bob@example.com".into();
        let err = store.insert(dup.into_assignments()).await.unwrap_err();
        assert_eq!(err.to_string(), "The phone_number already exists in the system.");

        // the failed insert must not burn an id
        let next = store
            .insert(new_user("cid", "2").into_assignments())
            .await
            .unwrap();
        assert_eq!(next.id, 2);
    }

    #[tokio::test]
    async fn update_cannot_steal_another_rows_email() {
        let store = MemoryStore::<User>::new();
        store.insert(new_user("ann", "1").into_assignments()).await.unwrap();
        let bob = store.insert(new_user("bob", "2").into_assignments()).await.unwrap();

        let patch = UserPatch {
            email: Some("ann@example.com".into()),
            ..UserPatch::default()
        };
        let err = store.update(bob.id, patch.into_assignments()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let unchanged = store.find(bob.id).await.unwrap().unwrap();
        assert_eq!(unchanged.email, "bob@example.com");
    }

    #[tokio::test]
    async fn select_applies_clauses_then_window() {
        let store = MemoryStore::<User>::new();
        for (i, name) in ["ann", "anna", "bob", "annie"].iter().enumerate() {
            store
                .insert(new_user(name, &i.to_string()).into_assignments())
                .await
                .unwrap();
        }
        let query = Query {
            clauses: compile::<User>(&Filters::new().with("username", Operator::ILike, "ANN"))
                .unwrap(),
            skip: 1,
            limit: Some(5),
            ..Query::default()
        };
        let names: Vec<_> = store
            .select(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, ["anna", "annie"]);
    }
}
