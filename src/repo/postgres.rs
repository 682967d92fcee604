use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::warn;

use super::{
    filter::{Clause, Operator, Query, Value},
    Assignments, Entity, Store,
};
use crate::error::{AppError, AppResult};

const UNIQUE_VIOLATION: &str = "23505";

/// [`Store`] backed by a Postgres pool. Reads run straight on the pool; each
/// write runs in its own transaction, rolled back on failure.
pub struct PgStore<E> {
    pool: PgPool,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> PgStore<E> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<E: Entity> Store<E> for PgStore<E> {
    async fn find(&self, id: i64) -> AppResult<Option<E>> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", E::TABLE);
        let row = sqlx::query_as::<_, E>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn select(&self, query: &Query) -> AppResult<Vec<E>> {
        let mut qb = select_query::<E>(query);
        let rows = qb.build_query_as::<E>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn insert(&self, values: Assignments) -> AppResult<E> {
        write::<E>(&self.pool, insert_query::<E>(values))
            .await?
            .ok_or_else(|| anyhow::anyhow!("insert into {} returned no row", E::TABLE).into())
    }

    async fn update(&self, id: i64, values: Assignments) -> AppResult<Option<E>> {
        write::<E>(&self.pool, update_query::<E>(id, values)).await
    }

    async fn soft_delete(&self, id: i64) -> AppResult<Option<E>> {
        write::<E>(&self.pool, soft_delete_query::<E>(id)).await
    }

    async fn remove(&self, id: i64) -> AppResult<Option<E>> {
        write::<E>(&self.pool, remove_query::<E>(id)).await
    }
}

async fn write<E: Entity>(
    pool: &PgPool,
    mut qb: QueryBuilder<'static, Postgres>,
) -> AppResult<Option<E>> {
    let mut tx = pool.begin().await?;
    let result = qb.build_query_as::<E>().fetch_optional(&mut *tx).await;
    match result {
        Ok(row) => {
            tx.commit().await?;
            Ok(row)
        }
        Err(err) => {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, table = E::TABLE, "rollback failed");
            }
            Err(translate::<E>(err))
        }
    }
}

/// Unique violations become conflicts naming the column when the constraint
/// name contains it (`users_email_key` → `email`).
fn translate<E: Entity>(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            let field = db
                .constraint()
                .and_then(|name| E::UNIQUE.iter().copied().find(|col| name.contains(col)));
            return AppError::conflict(field);
        }
    }
    err.into()
}

pub(crate) fn select_query<E: Entity>(query: &Query) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT * FROM {}", E::TABLE));

    let mut sep = " WHERE ";
    if !query.include_deleted {
        qb.push(sep).push("is_deleted = FALSE");
        sep = " AND ";
    }
    if !query.clauses.is_empty() {
        qb.push(sep).push("(");
        for (i, clause) in query.clauses.iter().enumerate() {
            if i > 0 {
                qb.push(query.combine.sql());
            }
            push_clause(&mut qb, clause);
        }
        qb.push(")");
    }

    qb.push(" ORDER BY id");
    if let Some(limit) = query.limit {
        qb.push(" LIMIT ").push_bind(limit);
    }
    if query.skip > 0 {
        qb.push(" OFFSET ").push_bind(query.skip);
    }
    qb
}

fn insert_query<E: Entity>(values: Assignments) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("INSERT INTO {}", E::TABLE));
    if values.is_empty() {
        qb.push(" DEFAULT VALUES RETURNING *");
        return qb;
    }
    qb.push(" (");
    for (i, (column, _)) in values.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(*column);
    }
    qb.push(") VALUES (");
    for (i, (_, value)) in values.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        push_value(&mut qb, value);
    }
    qb.push(") RETURNING *");
    qb
}

fn update_query<E: Entity>(id: i64, values: Assignments) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", E::TABLE));
    for (column, value) in &values {
        qb.push(*column).push(" = ");
        push_value(&mut qb, value);
        qb.push(", ");
    }
    qb.push("updated_at = now() WHERE id = ")
        .push_bind(id)
        .push(" RETURNING *");
    qb
}

/// Only a live row is flagged, so deleting twice returns no row the second time.
fn soft_delete_query<E: Entity>(id: i64) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "UPDATE {} SET is_deleted = TRUE, updated_at = now() WHERE id = ",
        E::TABLE
    ));
    qb.push_bind(id).push(" AND is_deleted = FALSE RETURNING *");
    qb
}

fn remove_query<E: Entity>(id: i64) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("DELETE FROM {} WHERE id = ", E::TABLE));
    qb.push_bind(id).push(" RETURNING *");
    qb
}

fn push_clause(qb: &mut QueryBuilder<'static, Postgres>, clause: &Clause) {
    if let (Operator::In, Value::List(items)) = (clause.op, &clause.value) {
        if items.is_empty() {
            qb.push("FALSE");
            return;
        }
    }

    qb.push(clause.column);
    match clause.op {
        Operator::Eq if clause.value.is_null() => {
            qb.push(" IS NULL");
        }
        Operator::Ne if clause.value.is_null() => {
            qb.push(" IS NOT NULL");
        }
        Operator::Eq => {
            qb.push(" = ");
            push_value(qb, &clause.value);
        }
        Operator::Ne => {
            qb.push(" <> ");
            push_value(qb, &clause.value);
        }
        Operator::Gt => {
            qb.push(" > ");
            push_value(qb, &clause.value);
        }
        Operator::Lt => {
            qb.push(" < ");
            push_value(qb, &clause.value);
        }
        Operator::Like | Operator::ILike => {
            qb.push(if clause.op == Operator::Like { " LIKE " } else { " ILIKE " });
            match &clause.value {
                Value::Text(needle) => {
                    qb.push_bind(format!("%{needle}%"));
                }
                other => push_value(qb, other),
            }
        }
        Operator::In => {
            qb.push(" IN ");
            push_value(qb, &clause.value);
        }
        Operator::IsNull => {
            qb.push(if clause.value == Value::Bool(true) {
                " IS NULL"
            } else {
                " IS NOT NULL"
            });
        }
    }
}

fn push_value(qb: &mut QueryBuilder<'static, Postgres>, value: &Value) {
    match value {
        Value::Null => {
            qb.push("NULL");
        }
        Value::Bool(v) => {
            qb.push_bind(*v);
        }
        Value::Int(v) => {
            qb.push_bind(*v);
        }
        Value::Text(v) => {
            qb.push_bind(v.clone());
        }
        Value::Timestamp(v) => {
            qb.push_bind(*v);
        }
        Value::List(items) => {
            qb.push("(");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                push_value(qb, item);
            }
            qb.push(")");
        }
    }
}
