use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

#[cfg(test)]
use crate::error::{AppError, AppResult};
use crate::repo::{Assignments, Changeset, ColumnDef, Entity, Kind, Value};

/// Account role, stored as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum Role {
    SystemAdmin = 1,
    IndividualUser = 2,
}

impl Role {
    pub fn code(self) -> i64 {
        self as i64
    }

    #[cfg(test)]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Role::SystemAdmin),
            2 => Some(Role::IndividualUser),
            _ => None,
        }
    }
}

impl From<Role> for Value {
    fn from(role: Role) -> Self {
        Value::Int(role.code())
    }
}

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub phone_number: String,
    pub password_hash: String, // argon2 PHC string, never serialized
    pub role: Role,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

const COLUMNS: &[ColumnDef] = &[
    ColumnDef::new("id", Kind::Int),
    ColumnDef::new("username", Kind::Text),
    ColumnDef::new("email", Kind::Text),
    ColumnDef::new("phone_number", Kind::Text),
    ColumnDef::new("password_hash", Kind::Text),
    ColumnDef::new("role", Kind::Int),
    ColumnDef::new("is_active", Kind::Bool),
    ColumnDef::new("is_deleted", Kind::Bool),
    ColumnDef::new("created_at", Kind::Timestamp),
    ColumnDef::new("updated_at", Kind::Timestamp),
];

impl Entity for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [ColumnDef] = COLUMNS;
    const UNIQUE: &'static [&'static str] = &["email", "phone_number"];

    type Create = NewUser;
    type Patch = UserPatch;

    fn id(&self) -> i64 {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    fn updated_at(&self) -> OffsetDateTime {
        self.updated_at
    }

    #[cfg(test)]
    fn value(&self, column: &str) -> Option<Value> {
        let value = match column {
            "id" => self.id.into(),
            "username" => self.username.clone().into(),
            "email" => self.email.clone().into(),
            "phone_number" => self.phone_number.clone().into(),
            "password_hash" => self.password_hash.clone().into(),
            "role" => self.role.into(),
            "is_active" => self.is_active.into(),
            "is_deleted" => self.is_deleted.into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        };
        Some(value)
    }

    #[cfg(test)]
    fn assign(&mut self, column: &str, value: Value) -> AppResult<()> {
        match (column, value) {
            ("username", Value::Text(v)) => self.username = v,
            ("email", Value::Text(v)) => self.email = v,
            ("phone_number", Value::Text(v)) => self.phone_number = v,
            ("password_hash", Value::Text(v)) => self.password_hash = v,
            ("role", Value::Int(code)) => {
                self.role = Role::from_code(code)
                    .ok_or_else(|| AppError::validation(format!("Unknown role code {code}")))?;
            }
            ("is_active", Value::Bool(v)) => self.is_active = v,
            ("is_deleted", Value::Bool(v)) => self.is_deleted = v,
            ("created_at", Value::Timestamp(v)) => self.created_at = v,
            ("updated_at", Value::Timestamp(v)) => self.updated_at = v,
            (column, value) => {
                return Err(anyhow::anyhow!("cannot assign {value:?} to users.{column}").into())
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn blank(id: i64, now: OffsetDateTime) -> Self {
        Self {
            id,
            username: String::new(),
            email: String::new(),
            phone_number: String::new(),
            password_hash: String::new(),
            role: Role::IndividualUser,
            is_active: true,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Insert payload. The password is already hashed by the time it gets here.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub phone_number: String,
    pub password_hash: String,
    pub role: Role,
}

impl Changeset for NewUser {
    fn into_assignments(self) -> Assignments {
        vec![
            ("username", self.username.into()),
            ("email", self.email.into()),
            ("phone_number", self.phone_number.into()),
            ("password_hash", self.password_hash.into()),
            ("role", self.role.into()),
        ]
    }
}

/// Partial update. There is no `is_deleted` field; only `delete` sets it.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

impl Changeset for UserPatch {
    fn into_assignments(self) -> Assignments {
        let mut out = Assignments::new();
        if let Some(v) = self.username {
            out.push(("username", v.into()));
        }
        if let Some(v) = self.email {
            out.push(("email", v.into()));
        }
        if let Some(v) = self.phone_number {
            out.push(("phone_number", v.into()));
        }
        if let Some(v) = self.password_hash {
            out.push(("password_hash", v.into()));
        }
        if let Some(v) = self.role {
            out.push(("role", v.into()));
        }
        if let Some(v) = self.is_active {
            out.push(("is_active", v.into()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_column_reads_back() {
        let user = User::blank(3, OffsetDateTime::UNIX_EPOCH);
        for column in User::COLUMNS {
            let value = user.value(column.name).unwrap();
            assert_eq!(value.kind(), Some(column.kind), "{}", column.name);
        }
        assert!(user.value("nickname").is_none());
    }

    #[test]
    fn patch_emits_only_present_fields() {
        let patch = UserPatch {
            email: Some("a@b.com".into()),
            role: Some(Role::SystemAdmin),
            ..UserPatch::default()
        };
        assert_eq!(
            patch.into_assignments(),
            vec![("email", Value::from("a@b.com")), ("role", Value::Int(1))]
        );
    }

    #[test]
    fn assign_rejects_unknown_role_and_wrong_kind() {
        let mut user = User::blank(1, OffsetDateTime::UNIX_EPOCH);
        assert!(matches!(
            user.assign("role", Value::Int(9)),
            Err(AppError::Validation(_))
        ));
        assert!(user.assign("is_active", Value::from("yes")).is_err());
        assert!(user.assign("id", Value::Int(5)).is_err());
    }

    #[test]
    fn role_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&Role::IndividualUser).unwrap(),
            "\"INDIVIDUAL_USER\""
        );
        assert_eq!(Role::from_code(Role::SystemAdmin.code()), Some(Role::SystemAdmin));
    }
}
