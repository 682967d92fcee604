use std::{ops::Deref, sync::Arc};

use tracing::{debug, info};

use super::{
    dto::SignupRequest,
    repo_types::{NewUser, Role, User},
};
use crate::{
    auth::password::{verify_password, Argon2Hasher},
    error::AppResult,
    repo::{DeleteMode, Filters, Repository, Store},
};

/// User-specific operations on top of the generic repository. Deletes are
/// logical.
#[derive(Clone)]
pub struct UserRepository {
    inner: Repository<User>,
    hasher: Argon2Hasher,
}

impl Deref for UserRepository {
    type Target = Repository<User>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl UserRepository {
    pub fn new(store: Arc<dyn Store<User>>, hasher: Argon2Hasher) -> Self {
        Self {
            inner: Repository::new(store, DeleteMode::Logical),
            hasher,
        }
    }

    pub fn hasher(&self) -> &Argon2Hasher {
        &self.hasher
    }

    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.search_one(&Filters::new().eq("email", email)).await
    }

    /// The live user with this email when `password` matches its hash.
    /// A missing account and a wrong password look the same to the caller.
    pub async fn authenticate(&self, email: &str, password: &str) -> AppResult<Option<User>> {
        let Some(user) = self.find_by_email(email).await? else {
            debug!("authenticate: unknown email");
            return Ok(None);
        };
        if !verify_password(password, &user.password_hash)? {
            debug!(user_id = user.id, "authenticate: password mismatch");
            return Ok(None);
        }
        Ok(Some(user))
    }

    /// Creates an individual account. The role is never taken from the caller.
    pub async fn signup(&self, request: SignupRequest) -> AppResult<User> {
        let SignupRequest {
            username,
            email,
            phone_number,
            password,
            password_confirm: _,
        } = request;
        let password_hash = self.hasher.hash(&password)?;
        let user = self
            .create(NewUser {
                username,
                email,
                phone_number,
                password_hash,
                role: Role::IndividualUser,
            })
            .await?;
        info!(user_id = user.id, "user created");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PasswordConfig;
    use crate::error::AppError;
    use crate::repo::{memory::MemoryStore, Entity};

    fn users() -> UserRepository {
        let hasher = Argon2Hasher::new(&PasswordConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();
        UserRepository::new(Arc::new(MemoryStore::<User>::new()), hasher)
    }

    fn request(email: &str, phone: &str) -> SignupRequest {
        SignupRequest {
            username: "ann".into(),
            email: email.into(),
            phone_number: phone.into(),
            password: "passw0rd".into(),
            password_confirm: "passw0rd".into(),
        }
    }

    #[tokio::test]
    async fn signup_hashes_and_forces_role() {
        let repo = users();
        let user = repo.signup(request("ann@example.com", "1")).await.unwrap();
        assert_eq!(user.role, Role::IndividualUser);
        assert_ne!(user.password_hash, "passw0rd");
        assert!(verify_password("passw0rd", &user.password_hash).unwrap());
        assert!(user.is_active);
    }

    #[tokio::test]
    async fn authenticate_distinguishes_nothing_on_failure() {
        let repo = users();
        let user = repo.signup(request("ann@example.com", "1")).await.unwrap();

        let ok = repo.authenticate("ann@example.com", "passw0rd").await.unwrap();
        assert_eq!(ok.map(|u| u.id), Some(user.id));

        assert!(repo.authenticate("ann@example.com", "wrong000").await.unwrap().is_none());
        assert!(repo.authenticate("bob@example.com", "passw0rd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleted_user_cannot_authenticate() {
        let repo = users();
        let user = repo.signup(request("ann@example.com", "1")).await.unwrap();
        repo.delete(user.id()).await.unwrap();
        assert!(repo.authenticate("ann@example.com", "passw0rd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_phone_is_a_conflict() {
        let repo = users();
        repo.signup(request("ann@example.com", "1")).await.unwrap();
        let err = repo.signup(request("bob@example.com", "1")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m.contains("phone_number")));
    }
}
