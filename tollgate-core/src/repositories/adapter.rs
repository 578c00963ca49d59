use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    Error, NewUser, User, UserId,
    repositories::{LoginLogRepository, RepositoryProvider, UserRepository},
    storage::{Attempt, FailureKey, KeyKind, LastLoginRecord, LoggedAttempt},
};

/// Adapter that wraps a RepositoryProvider and implements [`UserRepository`]
pub struct UserRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> UserRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> UserRepository for UserRepositoryAdapter<R> {
    async fn create(&self, user: NewUser) -> Result<User, Error> {
        self.provider.user().create(user).await
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, Error> {
        self.provider.user().find_by_id(id).await
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, Error> {
        self.provider.user().find_by_login(login).await
    }
}

/// Adapter that wraps a RepositoryProvider and implements [`LoginLogRepository`]
pub struct LoginLogRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> LoginLogRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> LoginLogRepository for LoginLogRepositoryAdapter<R> {
    async fn append(&self, attempt: &Attempt) -> Result<LoggedAttempt, Error> {
        self.provider.login_log().append(attempt).await
    }

    async fn failures_since_last_success(&self, key: &FailureKey) -> Result<u64, Error> {
        self.provider
            .login_log()
            .failures_since_last_success(key)
            .await
    }

    async fn failure_counts(&self, kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error> {
        self.provider.login_log().failure_counts(kind).await
    }

    async fn last_logins(&self, user_id: UserId) -> Result<Option<LastLoginRecord>, Error> {
        self.provider.login_log().last_logins(user_id).await
    }

    fn replay(&self) -> BoxStream<'_, Result<LoggedAttempt, Error>> {
        self.provider.login_log().replay()
    }
}
