use async_trait::async_trait;

use crate::{Error, NewUser, User, UserId};

/// Repository for credential lookups
#[async_trait]
pub trait UserRepository: Send + Sync + 'static {
    async fn create(&self, user: NewUser) -> Result<User, Error>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, Error>;
    async fn find_by_login(&self, login: &str) -> Result<Option<User>, Error>;
}
