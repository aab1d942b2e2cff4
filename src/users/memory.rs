//! Process-local user store for development and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{NewUser, User, UserStore};
use crate::store::StoreError;

#[derive(Debug)]
struct Record {
    user: User,
    password_hash: String,
}

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    records: Mutex<HashMap<Uuid, Record>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<Uuid, Record>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .records()
            .values()
            .find(|record| record.user.email == email)
            .map(|record| record.user.clone()))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut records = self.records();
        if records
            .values()
            .any(|record| record.user.email == user.email)
        {
            return Err(StoreError::Conflict);
        }
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            verified: false,
            role: user.role,
            avatar: None,
        };
        records.insert(
            created.id,
            Record {
                user: created.clone(),
                password_hash: user.password_hash,
            },
        );
        Ok(created)
    }

    async fn set_verified(&self, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .records()
            .get_mut(&user_id)
            .map(|record| record.user.verified = true)
            .is_some())
    }

    async fn get_password_hash(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self
            .records()
            .get(&user_id)
            .map(|record| record.password_hash.clone()))
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .records()
            .get_mut(&user_id)
            .map(|record| record.password_hash = password_hash.to_string())
            .is_some())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::Role;
    use anyhow::{Context, Result};

    fn new_user(email: &str) -> NewUser {
        NewUser {
            username: "alice".to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn create_and_lookup() -> Result<()> {
        let store = MemoryUserStore::new();
        let created = store.create_user(new_user("alice@example.com")).await?;
        assert!(!created.verified);

        let found = store
            .get_user_by_email("alice@example.com")
            .await?
            .context("user should exist")?;
        assert_eq!(found, created);
        assert_eq!(
            store.get_password_hash(created.id).await?.as_deref(),
            Some("hash")
        );
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() -> Result<()> {
        let store = MemoryUserStore::new();
        store.create_user(new_user("alice@example.com")).await?;
        let err = store.create_user(new_user("alice@example.com")).await;
        assert!(matches!(err, Err(StoreError::Conflict)));
        Ok(())
    }

    #[tokio::test]
    async fn verify_and_update_password() -> Result<()> {
        let store = MemoryUserStore::new();
        let user = store.create_user(new_user("bob@example.com")).await?;

        assert!(store.set_verified(user.id).await?);
        assert!(store.update_password(user.id, "new-hash").await?);
        let found = store
            .get_user_by_email("bob@example.com")
            .await?
            .context("user should exist")?;
        assert!(found.verified);
        assert_eq!(
            store.get_password_hash(user.id).await?.as_deref(),
            Some("new-hash")
        );

        assert!(!store.set_verified(Uuid::new_v4()).await?);
        assert!(!store.update_password(Uuid::new_v4(), "x").await?);
        Ok(())
    }
}
