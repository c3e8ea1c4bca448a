//! In-process [`Store`] used for `serve --in-memory` and in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::Store;
use crate::error::StoreError;
use crate::groups::GroupKey;
use crate::models::{Categorization, StudentDocument, StudentFields, UserCredential};

#[derive(Default)]
struct Inner {
    partitions: HashMap<GroupKey, Vec<StudentDocument>>,
    users: HashMap<String, UserCredential>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_all(&self, group: &GroupKey) -> Result<Vec<StudentDocument>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.partitions.get(group).cloned().unwrap_or_default())
    }

    async fn get(
        &self,
        group: &GroupKey,
        id: Uuid,
    ) -> Result<Option<StudentDocument>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .partitions
            .get(group)
            .and_then(|docs| docs.iter().find(|doc| doc.id == id))
            .cloned())
    }

    async fn insert(
        &self,
        group: &GroupKey,
        fields: &StudentFields,
        derived: &Categorization,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let mut inner = self.inner.write().await;
        inner
            .partitions
            .entry(group.clone())
            .or_default()
            .push(StudentDocument {
                id,
                fields: fields.clone(),
                cached: Some(derived.clone()),
                created_at: Utc::now(),
            });
        Ok(id)
    }

    async fn update(
        &self,
        group: &GroupKey,
        id: Uuid,
        fields: &StudentFields,
        derived: &Categorization,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let doc = inner
            .partitions
            .get_mut(group)
            .and_then(|docs| docs.iter_mut().find(|doc| doc.id == id));
        if let Some(doc) = doc {
            doc.fields.merge(fields);
            doc.cached = Some(derived.clone());
        }
        Ok(())
    }

    async fn delete(&self, group: &GroupKey, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(docs) = inner.partitions.get_mut(group) {
            docs.retain(|doc| doc.id != id);
        }
        Ok(())
    }

    async fn list_group_names(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner
            .partitions
            .keys()
            .filter_map(|key| key.name().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn create_group(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .partitions
            .entry(GroupKey::Named(name.to_string()))
            .or_default();
        Ok(())
    }

    async fn drop_group(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.partitions.remove(&GroupKey::Named(name.to_string())) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound("Group not found".to_string())),
        }
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserCredential>, StoreError> {
        Ok(self.inner.read().await.users.get(username).cloned())
    }

    async fn find_user_by_token(
        &self,
        token: &str,
    ) -> Result<Option<UserCredential>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|user| user.remember_token.as_deref() == Some(token))
            .cloned())
    }

    async fn insert_user(&self, user: &UserCredential) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .users
            .entry(user.username.clone())
            .or_insert_with(|| user.clone());
        Ok(())
    }

    async fn update_user(
        &self,
        previous_username: &str,
        user: &UserCredential,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.users.remove(previous_username).is_some() {
            inner.users.insert(user.username.clone(), user.clone());
        }
        Ok(())
    }
}
