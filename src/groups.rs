//! Group routing. Every student operation goes through a [`Collection`]
//! obtained from [`resolve_collection`]; nothing else decides which partition
//! a record lives in.

use std::fmt;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{AppError, StoreError};
use crate::models::{Categorization, StudentDocument, StudentFields};

/// Partition names used internally by a document-store layout; they are
/// never listed and cannot be created as groups.
const RESERVED_GROUPS: [&str; 2] = ["students", "users"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Default,
    Named(String),
}

impl GroupKey {
    /// Absent or blank names select the default group.
    pub fn resolve(group: Option<&str>) -> GroupKey {
        match group.map(str::trim) {
            Some(name) if !name.is_empty() => GroupKey::Named(name.to_string()),
            _ => GroupKey::Default,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            GroupKey::Default => None,
            GroupKey::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Default => f.write_str("default group"),
            GroupKey::Named(name) => f.write_str(name),
        }
    }
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_GROUPS.contains(&name) || name.starts_with("system.")
}

/// A store handle bound to one group.
#[derive(Clone)]
pub struct Collection {
    store: Arc<dyn Store>,
    key: GroupKey,
}

pub fn resolve_collection(store: &Arc<dyn Store>, group: Option<&str>) -> Collection {
    Collection {
        store: Arc::clone(store),
        key: GroupKey::resolve(group),
    }
}

impl Collection {
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub async fn list_all(&self) -> Result<Vec<StudentDocument>, StoreError> {
        self.store.list_all(&self.key).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<StudentDocument>, StoreError> {
        self.store.get(&self.key, id).await
    }

    /// Named groups come into existence on their first insert.
    pub async fn insert(
        &self,
        fields: &StudentFields,
        derived: &Categorization,
    ) -> Result<Uuid, StoreError> {
        self.store.insert(&self.key, fields, derived).await
    }

    /// Merges `fields` into the stored record. Unknown ids are a silent no-op.
    pub async fn update(
        &self,
        id: Uuid,
        fields: &StudentFields,
        derived: &Categorization,
    ) -> Result<(), StoreError> {
        self.store.update(&self.key, id, fields, derived).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.store.delete(&self.key, id).await
    }
}

pub async fn list_group_names(store: &dyn Store) -> Result<Vec<String>, StoreError> {
    let mut names: Vec<String> = store
        .list_group_names()
        .await?
        .into_iter()
        .filter(|name| !is_reserved(name))
        .collect();
    names.sort();
    Ok(names)
}

fn checked_name(name: &str) -> Result<&str, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Group name is required".to_string()));
    }
    if is_reserved(name) {
        return Err(AppError::BadRequest(format!(
            "`{name}` is a reserved group name"
        )));
    }
    Ok(name)
}

/// Idempotent; creating an existing group changes nothing.
pub async fn create_group(store: &dyn Store, name: &str) -> Result<String, AppError> {
    let name = checked_name(name)?;
    store.create_group(name).await?;
    info!(group = name, "group created");
    Ok(name.to_string())
}

/// Drops the group and every record in it. Fails with not-found when the
/// group does not exist.
pub async fn drop_group(store: &dyn Store, name: &str) -> Result<(), AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Group name is required".to_string()));
    }
    if is_reserved(name) {
        return Err(AppError::NotFound("Group not found".to_string()));
    }
    store.drop_group(name).await?;
    info!(group = name, "group dropped");
    Ok(())
}
