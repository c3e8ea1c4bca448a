use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Store;
use crate::error::AppError;
use crate::groups::{self, resolve_collection, Collection};
use crate::models::{StudentFields, StudentView, Tier, ZoneCounts};
use crate::risk::categorize;
use crate::validation::validate_ceilings;

/// Every student in the collection, oldest first, with tiers recomputed from
/// the raw fields.
pub async fn list_students(collection: &Collection) -> Result<Vec<StudentView>, AppError> {
    let mut documents = collection.list_all().await?;
    documents.sort_by_key(|document| document.created_at);
    Ok(documents.into_iter().map(StudentView::fresh).collect())
}

pub async fn create_student(
    collection: &Collection,
    fields: StudentFields,
) -> Result<StudentView, AppError> {
    if let Some(name) = collection.key().name() {
        if groups::is_reserved(name) {
            return Err(AppError::BadRequest(format!(
                "`{name}` is a reserved group name"
            )));
        }
    }
    if let Err(errors) = validate_ceilings(&fields) {
        warn!(group = %collection.key(), %errors, "rejected student");
        return Err(errors.into());
    }

    let categorization = categorize(&fields);
    let id = collection.insert(&fields, &categorization).await?;
    info!(%id, group = %collection.key(), zone = %categorization.zone, "student added");

    Ok(StudentView {
        id,
        fields,
        categorization,
    })
}

/// Ids that do not parse can never match a stored record.
fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id.trim()).ok()
}

/// Merges `partial` into the stored student. Returns `None`, without writing
/// anything, when no student has that id.
pub async fn update_student(
    collection: &Collection,
    id: &str,
    partial: StudentFields,
) -> Result<Option<StudentView>, AppError> {
    validate_ceilings(&partial)?;

    let Some(id) = parse_id(id) else {
        debug!(id, "update for malformed id ignored");
        return Ok(None);
    };
    let Some(existing) = collection.get(id).await? else {
        debug!(%id, group = %collection.key(), "update for unknown id ignored");
        return Ok(None);
    };

    let mut merged = existing.fields;
    merged.merge(&partial);
    let categorization = categorize(&merged);
    collection.update(id, &partial, &categorization).await?;
    info!(%id, group = %collection.key(), zone = %categorization.zone, "student updated");

    let stored = collection.get(id).await?;
    Ok(stored.map(StudentView::fresh))
}

pub async fn delete_student(collection: &Collection, id: &str) -> Result<(), AppError> {
    if let Some(id) = parse_id(id) {
        collection.delete(id).await?;
        info!(%id, group = %collection.key(), "student deleted");
    }
    Ok(())
}

/// Students of the default group whose recomputed tier is `tier`. The cached
/// tier stored with each record is ignored.
pub async fn students_in_tier(
    store: &Arc<dyn Store>,
    tier: Tier,
) -> Result<Vec<StudentView>, AppError> {
    let collection = resolve_collection(store, None);
    let students = list_students(&collection).await?;
    Ok(students
        .into_iter()
        .filter(|student| student.zone() == tier)
        .collect())
}

pub async fn zone_counts(collection: &Collection) -> Result<ZoneCounts, AppError> {
    let students = list_students(collection).await?;
    Ok(ZoneCounts::tally(&students))
}
