use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use rocket::fs::TempFile;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::{
    all_document_keys, delete_document_and_refresh_flag, insert_document_and_refresh_flag,
    plan_item_exists, refresh_attachment_flags,
};
use crate::error::AppError;
use crate::storage::UploadStore;

static UNSAFE_FILE_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));

const MAX_FILE_NAME_LEN: usize = 100;

/// Reduces a caller-supplied file name to a safe single path component.
/// Anything that could escape the upload directory is collapsed; names that
/// sanitize to nothing are rejected.
pub fn sanitize_file_name(raw: &str) -> Result<String, AppError> {
    let cleaned = UNSAFE_FILE_NAME_CHARS.replace_all(raw, "_");
    let cleaned = cleaned.trim_start_matches(['.', '_']).trim_end_matches('_');
    let cleaned: String = cleaned.chars().take(MAX_FILE_NAME_LEN).collect();

    if cleaned.is_empty() {
        return Err(AppError::Validation(format!(
            "File name '{}' is not usable",
            raw
        )));
    }

    Ok(cleaned)
}

/// Storage keys carry a random component so two uploads of the same file
/// never collide, and so a key is never equal to its display name.
fn new_storage_key(sanitized_name: &str) -> String {
    format!("{}_{}", Uuid::new_v4().simple(), sanitized_name)
}

#[instrument(skip(pool, store, content))]
pub async fn attach_document(
    pool: &SqlitePool,
    store: &UploadStore,
    plan_item_id: i64,
    display_name: &str,
    content: &[u8],
    uploaded_by: i64,
) -> Result<i64, AppError> {
    info!("Attaching document to plan item");

    let file_name = sanitize_file_name(display_name)?;

    if !plan_item_exists(pool, plan_item_id).await? {
        return Err(AppError::NotFound(format!(
            "Plan item {} not found",
            plan_item_id
        )));
    }

    let storage_key = new_storage_key(&file_name);
    if let Err(err) = store.save(&storage_key, content).await {
        // A partial write must not survive the failure.
        let _ = store.remove(&storage_key).await;
        return Err(err);
    }

    finish_attach(pool, store, plan_item_id, &file_name, &storage_key, uploaded_by).await
}

#[instrument(skip(pool, store, file))]
pub async fn attach_document_file(
    pool: &SqlitePool,
    store: &UploadStore,
    plan_item_id: i64,
    display_name: &str,
    file: &mut TempFile<'_>,
    uploaded_by: i64,
) -> Result<i64, AppError> {
    info!("Attaching uploaded file to plan item");

    let file_name = sanitize_file_name(display_name)?;

    if !plan_item_exists(pool, plan_item_id).await? {
        return Err(AppError::NotFound(format!(
            "Plan item {} not found",
            plan_item_id
        )));
    }

    let storage_key = new_storage_key(&file_name);
    if let Err(err) = store.save_temp_file(&storage_key, file).await {
        let _ = store.remove(&storage_key).await;
        return Err(err);
    }

    finish_attach(pool, store, plan_item_id, &file_name, &storage_key, uploaded_by).await
}

/// The file is on disk by the time this runs. A row must never be committed
/// without its file, and a failed commit must not leave the file behind.
async fn finish_attach(
    pool: &SqlitePool,
    store: &UploadStore,
    plan_item_id: i64,
    file_name: &str,
    storage_key: &str,
    uploaded_by: i64,
) -> Result<i64, AppError> {
    match insert_document_and_refresh_flag(pool, plan_item_id, file_name, storage_key, uploaded_by)
        .await
    {
        Ok(document_id) => Ok(document_id),
        Err(err) => {
            if let Err(cleanup_err) = store.remove(storage_key).await {
                warn!(storage_key, error = %cleanup_err, "Failed to remove file after aborted attach");
            }
            Err(err)
        }
    }
}

#[instrument(skip(pool, store))]
pub async fn detach_document(
    pool: &SqlitePool,
    store: &UploadStore,
    document_id: i64,
) -> Result<(), AppError> {
    info!("Detaching document");

    let (storage_key, plan_item_id) = delete_document_and_refresh_flag(pool, document_id).await?;

    // The row and flag are already committed; a failed file delete only
    // leaves an orphan file behind, never a dangling reference.
    if let Err(err) = store.remove(&storage_key).await {
        warn!(storage_key, plan_item_id, error = %err, "Could not delete stored file, leaving orphan behind");
    }

    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub orphan_files_removed: u64,
    pub dangling_rows: u64,
}

/// Idempotent safety net for the two-resource coupling: orphan files are
/// removed, rows pointing at missing files are surfaced (not deleted), and
/// every `has_attachment` flag is recomputed from the live counts.
#[instrument(skip(pool, store))]
pub async fn reconcile_attachments(
    pool: &SqlitePool,
    store: &UploadStore,
) -> Result<ReconcileReport, AppError> {
    info!("Reconciling document rows against stored files");

    let mut report = ReconcileReport::default();

    let rows = all_document_keys(pool).await?;
    let referenced: HashSet<&str> = rows.iter().map(|(_, key)| key.as_str()).collect();

    for key in store.list_keys().await? {
        if !referenced.contains(key.as_str()) {
            match store.remove(&key).await {
                Ok(()) => report.orphan_files_removed += 1,
                Err(err) => warn!(storage_key = %key, error = %err, "Could not remove orphan file"),
            }
        }
    }

    for (document_id, key) in &rows {
        if !store.exists(key).await {
            warn!(document_id, storage_key = %key, "Document row references a missing file");
            report.dangling_rows += 1;
        }
    }

    refresh_attachment_flags(pool).await?;

    Ok(report)
}
