use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite, Transaction};
use tracing::{info, instrument};

use crate::auth::{DbSession, DbUser, Session, User};
use crate::error::AppError;
use crate::models::{
    DbDocument, DbDocumentWithContext, DbMilestone, DbMilestoneWithPlan, DbPlanItem, Document,
    DocumentWithContext, Milestone, MilestoneWithPlan, NewPlanItem, PlanItem, timestamp_or_now,
};

#[instrument(skip_all, fields(username))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    name: &str,
    username: &str,
    password: &str,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let existing = sqlx::query("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Conflict(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query("INSERT INTO users (name, username, password_hash) VALUES (?, ?, ?)")
        .bind(name)
        .bind(username)
        .bind(&hashed_password)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: i64,
    name: String,
    username: String,
    password_hash: String,
    created_at: Option<NaiveDateTime>,
}

#[instrument(skip_all, fields(username))]
pub async fn verify_credentials(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Verifying user credentials");

    let row = sqlx::query_as::<_, CredentialRow>(
        "SELECT id, name, username, password_hash, created_at FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    // An unknown username and a wrong password must be indistinguishable to
    // the caller.
    match row {
        Some(row) if bcrypt::verify(password, &row.password_hash).unwrap_or(false) => {
            Ok(Some(User {
                id: row.id,
                name: row.name,
                username: row.username,
                created_at: timestamp_or_now(row.created_at),
            }))
        }
        _ => Ok(None),
    }
}

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");

    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, name, username, created_at FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn get_all_users(pool: &Pool<Sqlite>) -> Result<Vec<User>, AppError> {
    info!("Getting all users");

    let rows = sqlx::query_as::<_, DbUser>(
        "SELECT id, name, username, created_at FROM users ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(User::from).collect())
}

#[instrument]
pub async fn delete_user(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting user");

    let res = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User {} not found", id)));
    }

    Ok(())
}

#[instrument(skip(pool, token))]
pub async fn create_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res =
        sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(token)
            .bind(expires_at)
            .execute(pool)
            .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn session_by_token(pool: &Pool<Sqlite>, token: &str) -> Result<Session, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(Session::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn delete_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[instrument]
pub async fn list_plan_items(pool: &Pool<Sqlite>) -> Result<Vec<PlanItem>, AppError> {
    info!("Listing plan items");

    let rows = sqlx::query_as::<_, DbPlanItem>("SELECT * FROM plan_items ORDER BY id ASC")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(PlanItem::from).collect())
}

#[instrument]
pub async fn get_plan_item(pool: &Pool<Sqlite>, id: i64) -> Result<PlanItem, AppError> {
    info!("Fetching plan item");

    let row = sqlx::query_as::<_, DbPlanItem>("SELECT * FROM plan_items WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(item) => Ok(PlanItem::from(item)),
        _ => Err(AppError::NotFound(format!("Plan item {} not found", id))),
    }
}

#[instrument]
pub async fn plan_item_exists(pool: &Pool<Sqlite>, id: i64) -> Result<bool, AppError> {
    let row = sqlx::query("SELECT id FROM plan_items WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.is_some())
}

#[instrument(skip(pool, item))]
pub async fn create_plan_item(
    pool: &Pool<Sqlite>,
    item: &NewPlanItem,
    created_by: i64,
) -> Result<i64, AppError> {
    info!("Creating plan item");

    let res = sqlx::query(
        "INSERT INTO plan_items (
            activity_code, product_code, task_name, week_start, week_end,
            type_tag, dependency_code, evidence_requirement,
            primary_role, co_responsibles, primary_responsible,
            status, start_date, end_date, created_by, updated_by
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&item.activity_code)
    .bind(&item.product_code)
    .bind(&item.task_name)
    .bind(item.week_start)
    .bind(item.week_end)
    .bind(&item.type_tag)
    .bind(&item.dependency_code)
    .bind(&item.evidence_requirement)
    .bind(&item.primary_role)
    .bind(&item.co_responsibles)
    .bind(&item.primary_responsible)
    .bind(item.status.as_deref().unwrap_or("pending"))
    .bind(item.start_date)
    .bind(item.end_date)
    .bind(created_by)
    .bind(created_by)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn list_plan_milestones(
    pool: &Pool<Sqlite>,
    plan_item_id: i64,
) -> Result<Vec<Milestone>, AppError> {
    info!("Listing milestones for plan item");

    let rows = sqlx::query_as::<_, DbMilestone>(
        "SELECT * FROM milestones WHERE plan_item_id = ? ORDER BY due_date",
    )
    .bind(plan_item_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Milestone::from).collect())
}

#[instrument]
pub async fn list_milestones(pool: &Pool<Sqlite>) -> Result<Vec<MilestoneWithPlan>, AppError> {
    info!("Listing all milestones");

    let rows = sqlx::query_as::<_, DbMilestoneWithPlan>(
        "SELECT m.id, m.plan_item_id, m.name, m.due_date, m.description, m.status,
                m.created_at, p.activity_code, p.task_name
         FROM milestones m
         JOIN plan_items p ON m.plan_item_id = p.id
         ORDER BY m.due_date",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(MilestoneWithPlan::from).collect())
}

#[instrument(skip_all, fields(plan_item_id, name))]
pub async fn create_milestone(
    pool: &Pool<Sqlite>,
    plan_item_id: i64,
    name: &str,
    due_date: Option<NaiveDate>,
    description: Option<&str>,
    created_by: i64,
) -> Result<i64, AppError> {
    info!("Creating milestone");

    // A milestone without its plan item is meaningless; fail before the
    // foreign key does, with a proper not-found.
    if !plan_item_exists(pool, plan_item_id).await? {
        return Err(AppError::NotFound(format!(
            "Plan item {} not found",
            plan_item_id
        )));
    }

    let res = sqlx::query(
        "INSERT INTO milestones (plan_item_id, name, due_date, description, created_by, updated_by)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(plan_item_id)
    .bind(name)
    .bind(due_date)
    .bind(description)
    .bind(created_by)
    .bind(created_by)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn delete_milestone(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting milestone");

    let res = sqlx::query("DELETE FROM milestones WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Milestone {} not found", id)));
    }

    Ok(())
}

#[instrument]
pub async fn list_documents(pool: &Pool<Sqlite>) -> Result<Vec<DocumentWithContext>, AppError> {
    info!("Listing all documents");

    let rows = sqlx::query_as::<_, DbDocumentWithContext>(
        "SELECT d.id, d.plan_item_id, d.file_name, d.storage_key, d.uploaded_by, d.created_at,
                p.activity_code, p.task_name, u.username AS uploader
         FROM documents d
         JOIN plan_items p ON d.plan_item_id = p.id
         LEFT JOIN users u ON d.uploaded_by = u.id
         ORDER BY d.created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(DocumentWithContext::from).collect())
}

#[instrument]
pub async fn list_plan_documents(
    pool: &Pool<Sqlite>,
    plan_item_id: i64,
) -> Result<Vec<DocumentWithContext>, AppError> {
    info!("Listing documents for plan item");

    let rows = sqlx::query_as::<_, DbDocumentWithContext>(
        "SELECT d.id, d.plan_item_id, d.file_name, d.storage_key, d.uploaded_by, d.created_at,
                p.activity_code, p.task_name, u.username AS uploader
         FROM documents d
         JOIN plan_items p ON d.plan_item_id = p.id
         LEFT JOIN users u ON d.uploaded_by = u.id
         WHERE d.plan_item_id = ?
         ORDER BY d.created_at DESC",
    )
    .bind(plan_item_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(DocumentWithContext::from).collect())
}

#[instrument(skip(pool))]
pub async fn document_by_storage_key(
    pool: &Pool<Sqlite>,
    storage_key: &str,
) -> Result<Document, AppError> {
    info!("Fetching document by storage key");

    let row = sqlx::query_as::<_, DbDocument>("SELECT * FROM documents WHERE storage_key = ?")
        .bind(storage_key)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(document) => Ok(Document::from(document)),
        _ => Err(AppError::NotFound("Document not found".to_string())),
    }
}

/// Sets `has_attachment` from the live document count, inside the caller's
/// transaction so concurrent attach/detach on the same item serialize.
async fn refresh_attachment_flag(
    tx: &mut Transaction<'_, Sqlite>,
    plan_item_id: i64,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE plan_items
         SET has_attachment = EXISTS(SELECT 1 FROM documents WHERE plan_item_id = ?)
         WHERE id = ?",
    )
    .bind(plan_item_id)
    .bind(plan_item_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[instrument(skip_all, fields(plan_item_id, storage_key))]
pub async fn insert_document_and_refresh_flag(
    pool: &Pool<Sqlite>,
    plan_item_id: i64,
    file_name: &str,
    storage_key: &str,
    uploaded_by: i64,
) -> Result<i64, AppError> {
    info!("Inserting document row");

    let mut tx = pool.begin().await?;

    let res = sqlx::query(
        "INSERT INTO documents (plan_item_id, file_name, storage_key, uploaded_by)
         VALUES (?, ?, ?, ?)",
    )
    .bind(plan_item_id)
    .bind(file_name)
    .bind(storage_key)
    .bind(uploaded_by)
    .execute(&mut *tx)
    .await?;

    let document_id = res.last_insert_rowid();

    refresh_attachment_flag(&mut tx, plan_item_id).await?;

    tx.commit().await?;

    Ok(document_id)
}

#[instrument(skip(pool))]
pub async fn delete_document_and_refresh_flag(
    pool: &Pool<Sqlite>,
    document_id: i64,
) -> Result<(String, i64), AppError> {
    info!("Deleting document row");

    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, (String, i64)>(
        "SELECT storage_key, plan_item_id FROM documents WHERE id = ?",
    )
    .bind(document_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((storage_key, plan_item_id)) = row else {
        return Err(AppError::NotFound(format!(
            "Document {} not found",
            document_id
        )));
    };

    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    refresh_attachment_flag(&mut tx, plan_item_id).await?;

    tx.commit().await?;

    Ok((storage_key, plan_item_id))
}

#[instrument(skip(pool))]
pub async fn all_document_keys(pool: &Pool<Sqlite>) -> Result<Vec<(i64, String)>, AppError> {
    let rows = sqlx::query_as::<_, (i64, String)>("SELECT id, storage_key FROM documents")
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn refresh_attachment_flags(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Recomputing attachment flags for all plan items");

    let res = sqlx::query(
        "UPDATE plan_items
         SET has_attachment = EXISTS(
             SELECT 1 FROM documents WHERE documents.plan_item_id = plan_items.id
         )",
    )
    .execute(pool)
    .await?;

    Ok(res.rows_affected())
}
