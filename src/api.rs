use chrono::{Duration, NaiveDate, Utc};
use rocket::FromForm;
use rocket::State;
use rocket::form::Form;
use rocket::fs::{NamedFile, TempFile};
use rocket::http::Status;
use rocket::serde::{Deserialize, Serialize, json::Json};
use serde_json::{Map, Value};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{BearerToken, Session, User};
use crate::db::{
    create_milestone, create_plan_item, create_session, create_user, delete_milestone,
    delete_session, delete_user, document_by_storage_key, get_all_users, list_documents,
    list_milestones, list_plan_documents, list_plan_items, list_plan_milestones,
    verify_credentials,
};
use crate::documents::{attach_document_file, detach_document};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::models::{DocumentWithContext, Milestone, MilestoneWithPlan, NewPlanItem, PlanItem};
use crate::storage::UploadStore;
use crate::update::{
    MILESTONE_UPDATE, PLAN_ITEM_UPDATE, USER_UPDATE, UpdateOutcome, apply_partial_update,
};
use crate::validation::ValidateExt;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "username is required"))]
    username: String,
    #[validate(length(min = 1, message = "password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
}

#[derive(Deserialize, Validate, Clone)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 120, message = "name is required"))]
    pub name: String,
    #[validate(length(min = 3, max = 64, message = "username must be 3-64 characters"))]
    pub username: String,
    #[validate(length(min = 8, max = 128, message = "password must be at least 8 characters"))]
    pub password: String,
}

#[derive(Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: i64,
}

#[derive(Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[post("/auth/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, AppError> {
    login.check()?;

    let Some(user) = verify_credentials(db, &login.username, &login.password).await? else {
        return Err(AppError::Authentication(
            "Invalid username or password".to_string(),
        ));
    };

    let token = Session::generate_token();
    let expires_at = (Utc::now() + Duration::hours(config.session_ttl_hours)).naive_utc();

    create_session(db, user.id, &token, expires_at).await?;

    Ok(Json(LoginResponse {
        token,
        user: UserProfile {
            id: user.id,
            name: user.name,
        },
    }))
}

#[post("/auth/register", data = "<registration>")]
pub async fn api_register(
    registration: Json<RegisterRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<(Status, Json<CreatedResponse>), AppError> {
    registration.check()?;

    let id = create_user(
        db,
        &registration.name,
        &registration.username,
        &registration.password,
    )
    .await?;

    Ok((Status::Created, Json(CreatedResponse { id })))
}

#[post("/auth/logout")]
pub async fn api_logout(
    token: BearerToken,
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    delete_session(db, &token.0).await?;

    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<User> {
    Json(user)
}

#[get("/users")]
pub async fn api_get_users(
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<User>>, AppError> {
    let users = get_all_users(db).await?;
    Ok(Json(users))
}

#[post("/users", data = "<request>")]
pub async fn api_create_user(
    request: Json<RegisterRequest>,
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<(Status, Json<CreatedResponse>), AppError> {
    request.check()?;

    let id = create_user(db, &request.name, &request.username, &request.password).await?;

    Ok((Status::Created, Json(CreatedResponse { id })))
}

#[put("/users/<id>", data = "<update>")]
pub async fn api_update_user(
    id: i64,
    update: Json<Map<String, Value>>,
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    let mut fields = update.into_inner();

    // Callers supply a password, never the stored hash.
    fields.remove("password_hash");

    if let Some(Value::String(password)) = fields.remove("password") {
        if !password.is_empty() {
            let hashed = bcrypt::hash(&password, bcrypt::DEFAULT_COST)?;
            fields.insert("password_hash".to_string(), Value::String(hashed));
        }
    }

    match apply_partial_update(db, &USER_UPDATE, id, &fields, None).await? {
        UpdateOutcome::Applied => Ok(Json(MessageResponse {
            message: "User updated".to_string(),
        })),
        UpdateOutcome::Noop => Ok(Json(MessageResponse {
            message: "Nothing to update".to_string(),
        })),
    }
}

#[delete("/users/<id>")]
pub async fn api_delete_user(
    id: i64,
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    delete_user(db, id).await?;

    Ok(Json(MessageResponse {
        message: "User deleted".to_string(),
    }))
}

#[get("/plan-items")]
pub async fn api_get_plan_items(
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<PlanItem>>, AppError> {
    let items = list_plan_items(db).await?;
    Ok(Json(items))
}

#[post("/plan-items", data = "<item>")]
pub async fn api_create_plan_item(
    item: Json<NewPlanItem>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<(Status, Json<CreatedResponse>), AppError> {
    let id = create_plan_item(db, &item, user.id).await?;

    Ok((Status::Created, Json(CreatedResponse { id })))
}

#[put("/plan-items/<id>", data = "<update>")]
pub async fn api_update_plan_item(
    id: i64,
    update: Json<Map<String, Value>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    match apply_partial_update(db, &PLAN_ITEM_UPDATE, id, &update, Some(user.id)).await? {
        UpdateOutcome::Applied => Ok(Json(MessageResponse {
            message: "Item updated".to_string(),
        })),
        UpdateOutcome::Noop => Ok(Json(MessageResponse {
            message: "Nothing to update".to_string(),
        })),
    }
}

#[derive(Deserialize, Validate)]
pub struct NewMilestoneRequest {
    pub plan_item_id: i64,
    #[validate(length(min = 1, max = 200, message = "name is required"))]
    pub name: String,
    pub due_date: Option<NaiveDate>,
    pub description: Option<String>,
}

#[get("/plan-items/<id>/milestones")]
pub async fn api_get_plan_milestones(
    id: i64,
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Milestone>>, AppError> {
    let milestones = list_plan_milestones(db, id).await?;
    Ok(Json(milestones))
}

#[get("/milestones")]
pub async fn api_get_milestones(
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<MilestoneWithPlan>>, AppError> {
    let milestones = list_milestones(db).await?;
    Ok(Json(milestones))
}

#[post("/milestones", data = "<request>")]
pub async fn api_create_milestone(
    request: Json<NewMilestoneRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<(Status, Json<CreatedResponse>), AppError> {
    request.check()?;

    let id = create_milestone(
        db,
        request.plan_item_id,
        &request.name,
        request.due_date,
        request.description.as_deref(),
        user.id,
    )
    .await?;

    Ok((Status::Created, Json(CreatedResponse { id })))
}

#[put("/milestones/<id>", data = "<update>")]
pub async fn api_update_milestone(
    id: i64,
    update: Json<Map<String, Value>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    match apply_partial_update(db, &MILESTONE_UPDATE, id, &update, Some(user.id)).await? {
        UpdateOutcome::Applied => Ok(Json(MessageResponse {
            message: "Milestone updated".to_string(),
        })),
        UpdateOutcome::Noop => Ok(Json(MessageResponse {
            message: "Nothing to update".to_string(),
        })),
    }
}

#[delete("/milestones/<id>")]
pub async fn api_delete_milestone(
    id: i64,
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    delete_milestone(db, id).await?;

    Ok(Json(MessageResponse {
        message: "Milestone deleted".to_string(),
    }))
}

#[derive(FromForm)]
pub struct DocumentUploadForm<'r> {
    plan_id: i64,
    file: TempFile<'r>,
}

#[get("/documents")]
pub async fn api_get_documents(
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<DocumentWithContext>>, AppError> {
    let documents = list_documents(db).await?;
    Ok(Json(documents))
}

#[get("/plan-items/<id>/documents")]
pub async fn api_get_plan_documents(
    id: i64,
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<DocumentWithContext>>, AppError> {
    let documents = list_plan_documents(db, id).await?;
    Ok(Json(documents))
}

#[post("/documents", data = "<upload>")]
pub async fn api_upload_document(
    upload: Form<DocumentUploadForm<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
    store: &State<UploadStore>,
) -> Result<(Status, Json<CreatedResponse>), AppError> {
    let mut form = upload.into_inner();

    let display_name = form
        .file
        .raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .ok_or_else(|| AppError::Validation("Uploaded file has no file name".to_string()))?;

    let id = attach_document_file(
        db,
        store,
        form.plan_id,
        &display_name,
        &mut form.file,
        user.id,
    )
    .await?;

    Ok((Status::Created, Json(CreatedResponse { id })))
}

#[delete("/documents/<id>")]
pub async fn api_delete_document(
    id: i64,
    _user: User,
    db: &State<Pool<Sqlite>>,
    store: &State<UploadStore>,
) -> Result<Json<MessageResponse>, AppError> {
    detach_document(db, store, id).await?;

    Ok(Json(MessageResponse {
        message: "Document deleted".to_string(),
    }))
}

/// Storage keys are unguessable capabilities; download stays tokenless so
/// plain link sharing keeps working, but only keys present in the database
/// are served.
#[get("/uploads/<storage_key>")]
pub async fn api_download_document(
    storage_key: &str,
    db: &State<Pool<Sqlite>>,
    store: &State<UploadStore>,
) -> Result<NamedFile, AppError> {
    let document = document_by_storage_key(db, storage_key).await?;

    NamedFile::open(store.path_for(&document.storage_key))
        .await
        .map_err(|_| AppError::NotFound("Stored file is missing".to_string()))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
