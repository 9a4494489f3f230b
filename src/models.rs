use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) fn timestamp_or_now(value: Option<NaiveDateTime>) -> DateTime<Utc> {
    value
        .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now)
}

#[derive(Serialize, Debug, Clone)]
pub struct PlanItem {
    pub id: i64,
    pub activity_code: Option<String>,
    pub product_code: Option<String>,
    pub task_name: String,
    pub week_start: Option<i64>,
    pub week_end: Option<i64>,
    pub type_tag: Option<String>,
    pub dependency_code: Option<String>,
    pub evidence_requirement: Option<String>,
    pub primary_role: Option<String>,
    pub co_responsibles: Option<String>,
    pub primary_responsible: Option<String>,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub has_attachment: bool,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbPlanItem {
    pub id: Option<i64>,
    pub activity_code: Option<String>,
    pub product_code: Option<String>,
    pub task_name: Option<String>,
    pub week_start: Option<i64>,
    pub week_end: Option<i64>,
    pub type_tag: Option<String>,
    pub dependency_code: Option<String>,
    pub evidence_requirement: Option<String>,
    pub primary_role: Option<String>,
    pub co_responsibles: Option<String>,
    pub primary_responsible: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub has_attachment: Option<bool>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbPlanItem> for PlanItem {
    fn from(item: DbPlanItem) -> Self {
        Self {
            id: item.id.unwrap_or_default(),
            activity_code: item.activity_code,
            product_code: item.product_code,
            task_name: item.task_name.unwrap_or_default(),
            week_start: item.week_start,
            week_end: item.week_end,
            type_tag: item.type_tag,
            dependency_code: item.dependency_code,
            evidence_requirement: item.evidence_requirement,
            primary_role: item.primary_role,
            co_responsibles: item.co_responsibles,
            primary_responsible: item.primary_responsible,
            status: item.status.unwrap_or_default(),
            start_date: item.start_date,
            end_date: item.end_date,
            has_attachment: item.has_attachment.unwrap_or_default(),
            created_by: item.created_by,
            updated_by: item.updated_by,
            created_at: timestamp_or_now(item.created_at),
        }
    }
}

/// Payload for creating a plan item. Every descriptive field is optional;
/// audit fields are filled in by the handler, never by the caller.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct NewPlanItem {
    pub activity_code: Option<String>,
    pub product_code: Option<String>,
    pub task_name: Option<String>,
    pub week_start: Option<i64>,
    pub week_end: Option<i64>,
    pub type_tag: Option<String>,
    pub dependency_code: Option<String>,
    pub evidence_requirement: Option<String>,
    pub primary_role: Option<String>,
    pub co_responsibles: Option<String>,
    pub primary_responsible: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Serialize, Debug, Clone)]
pub struct Milestone {
    pub id: i64,
    pub plan_item_id: i64,
    pub name: String,
    pub due_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub status: String,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbMilestone {
    pub id: Option<i64>,
    pub plan_item_id: Option<i64>,
    pub name: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbMilestone> for Milestone {
    fn from(milestone: DbMilestone) -> Self {
        Self {
            id: milestone.id.unwrap_or_default(),
            plan_item_id: milestone.plan_item_id.unwrap_or_default(),
            name: milestone.name.unwrap_or_default(),
            due_date: milestone.due_date,
            description: milestone.description,
            status: milestone.status.unwrap_or_default(),
            created_by: milestone.created_by,
            updated_by: milestone.updated_by,
            created_at: timestamp_or_now(milestone.created_at),
        }
    }
}

/// Milestone joined with its plan item's identifying columns, for the
/// cross-plan listing.
#[derive(Serialize, Debug, Clone)]
pub struct MilestoneWithPlan {
    pub id: i64,
    pub plan_item_id: i64,
    pub name: String,
    pub due_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub status: String,
    pub activity_code: Option<String>,
    pub task_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbMilestoneWithPlan {
    pub id: Option<i64>,
    pub plan_item_id: Option<i64>,
    pub name: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub activity_code: Option<String>,
    pub task_name: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbMilestoneWithPlan> for MilestoneWithPlan {
    fn from(row: DbMilestoneWithPlan) -> Self {
        Self {
            id: row.id.unwrap_or_default(),
            plan_item_id: row.plan_item_id.unwrap_or_default(),
            name: row.name.unwrap_or_default(),
            due_date: row.due_date,
            description: row.description,
            status: row.status.unwrap_or_default(),
            activity_code: row.activity_code,
            task_name: row.task_name,
            created_at: timestamp_or_now(row.created_at),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct Document {
    pub id: i64,
    pub plan_item_id: i64,
    pub file_name: String,
    pub storage_key: String,
    pub uploaded_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbDocument {
    pub id: Option<i64>,
    pub plan_item_id: Option<i64>,
    pub file_name: Option<String>,
    pub storage_key: Option<String>,
    pub uploaded_by: Option<i64>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbDocument> for Document {
    fn from(document: DbDocument) -> Self {
        Self {
            id: document.id.unwrap_or_default(),
            plan_item_id: document.plan_item_id.unwrap_or_default(),
            file_name: document.file_name.unwrap_or_default(),
            storage_key: document.storage_key.unwrap_or_default(),
            uploaded_by: document.uploaded_by,
            created_at: timestamp_or_now(document.created_at),
        }
    }
}

/// Document joined with plan item and uploader context, for listings.
#[derive(Serialize, Debug, Clone)]
pub struct DocumentWithContext {
    pub id: i64,
    pub plan_item_id: i64,
    pub file_name: String,
    pub storage_key: String,
    pub uploaded_by: Option<i64>,
    pub uploader: Option<String>,
    pub activity_code: Option<String>,
    pub task_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbDocumentWithContext {
    pub id: Option<i64>,
    pub plan_item_id: Option<i64>,
    pub file_name: Option<String>,
    pub storage_key: Option<String>,
    pub uploaded_by: Option<i64>,
    pub uploader: Option<String>,
    pub activity_code: Option<String>,
    pub task_name: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbDocumentWithContext> for DocumentWithContext {
    fn from(row: DbDocumentWithContext) -> Self {
        Self {
            id: row.id.unwrap_or_default(),
            plan_item_id: row.plan_item_id.unwrap_or_default(),
            file_name: row.file_name.unwrap_or_default(),
            storage_key: row.storage_key.unwrap_or_default(),
            uploaded_by: row.uploaded_by,
            uploader: row.uploader,
            activity_code: row.activity_code,
            task_name: row.task_name,
            created_at: timestamp_or_now(row.created_at),
        }
    }
}
