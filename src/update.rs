use serde_json::{Map, Value};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info, instrument};

use crate::error::AppError;

/// A table plus the columns a caller is allowed to set on it. Statement text
/// is only ever assembled from these fixed lists; caller-supplied values are
/// always bound parameters.
#[derive(Debug)]
pub struct EntityUpdate {
    pub table: &'static str,
    pub allowed: &'static [&'static str],
}

pub const PLAN_ITEM_UPDATE: EntityUpdate = EntityUpdate {
    table: "plan_items",
    allowed: &[
        "activity_code",
        "product_code",
        "task_name",
        "week_start",
        "week_end",
        "type_tag",
        "dependency_code",
        "evidence_requirement",
        "primary_role",
        "co_responsibles",
        "primary_responsible",
        "status",
        "start_date",
        "end_date",
    ],
};

pub const MILESTONE_UPDATE: EntityUpdate = EntityUpdate {
    table: "milestones",
    allowed: &["name", "due_date", "description", "status"],
};

pub const USER_UPDATE: EntityUpdate = EntityUpdate {
    table: "users",
    allowed: &["name", "username", "password_hash"],
};

#[derive(Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Nothing in the request survived the allow-list. Not an error.
    Noop,
}

#[instrument(skip(pool, fields))]
pub async fn apply_partial_update(
    pool: &SqlitePool,
    entity: &EntityUpdate,
    id: i64,
    fields: &Map<String, Value>,
    updated_by: Option<i64>,
) -> Result<UpdateOutcome, AppError> {
    info!(table = entity.table, "Applying partial update");

    let accepted: Vec<(&str, &Value)> = entity
        .allowed
        .iter()
        .filter_map(|column| fields.get(*column).map(|value| (*column, value)))
        .collect();

    for key in fields.keys() {
        if !entity.allowed.contains(&key.as_str()) {
            debug!(table = entity.table, field = %key, "Dropping field not in the update allow-list");
        }
    }

    if accepted.is_empty() {
        return Ok(UpdateOutcome::Noop);
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE ");
    builder.push(entity.table);
    builder.push(" SET ");

    let mut first = true;
    for (column, value) in accepted {
        if !first {
            builder.push(", ");
        }
        first = false;

        builder.push(column);
        builder.push(" = ");
        push_bound_value(&mut builder, column, value)?;
    }

    if let Some(user_id) = updated_by {
        builder.push(", updated_by = ");
        builder.push_bind(user_id);
    }

    builder.push(" WHERE id = ");
    builder.push_bind(id);

    let mut tx = pool.begin().await?;

    let result = builder.build().execute(&mut *tx).await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "{} row {} not found",
            entity.table, id
        )));
    }

    tx.commit().await?;

    Ok(UpdateOutcome::Applied)
}

fn push_bound_value(
    builder: &mut QueryBuilder<'_, Sqlite>,
    column: &str,
    value: &Value,
) -> Result<(), AppError> {
    match value {
        Value::Null => {
            builder.push_bind(Option::<String>::None);
        }
        Value::Bool(flag) => {
            builder.push_bind(*flag);
        }
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                builder.push_bind(int);
            } else if let Some(real) = number.as_f64() {
                builder.push_bind(real);
            } else {
                return Err(AppError::Validation(format!(
                    "Field '{}' has an unsupported numeric value",
                    column
                )));
            }
        }
        Value::String(text) => {
            builder.push_bind(text.clone());
        }
        Value::Array(_) | Value::Object(_) => {
            return Err(AppError::Validation(format!(
                "Field '{}' must be a scalar value",
                column
            )));
        }
    }

    Ok(())
}
