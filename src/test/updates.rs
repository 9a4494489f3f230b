#[cfg(test)]
mod tests {
    use crate::{
        db::{get_plan_item, get_user},
        error::AppError,
        test::utils::test_db::TestDbBuilder,
        update::{
            MILESTONE_UPDATE, PLAN_ITEM_UPDATE, USER_UPDATE, UpdateOutcome, apply_partial_update,
        },
    };
    use rocket::tokio;
    use serde_json::{Map, Value, json};

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("Expected a JSON object"),
        }
    }

    #[tokio::test]
    async fn test_allowed_fields_are_applied() {
        let test_db = TestDbBuilder::new()
            .user("editor", "Editor")
            .plan_item("Kickoff workshop")
            .build()
            .await
            .expect("Failed to build test database");

        let plan_id = test_db.plan_id("Kickoff workshop").unwrap();
        let editor_id = test_db.user_id("editor").unwrap();

        let outcome = apply_partial_update(
            &test_db.pool,
            &PLAN_ITEM_UPDATE,
            plan_id,
            &fields(json!({
                "task_name": "Kickoff workshop (rescheduled)",
                "status": "in_progress",
                "week_start": 3,
            })),
            Some(editor_id),
        )
        .await
        .expect("Update should succeed");

        assert_eq!(outcome, UpdateOutcome::Applied);

        let item = get_plan_item(&test_db.pool, plan_id).await.unwrap();
        assert_eq!(item.task_name, "Kickoff workshop (rescheduled)");
        assert_eq!(item.status, "in_progress");
        assert_eq!(item.week_start, Some(3));
        assert_eq!(item.updated_by, Some(editor_id));
    }

    #[tokio::test]
    async fn test_forbidden_and_unknown_fields_are_dropped() {
        let test_db = TestDbBuilder::new()
            .user("editor", "Editor")
            .plan_item("Deliverable review")
            .build()
            .await
            .expect("Failed to build test database");

        let plan_id = test_db.plan_id("Deliverable review").unwrap();
        let editor_id = test_db.user_id("editor").unwrap();
        let before = get_plan_item(&test_db.pool, plan_id).await.unwrap();

        let outcome = apply_partial_update(
            &test_db.pool,
            &PLAN_ITEM_UPDATE,
            plan_id,
            &fields(json!({
                "status": "done",
                "created_by": 999,
                "has_attachment": true,
                "id": 42,
                "status = 'x' WHERE 1=1; --": "injected",
            })),
            Some(editor_id),
        )
        .await
        .expect("Update should succeed");

        assert_eq!(outcome, UpdateOutcome::Applied);

        let item = get_plan_item(&test_db.pool, plan_id).await.unwrap();
        assert_eq!(item.status, "done");
        assert_eq!(item.id, plan_id);
        assert_eq!(item.created_by, before.created_by);
        assert!(!item.has_attachment);
    }

    #[tokio::test]
    async fn test_update_with_no_allowed_fields_is_a_noop() {
        let test_db = TestDbBuilder::new()
            .user("editor", "Editor")
            .plan_item("Data collection")
            .build()
            .await
            .expect("Failed to build test database");

        let plan_id = test_db.plan_id("Data collection").unwrap();
        let editor_id = test_db.user_id("editor").unwrap();
        let before = get_plan_item(&test_db.pool, plan_id).await.unwrap();

        let outcome = apply_partial_update(
            &test_db.pool,
            &PLAN_ITEM_UPDATE,
            plan_id,
            &fields(json!({ "bogus_column": "value" })),
            Some(editor_id),
        )
        .await
        .expect("Noop update should not error");

        assert_eq!(outcome, UpdateOutcome::Noop);

        let empty = apply_partial_update(
            &test_db.pool,
            &PLAN_ITEM_UPDATE,
            plan_id,
            &Map::new(),
            Some(editor_id),
        )
        .await
        .expect("Empty update should not error");

        assert_eq!(empty, UpdateOutcome::Noop);

        let after = get_plan_item(&test_db.pool, plan_id).await.unwrap();
        assert_eq!(after.updated_by, before.updated_by, "Noop must not audit");
        assert_eq!(after.status, before.status);
    }

    #[tokio::test]
    async fn test_update_of_unknown_id_is_not_found() {
        let test_db = TestDbBuilder::new()
            .user("editor", "Editor")
            .plan_item("Final report")
            .build()
            .await
            .expect("Failed to build test database");

        let editor_id = test_db.user_id("editor").unwrap();

        let result = apply_partial_update(
            &test_db.pool,
            &PLAN_ITEM_UPDATE,
            9999,
            &fields(json!({ "status": "done" })),
            Some(editor_id),
        )
        .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_null_clears_a_nullable_column() {
        let test_db = TestDbBuilder::new()
            .user("editor", "Editor")
            .plan_item("Stakeholder interviews")
            .build()
            .await
            .expect("Failed to build test database");

        let plan_id = test_db.plan_id("Stakeholder interviews").unwrap();
        let editor_id = test_db.user_id("editor").unwrap();

        apply_partial_update(
            &test_db.pool,
            &PLAN_ITEM_UPDATE,
            plan_id,
            &fields(json!({ "dependency_code": "DEP-01" })),
            Some(editor_id),
        )
        .await
        .unwrap();

        apply_partial_update(
            &test_db.pool,
            &PLAN_ITEM_UPDATE,
            plan_id,
            &fields(json!({ "dependency_code": null })),
            Some(editor_id),
        )
        .await
        .unwrap();

        let item = get_plan_item(&test_db.pool, plan_id).await.unwrap();
        assert_eq!(item.dependency_code, None);
    }

    #[tokio::test]
    async fn test_non_scalar_value_is_rejected() {
        let test_db = TestDbBuilder::new()
            .user("editor", "Editor")
            .plan_item("Procurement plan")
            .build()
            .await
            .expect("Failed to build test database");

        let plan_id = test_db.plan_id("Procurement plan").unwrap();

        let result = apply_partial_update(
            &test_db.pool,
            &PLAN_ITEM_UPDATE,
            plan_id,
            &fields(json!({ "status": ["a", "b"] })),
            None,
        )
        .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_milestone_update_respects_its_own_allow_list() {
        let test_db = TestDbBuilder::new()
            .user("editor", "Editor")
            .plan_item("Field mission")
            .milestone("Field mission", "Mission report draft")
            .build()
            .await
            .expect("Failed to build test database");

        let milestone_id = test_db.milestone_id("Mission report draft").unwrap();
        let editor_id = test_db.user_id("editor").unwrap();

        let outcome = apply_partial_update(
            &test_db.pool,
            &MILESTONE_UPDATE,
            milestone_id,
            &fields(json!({
                "status": "achieved",
                "plan_item_id": 9999,
            })),
            Some(editor_id),
        )
        .await
        .expect("Milestone update should succeed");

        assert_eq!(outcome, UpdateOutcome::Applied);

        let (status, plan_item_id) = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, plan_item_id FROM milestones WHERE id = ?",
        )
        .bind(milestone_id)
        .fetch_one(&test_db.pool)
        .await
        .unwrap();

        assert_eq!(status, "achieved");
        assert_eq!(
            plan_item_id,
            test_db.plan_id("Field mission").unwrap(),
            "Reparenting must not be possible through the update path"
        );
    }

    #[tokio::test]
    async fn test_user_update_changes_profile_fields_only() {
        let test_db = TestDbBuilder::new()
            .user("renamed_user", "Old Name")
            .build()
            .await
            .expect("Failed to build test database");

        let user_id = test_db.user_id("renamed_user").unwrap();

        let outcome = apply_partial_update(
            &test_db.pool,
            &USER_UPDATE,
            user_id,
            &fields(json!({
                "name": "New Name",
                "created_at": "1999-01-01 00:00:00",
            })),
            None,
        )
        .await
        .expect("User update should succeed");

        assert_eq!(outcome, UpdateOutcome::Applied);

        let user = get_user(&test_db.pool, user_id).await.unwrap();
        assert_eq!(user.name, "New Name");
        assert_ne!(user.created_at.to_rfc3339(), "1999-01-01T00:00:00+00:00");
    }
}
