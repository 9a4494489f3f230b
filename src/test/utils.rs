#[cfg(test)]
pub mod test_db {
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Once;

    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};
    use uuid::Uuid;

    use crate::api::LoginResponse;
    use crate::db::{create_milestone, create_plan_item, create_user};
    use crate::env::AppConfig;
    use crate::error::AppError;
    use crate::init_rocket;
    use crate::models::NewPlanItem;
    use crate::storage::UploadStore;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    pub struct TestUser {
        pub username: String,
        pub name: String,
        pub password: String,
    }

    pub struct TestPlanItem {
        pub task_name: String,
        pub status: String,
    }

    pub struct TestMilestone {
        pub plan_task_name: String,
        pub name: String,
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        plan_items: Vec<TestPlanItem>,
        milestones: Vec<TestMilestone>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn user(self, username: &str, name: &str) -> Self {
            self.user_with_password(username, name, STANDARD_PASSWORD)
        }

        pub fn user_with_password(mut self, username: &str, name: &str, password: &str) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                name: name.to_string(),
                password: password.to_string(),
            });
            self
        }

        pub fn plan_item(mut self, task_name: &str) -> Self {
            self.plan_items.push(TestPlanItem {
                task_name: task_name.to_string(),
                status: "pending".to_string(),
            });
            self
        }

        pub fn milestone(mut self, plan_task_name: &str, name: &str) -> Self {
            self.milestones.push(TestMilestone {
                plan_task_name: plan_task_name.to_string(),
                name: name.to_string(),
            });
            self
        }

        pub async fn build(mut self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter("info")
                    .with_test_writer()
                    .try_init();
            });

            // In-memory SQLite is per-connection, so the pool must never grow
            // past the one connection the migrations ran on.
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(AppError::Database)?
                .foreign_keys(true);

            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            if self.users.is_empty() && !self.plan_items.is_empty() {
                self.users.push(TestUser {
                    username: "fixture_user".to_string(),
                    name: "Fixture User".to_string(),
                    password: STANDARD_PASSWORD.to_string(),
                });
            }

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut plan_id_map: HashMap<String, i64> = HashMap::new();
            let mut milestone_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let user_id = create_user(&pool, &user.name, &user.username, &user.password).await?;
                user_id_map.insert(user.username.clone(), user_id);
            }

            let creator = user_id_map.values().next().copied().unwrap_or(1);

            for item in &self.plan_items {
                let plan_id = create_plan_item(
                    &pool,
                    &NewPlanItem {
                        task_name: Some(item.task_name.clone()),
                        status: Some(item.status.clone()),
                        ..NewPlanItem::default()
                    },
                    creator,
                )
                .await?;

                plan_id_map.insert(item.task_name.clone(), plan_id);
            }

            for milestone in &self.milestones {
                let plan_id = plan_id_map
                    .get(&milestone.plan_task_name)
                    .copied()
                    .expect("Milestone references an unknown plan item");

                let milestone_id =
                    create_milestone(&pool, plan_id, &milestone.name, None, None, creator).await?;

                milestone_id_map.insert(milestone.name.clone(), milestone_id);
            }

            Ok(TestDb {
                pool,
                user_id_map,
                plan_id_map,
                milestone_id_map,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        user_id_map: HashMap<String, i64>,
        plan_id_map: HashMap<String, i64>,
        milestone_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub fn plan_id(&self, task_name: &str) -> Option<i64> {
            self.plan_id_map.get(task_name).copied()
        }

        pub fn milestone_id(&self, name: &str) -> Option<i64> {
            self.milestone_id_map.get(name).copied()
        }
    }

    pub fn temp_upload_store() -> UploadStore {
        let root =
            std::env::temp_dir().join(format!("plantrack-test-{}", Uuid::new_v4().simple()));
        UploadStore::new(root).expect("Failed to create temp upload store")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let store = temp_upload_store();
        let rocket = init_rocket(test_db.pool.clone(), store, AppConfig::default()).await;
        let client = Client::tracked(rocket)
            .await
            .expect("valid rocket instance");

        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, username: &str, password: &str) -> String {
        let response = client
            .post("/auth/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": password
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let login: LoginResponse = serde_json::from_str(&body).unwrap();

        login.token
    }

    pub fn bearer(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", token))
    }
}
