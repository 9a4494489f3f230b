use chrono::{NaiveDateTime, Utc};
use rand::Rng;

use crate::models::timestamp_or_now;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbSession {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub token: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub expires_at: Option<NaiveDateTime>,
}

impl From<DbSession> for Session {
    fn from(session: DbSession) -> Self {
        Self {
            id: session.id.unwrap_or_default(),
            user_id: session.user_id.unwrap_or_default(),
            token: session.token.unwrap_or_default(),
            created_at: timestamp_or_now(session.created_at).naive_utc(),
            // A row without an expiry is treated as already expired.
            expires_at: session.expires_at.unwrap_or_default(),
        }
    }
}

impl Session {
    /// 256 bits of entropy, hex encoded.
    pub fn generate_token() -> String {
        let bytes: [u8; 32] = rand::rng().random();
        bytes.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    pub fn is_valid(&self) -> bool {
        Utc::now().naive_utc() < self.expires_at
    }
}
