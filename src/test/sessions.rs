#[cfg(test)]
mod tests {
    use crate::{
        auth::Session,
        db::{
            clean_expired_sessions, create_session, delete_session, session_by_token,
            verify_credentials,
        },
        error::AppError,
        test::utils::test_db::{STANDARD_PASSWORD, TestDbBuilder},
    };
    use chrono::{Duration, NaiveDateTime, Utc};
    use rocket::tokio;
    use sqlx::{Pool, Sqlite};

    async fn create_test_session() -> (i64, String, NaiveDateTime, Pool<Sqlite>) {
        let test_db = TestDbBuilder::new()
            .user("session_user", "Session User")
            .build()
            .await
            .expect("Failed to build test database");

        let user_id = test_db.user_id("session_user").expect("User not found");

        let token = Session::generate_token();
        let expires_at = (Utc::now() + Duration::hours(1)).naive_utc();

        (user_id, token, expires_at, test_db.pool)
    }

    #[tokio::test]
    async fn test_generated_tokens_are_long_random_hex() {
        let token = Session::generate_token();

        assert_eq!(token.len(), 64, "32 bytes of entropy, hex encoded");
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        let other = Session::generate_token();
        assert_ne!(token, other, "Two tokens should never collide");
    }

    #[tokio::test]
    async fn test_login_then_authenticate_round_trip() {
        let (user_id, token, expires_at, pool) = create_test_session().await;

        let user = verify_credentials(&pool, "session_user", STANDARD_PASSWORD)
            .await
            .expect("Failed to verify credentials")
            .expect("Correct credentials should resolve a user");

        assert_eq!(user.id, user_id);

        create_session(&pool, user.id, &token, expires_at)
            .await
            .expect("Failed to create session");

        let session = session_by_token(&pool, &token)
            .await
            .expect("Failed to get session");

        assert_eq!(session.user_id, user_id);
        assert!(session.is_valid());
    }

    #[tokio::test]
    async fn test_bad_password_and_unknown_user_are_indistinguishable() {
        let test_db = TestDbBuilder::new()
            .user("real_user", "Real User")
            .build()
            .await
            .expect("Failed to build test database");

        let wrong_password = verify_credentials(&test_db.pool, "real_user", "not-the-password")
            .await
            .expect("Verification should not error");

        let unknown_user = verify_credentials(&test_db.pool, "ghost_user", STANDARD_PASSWORD)
            .await
            .expect("Verification should not error");

        assert!(wrong_password.is_none());
        assert!(unknown_user.is_none());
    }

    #[tokio::test]
    async fn test_get_nonexistent_session() {
        let test_db = TestDbBuilder::new()
            .user("session_user", "Session User")
            .build()
            .await
            .expect("Failed to build test database");

        let result = session_by_token(&test_db.pool, "nonexistent_token").await;

        assert!(result.is_err(), "Should return error for unknown token");

        match result {
            Err(AppError::Authentication(msg)) => {
                assert_eq!(msg, "Invalid session token");
            }
            Err(err) => panic!("Expected Authentication error, got {:?}", err),
            Ok(_) => panic!("Unknown token resolved a session"),
        }
    }

    #[tokio::test]
    async fn test_delete_session() {
        let (user_id, token, expires_at, pool) = create_test_session().await;

        create_session(&pool, user_id, &token, expires_at)
            .await
            .expect("Failed to create session");

        let session = session_by_token(&pool, &token).await;
        assert!(session.is_ok(), "Session should exist before invalidation");

        delete_session(&pool, &token)
            .await
            .expect("Failed to invalidate session");

        let result = session_by_token(&pool, &token).await;
        assert!(
            result.is_err(),
            "Session should not exist after invalidation"
        );
    }

    #[tokio::test]
    async fn test_clean_expired_sessions() {
        let test_db = TestDbBuilder::new()
            .user("session_user", "Session User")
            .build()
            .await
            .expect("Failed to build test database");

        let pool = test_db.pool.clone();
        let user_id = test_db.user_id("session_user").expect("User not found");

        let token1 = Session::generate_token();
        let token2 = Session::generate_token();
        let token3 = Session::generate_token();

        let expired_at = (Utc::now() - Duration::hours(1)).naive_utc();
        create_session(&pool, user_id, &token1, expired_at)
            .await
            .expect("Failed to create expired session");

        let expires_soon = (Utc::now() + Duration::minutes(1)).naive_utc();
        create_session(&pool, user_id, &token2, expires_soon)
            .await
            .expect("Failed to create expiring soon session");

        let expires_later = (Utc::now() + Duration::days(1)).naive_utc();
        create_session(&pool, user_id, &token3, expires_later)
            .await
            .expect("Failed to create future session");

        let cleaned_count = clean_expired_sessions(&pool)
            .await
            .expect("Failed to clean expired sessions");

        assert_eq!(
            cleaned_count, 1,
            "Should have cleaned exactly 1 expired session"
        );

        assert!(session_by_token(&pool, &token1).await.is_err());
        assert!(session_by_token(&pool, &token2).await.is_ok());
        assert!(session_by_token(&pool, &token3).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_session_is_invalid() {
        let (user_id, token, _, pool) = create_test_session().await;

        let expired_at = (Utc::now() - Duration::hours(1)).naive_utc();
        create_session(&pool, user_id, &token, expired_at)
            .await
            .expect("Failed to create expired session");

        let session = session_by_token(&pool, &token)
            .await
            .expect("Should still be able to retrieve the expired row");

        assert!(!session.is_valid(), "Expired session should be invalid");
    }
}
