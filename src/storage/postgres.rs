/// Postgres-backed stores
///
/// Conditional updates use `UPDATE ... WHERE <still valid> RETURNING`, so
/// the check and the state change are one statement and Postgres row locks
/// arbitrate concurrent callers. Multi-table steps run in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::storage::{
    CompletedReset, NewUser, RefreshSession, SessionStore, SingleUseToken, TokenLedger,
    TokenPurpose, User, UserStore, DEFAULT_ROLE,
};

const USER_COLUMNS: &str =
    "id, email, password_hash, display_name, email_verified_at, roles, created_at, updated_at";
const SESSION_COLUMNS: &str = "id, user_id, token_hash, expires_at, revoked_at, created_at";
const TOKEN_COLUMNS: &str = "id, user_id, token_hash, expires_at, used_at, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, user: NewUser, now: DateTime<Utc>) -> Result<User, AppError> {
        let query = format!(
            r#"
            INSERT INTO users (id, email, password_hash, display_name, roles, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let user = sqlx::query_as::<_, User>(&query)
            .bind(Uuid::new_v4())
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.display_name)
            .bind(vec![DEFAULT_ROLE.to_string()])
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);

        let user = sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);

        let user = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn mark_email_verified(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email_verified_at = $1, updated_at = $1
            WHERE id = $2 AND email_verified_at IS NULL
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RefreshSession, AppError> {
        let query = format!(
            r#"
            INSERT INTO refresh_sessions (id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );

        let session = sqlx::query_as::<_, RefreshSession>(&query)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(token_hash)
            .bind(expires_at)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(session)
    }

    async fn consume_active_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>, AppError> {
        let query = format!(
            r#"
            UPDATE refresh_sessions
            SET revoked_at = $1
            WHERE token_hash = $2 AND revoked_at IS NULL AND expires_at > $1
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );

        let session = sqlx::query_as::<_, RefreshSession>(&query)
            .bind(now)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    async fn find_session_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, AppError> {
        let query = format!(
            "SELECT {} FROM refresh_sessions WHERE token_hash = $1",
            SESSION_COLUMNS
        );

        let session = sqlx::query_as::<_, RefreshSession>(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    async fn revoke_session(&self, token_hash: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_sessions
            SET revoked_at = $1
            WHERE token_hash = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(now)
        .bind(token_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl TokenLedger for PgStore {
    async fn issue_token(
        &self,
        purpose: TokenPurpose,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SingleUseToken, AppError> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent issuances for the same user.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .execute(&mut tx)
            .await?;

        let invalidate = format!(
            r#"
            UPDATE {}
            SET used_at = $1
            WHERE user_id = $2 AND used_at IS NULL AND expires_at > $1
            "#,
            purpose.table()
        );
        sqlx::query(&invalidate)
            .bind(now)
            .bind(user_id)
            .execute(&mut tx)
            .await?;

        let insert = format!(
            r#"
            INSERT INTO {} (id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            purpose.table(),
            TOKEN_COLUMNS
        );
        let token = sqlx::query_as::<_, SingleUseToken>(&insert)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(token_hash)
            .bind(expires_at)
            .bind(now)
            .fetch_one(&mut tx)
            .await?;

        tx.commit().await?;

        Ok(token)
    }

    async fn consume_token(
        &self,
        purpose: TokenPurpose,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SingleUseToken>, AppError> {
        let query = format!(
            r#"
            UPDATE {}
            SET used_at = $1
            WHERE token_hash = $2 AND used_at IS NULL AND expires_at > $1
            RETURNING {}
            "#,
            purpose.table(),
            TOKEN_COLUMNS
        );

        let token = sqlx::query_as::<_, SingleUseToken>(&query)
            .bind(now)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(token)
    }

    async fn count_usable_tokens(
        &self,
        purpose: TokenPurpose,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "SELECT COUNT(*) FROM {} WHERE user_id = $1 AND used_at IS NULL AND expires_at > $2",
            purpose.table()
        );

        let count = sqlx::query_scalar::<_, i64>(&query)
            .bind(user_id)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn complete_password_reset(
        &self,
        token_hash: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CompletedReset>, AppError> {
        let mut tx = self.pool.begin().await?;

        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE password_reset_tokens
            SET used_at = $1
            WHERE token_hash = $2 AND used_at IS NULL AND expires_at > $1
            RETURNING user_id
            "#,
        )
        .bind(now)
        .bind(token_hash)
        .fetch_optional(&mut tx)
        .await?;

        let user_id = match user_id {
            Some(user_id) => user_id,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        let updated = sqlx::query("UPDATE users SET password_hash = $1, updated_at = $2 WHERE id = $3")
            .bind(password_hash)
            .bind(now)
            .bind(user_id)
            .execute(&mut tx)
            .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let revoked = sqlx::query(
            r#"
            UPDATE refresh_sessions
            SET revoked_at = $1
            WHERE user_id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(now)
        .bind(user_id)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        Ok(Some(CompletedReset {
            user_id,
            revoked_sessions: revoked.rows_affected(),
        }))
    }
}
