/// In-memory stores
///
/// A single mutex guards all state, so each trait method is one critical
/// section and carries the same atomicity as its Postgres counterpart.
/// Used by the test suites and for running locally without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, DatabaseError};
use crate::storage::{
    CompletedReset, NewUser, RefreshSession, SessionStore, SingleUseToken, TokenLedger,
    TokenPurpose, User, UserStore, DEFAULT_ROLE,
};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    sessions: Vec<RefreshSession>,
    tokens: HashMap<TokenPurpose, Vec<SingleUseToken>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All sessions ever created for a user, oldest first
    pub async fn sessions_for_user(&self, user_id: Uuid) -> Vec<RefreshSession> {
        let state = self.state.lock().await;
        state
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn insert_user(&self, user: NewUser, now: DateTime<Utc>) -> Result<User, AppError> {
        let mut state = self.state.lock().await;

        if state.users.values().any(|u| u.email == user.email) {
            return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
                "users_email_key".to_string(),
            )));
        }

        let record = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            display_name: user.display_name,
            email_verified_at: None,
            roles: vec![DEFAULT_ROLE.to_string()],
            created_at: now,
            updated_at: now,
        };
        state.users.insert(record.id, record.clone());

        Ok(record)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let state = self.state.lock().await;
        Ok(state.users.get(&id).cloned())
    }

    async fn mark_email_verified(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;

        match state.users.get_mut(&id) {
            Some(user) if user.email_verified_at.is_none() => {
                user.email_verified_at = Some(now);
                user.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RefreshSession, AppError> {
        let mut state = self.state.lock().await;

        if state.sessions.iter().any(|s| s.token_hash == token_hash) {
            return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
                "refresh_sessions_token_hash_key".to_string(),
            )));
        }

        let session = RefreshSession {
            id: Uuid::new_v4(),
            user_id,
            token_hash: token_hash.to_string(),
            expires_at,
            revoked_at: None,
            created_at: now,
        };
        state.sessions.push(session.clone());

        Ok(session)
    }

    async fn consume_active_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>, AppError> {
        let mut state = self.state.lock().await;

        let consumed = state
            .sessions
            .iter_mut()
            .find(|s| s.token_hash == token_hash && s.is_active(now))
            .map(|session| {
                session.revoked_at = Some(now);
                session.clone()
            });

        Ok(consumed)
    }

    async fn find_session_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .iter()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn revoke_session(&self, token_hash: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;

        match state
            .sessions
            .iter_mut()
            .find(|s| s.token_hash == token_hash && s.revoked_at.is_none())
        {
            Some(session) => {
                session.revoked_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl TokenLedger for InMemoryStore {
    async fn issue_token(
        &self,
        purpose: TokenPurpose,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SingleUseToken, AppError> {
        let mut state = self.state.lock().await;
        let tokens = state.tokens.entry(purpose).or_default();

        if tokens.iter().any(|t| t.token_hash == token_hash) {
            return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
                format!("{}_token_hash_key", purpose.table()),
            )));
        }

        for token in tokens
            .iter_mut()
            .filter(|t| t.user_id == user_id && t.is_usable(now))
        {
            token.used_at = Some(now);
        }

        let token = SingleUseToken {
            id: Uuid::new_v4(),
            user_id,
            token_hash: token_hash.to_string(),
            expires_at,
            used_at: None,
            created_at: now,
        };
        tokens.push(token.clone());

        Ok(token)
    }

    async fn consume_token(
        &self,
        purpose: TokenPurpose,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SingleUseToken>, AppError> {
        let mut state = self.state.lock().await;

        let consumed = state.tokens.get_mut(&purpose).and_then(|tokens| {
            tokens
                .iter_mut()
                .find(|t| t.token_hash == token_hash && t.is_usable(now))
                .map(|token| {
                    token.used_at = Some(now);
                    token.clone()
                })
        });

        Ok(consumed)
    }

    async fn count_usable_tokens(
        &self,
        purpose: TokenPurpose,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let state = self.state.lock().await;

        let count = state
            .tokens
            .get(&purpose)
            .map(|tokens| {
                tokens
                    .iter()
                    .filter(|t| t.user_id == user_id && t.is_usable(now))
                    .count()
            })
            .unwrap_or(0);

        Ok(count as u64)
    }

    async fn complete_password_reset(
        &self,
        token_hash: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CompletedReset>, AppError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        // Every check happens before the first write.
        let token = match state.tokens.get_mut(&TokenPurpose::PasswordReset).and_then(|tokens| {
            tokens
                .iter_mut()
                .find(|t| t.token_hash == token_hash && t.is_usable(now))
        }) {
            Some(token) => token,
            None => return Ok(None),
        };
        let user = match state.users.get_mut(&token.user_id) {
            Some(user) => user,
            None => return Ok(None),
        };

        token.used_at = Some(now);
        user.password_hash = password_hash.to_string();
        user.updated_at = now;

        let user_id = user.id;
        let mut revoked_sessions = 0;
        for session in state
            .sessions
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.revoked_at.is_none())
        {
            session.revoked_at = Some(now);
            revoked_sessions += 1;
        }

        Ok(Some(CompletedReset {
            user_id,
            revoked_sessions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    async fn store_with_user() -> (InMemoryStore, User) {
        let store = InMemoryStore::new();
        let user = store
            .insert_user(
                NewUser {
                    email: "a@x.com".to_string(),
                    password_hash: "hash".to_string(),
                    display_name: "A".to_string(),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        (store, user)
    }

    #[tokio::test]
    async fn test_duplicate_email_is_unique_violation() {
        let (store, _) = store_with_user().await;

        let result = store
            .insert_user(
                NewUser {
                    email: "a@x.com".to_string(),
                    password_hash: "other".to_string(),
                    display_name: "B".to_string(),
                },
                Utc::now(),
            )
            .await;

        assert!(matches!(
            result,
            Err(AppError::Database(DatabaseError::UniqueConstraintViolation(_)))
        ));
    }

    #[tokio::test]
    async fn test_mark_email_verified_is_set_once() {
        let (store, user) = store_with_user().await;
        let first = Utc::now();

        assert!(store.mark_email_verified(user.id, first).await.unwrap());
        assert!(!store
            .mark_email_verified(user.id, first + Duration::minutes(5))
            .await
            .unwrap());

        let stored = store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.email_verified_at, Some(first));
    }

    #[tokio::test]
    async fn test_consume_active_session_only_once() {
        let (store, user) = store_with_user().await;
        let now = Utc::now();
        store
            .create_session(user.id, "h1", now + Duration::days(1), now)
            .await
            .unwrap();

        assert!(store.consume_active_session("h1", now).await.unwrap().is_some());
        assert!(store.consume_active_session("h1", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_consumption_has_one_winner() {
        let (store, user) = store_with_user().await;
        let store = Arc::new(store);
        let now = Utc::now();
        store
            .create_session(user.id, "h1", now + Duration::days(1), now)
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.consume_active_session("h1", now).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expired_session_is_not_consumed() {
        let (store, user) = store_with_user().await;
        let now = Utc::now();
        store
            .create_session(user.id, "h1", now, now - Duration::days(1))
            .await
            .unwrap();

        assert!(store.consume_active_session("h1", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_password_reset_revokes_all_sessions() {
        let (store, user) = store_with_user().await;
        let now = Utc::now();
        for hash in ["h1", "h2", "h3"] {
            store
                .create_session(user.id, hash, now + Duration::days(1), now)
                .await
                .unwrap();
        }
        store.revoke_session("h1", now).await.unwrap();
        store
            .issue_token(TokenPurpose::PasswordReset, user.id, "t1", now + Duration::minutes(30), now)
            .await
            .unwrap();

        let reset = store
            .complete_password_reset("t1", "new-hash", now)
            .await
            .unwrap()
            .expect("token should be redeemed");

        assert_eq!(reset.user_id, user.id);
        assert_eq!(reset.revoked_sessions, 2);
        assert!(store
            .sessions_for_user(user.id)
            .await
            .iter()
            .all(|s| s.revoked_at.is_some()));
        let stored = store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "new-hash");

        assert!(store
            .complete_password_reset("t1", "other-hash", now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unusable_reset_token_changes_nothing() {
        let (store, user) = store_with_user().await;
        let now = Utc::now();
        store
            .create_session(user.id, "h1", now + Duration::days(1), now)
            .await
            .unwrap();
        store
            .issue_token(TokenPurpose::PasswordReset, user.id, "t1", now + Duration::minutes(30), now)
            .await
            .unwrap();

        let later = now + Duration::minutes(31);
        assert!(store
            .complete_password_reset("t1", "new-hash", later)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .complete_password_reset("unknown", "new-hash", now)
            .await
            .unwrap()
            .is_none());

        let stored = store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "hash");
        assert!(store.consume_active_session("h1", now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_issue_token_invalidates_prior_usable_tokens() {
        let (store, user) = store_with_user().await;
        let now = Utc::now();
        let expires = now + Duration::minutes(30);
        let purpose = TokenPurpose::PasswordReset;

        store.issue_token(purpose, user.id, "t1", expires, now).await.unwrap();
        store.issue_token(purpose, user.id, "t2", expires, now).await.unwrap();

        assert_eq!(store.count_usable_tokens(purpose, user.id, now).await.unwrap(), 1);
        assert!(store.consume_token(purpose, "t1", now).await.unwrap().is_none());
        assert!(store.consume_token(purpose, "t2", now).await.unwrap().is_some());
        assert!(store.consume_token(purpose, "t2", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_purposes_are_separate() {
        let (store, user) = store_with_user().await;
        let now = Utc::now();
        let expires = now + Duration::minutes(30);

        store
            .issue_token(TokenPurpose::EmailVerification, user.id, "t1", expires, now)
            .await
            .unwrap();

        assert!(store
            .consume_token(TokenPurpose::PasswordReset, "t1", now)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store
                .count_usable_tokens(TokenPurpose::EmailVerification, user.id, now)
                .await
                .unwrap(),
            1
        );
    }
}
