/// Password Hashing and Verification
///
/// bcrypt behind a small trait so the orchestrator does not care which
/// primitive is in use. Hashing is CPU-bound and runs on the blocking pool.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::AppError;

pub const MIN_PRODUCTION_COST: u32 = 12;

const DUMMY_PASSWORD: &str = "liftlog-dummy-password";

#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, password: &str) -> Result<String, AppError>;
    async fn verify(&self, password: &str, hash: &str) -> Result<bool, AppError>;

    /// Spend the same work as `verify` when there is no stored hash to check
    /// against, so an unknown account costs as long as a wrong password.
    async fn verify_against_dummy(&self, password: &str) -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
pub struct BcryptHasher {
    cost: u32,
    dummy_hash: Arc<OnceCell<String>>,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self {
            cost,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// A hash at this hasher's cost, computed on first use
    async fn dummy_hash(&self) -> Result<&str, AppError> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| self.hash(DUMMY_PASSWORD))
            .await?;
        Ok(hash.as_str())
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(MIN_PRODUCTION_COST)
    }
}

#[async_trait]
impl PasswordHasher for BcryptHasher {
    async fn hash(&self, password: &str) -> Result<String, AppError> {
        let password = password.to_string();
        let cost = self.cost;

        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }

    async fn verify(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let password = password.to_string();
        let hash = hash.to_string();

        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))?
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
    }

    async fn verify_against_dummy(&self, password: &str) -> Result<(), AppError> {
        let dummy = self.dummy_hash().await?.to_string();
        self.verify(password, &dummy).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // bcrypt's minimum cost keeps the tests fast
    fn hasher() -> BcryptHasher {
        BcryptHasher::new(4)
    }

    #[tokio::test]
    async fn test_hash_password() {
        let password = "ValidPassword123";
        let hash = hasher().hash(password).await.expect("Failed to hash password");

        assert_ne!(password, hash);
        assert!(hash.starts_with("$2"));
    }

    #[tokio::test]
    async fn test_verify_password() {
        let hash = hasher().hash("ValidPassword123").await.unwrap();

        assert!(hasher().verify("ValidPassword123", &hash).await.unwrap());
        assert!(!hasher().verify("WrongPassword123", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_password_hashes_differently() {
        let a = hasher().hash("ValidPassword123").await.unwrap();
        let b = hasher().hash("ValidPassword123").await.unwrap();

        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_default_cost_is_production_grade() {
        let hash = BcryptHasher::default().hash("ValidPassword123").await.unwrap();
        assert!(hash.starts_with("$2b$12$"));
    }

    #[tokio::test]
    async fn test_garbage_hash_is_an_error() {
        assert!(hasher().verify("ValidPassword123", "not-a-hash").await.is_err());
    }

    #[tokio::test]
    async fn test_dummy_hash_uses_configured_cost() {
        let hasher = hasher();
        hasher.verify_against_dummy("ValidPassword123").await.unwrap();

        let dummy = hasher.dummy_hash().await.unwrap().to_string();
        assert!(dummy.starts_with("$2b$04$"));

        // Computed once and reused.
        hasher.verify_against_dummy("Other1Password").await.unwrap();
        assert_eq!(hasher.dummy_hash().await.unwrap(), dummy);
    }
}
