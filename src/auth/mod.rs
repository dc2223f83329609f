/// Authentication module
///
/// Token issuing and verification, password hashing, opaque single-use
/// tokens, and the orchestrator that ties them to the stores.

mod claims;
mod jwt;
mod password;
mod service;
mod tokens;

pub use claims::{Claims, TokenKind};
pub use jwt::{SignedToken, TokenIssuer};
pub use password::{BcryptHasher, PasswordHasher, MIN_PRODUCTION_COST};
pub use service::{AuthService, LoginOutcome, TokenPair, UserProfile};
pub use tokens::{generate_opaque_token, hash_token};
