/// Middleware module
///
/// Guards for routes that need an authenticated caller.

mod access_token;

pub use access_token::{bearer_or_cookie_token, AccessTokenMiddleware};
