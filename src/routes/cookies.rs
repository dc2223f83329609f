/// Auth cookie contract
///
/// - `access_token`: sent on every request, lives as long as the access token
/// - `refresh_token`: scoped to the refresh endpoint, lives as long as the
///   refresh token
///
/// Both are `HttpOnly` and `SameSite=Lax`; `Secure` in production.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{HttpResponse, HttpResponseBuilder};

use crate::auth::TokenPair;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";
pub const ACCESS_COOKIE_PATH: &str = "/";
pub const REFRESH_COOKIE_PATH: &str = "/auth/refresh";

#[derive(Debug, Clone)]
pub struct CookiePolicy {
    secure: bool,
    access_max_age: chrono::Duration,
    refresh_max_age: chrono::Duration,
}

impl CookiePolicy {
    pub fn new(
        secure: bool,
        access_max_age: chrono::Duration,
        refresh_max_age: chrono::Duration,
    ) -> Self {
        Self {
            secure,
            access_max_age,
            refresh_max_age,
        }
    }

    pub fn access_cookie(&self, value: &str) -> Cookie<'static> {
        self.cookie(ACCESS_COOKIE, value, ACCESS_COOKIE_PATH, self.access_max_age)
    }

    pub fn refresh_cookie(&self, value: &str) -> Cookie<'static> {
        self.cookie(REFRESH_COOKIE, value, REFRESH_COOKIE_PATH, self.refresh_max_age)
    }

    /// Put both session cookies on a response under construction.
    pub fn set_session(&self, builder: &mut HttpResponseBuilder, tokens: &TokenPair) {
        builder.cookie(self.access_cookie(&tokens.access.token));
        builder.cookie(self.refresh_cookie(&tokens.refresh.token));
    }

    /// Expire both session cookies on a response under construction.
    pub fn clear_session(&self, builder: &mut HttpResponseBuilder) {
        for cookie in self.removal_cookies() {
            builder.cookie(cookie);
        }
    }

    /// Expire both session cookies on an already built response, such as
    /// one rendered from an error.
    pub fn clear_session_on(&self, response: &mut HttpResponse) {
        for cookie in self.removal_cookies() {
            if let Err(e) = response.add_cookie(&cookie) {
                tracing::error!(error = %e, cookie = cookie.name(), "Failed to clear cookie");
            }
        }
    }

    fn removal_cookies(&self) -> [Cookie<'static>; 2] {
        let mut access = self.cookie(ACCESS_COOKIE, "", ACCESS_COOKIE_PATH, chrono::Duration::zero());
        access.make_removal();
        let mut refresh =
            self.cookie(REFRESH_COOKIE, "", REFRESH_COOKIE_PATH, chrono::Duration::zero());
        refresh.make_removal();
        [access, refresh]
    }

    fn cookie(
        &self,
        name: &'static str,
        value: &str,
        path: &'static str,
        max_age: chrono::Duration,
    ) -> Cookie<'static> {
        Cookie::build(name, value.to_string())
            .path(path)
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(CookieDuration::seconds(max_age.num_seconds()))
            .finish()
    }
}
