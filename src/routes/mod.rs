mod auth;
mod cookies;
mod health_check;

pub use auth::{
    forgot_password, login, logout, me, refresh, register, resend_verification, reset_password,
    verify_email, FORGOT_PASSWORD_MESSAGE, RESEND_VERIFICATION_MESSAGE,
};
pub use cookies::{
    CookiePolicy, ACCESS_COOKIE, ACCESS_COOKIE_PATH, REFRESH_COOKIE, REFRESH_COOKIE_PATH,
};
pub use health_check::health_check;
