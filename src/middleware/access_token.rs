/// Access Token Middleware
///
/// Reads the access token from the `access_token` cookie, falling back to
/// `Authorization: Bearer`, validates it, and injects the claims into the
/// request extensions for the handler. Rejections are `AppError`s, so they
/// render the same JSON body as every other error.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::HeaderMap,
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::TokenIssuer;
use crate::error::{AppError, AuthError};
use crate::routes::ACCESS_COOKIE;

pub struct AccessTokenMiddleware {
    issuer: TokenIssuer,
}

impl AccessTokenMiddleware {
    pub fn new(issuer: TokenIssuer) -> Self {
        Self { issuer }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AccessTokenMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AccessTokenMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AccessTokenMiddlewareService {
            service: Rc::new(service),
            issuer: self.issuer.clone(),
        }))
    }
}

pub struct AccessTokenMiddlewareService<S> {
    service: Rc<S>,
    issuer: TokenIssuer,
}

/// The cookie wins when both are present.
pub fn bearer_or_cookie_token(cookie: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(value) = cookie.filter(|v| !v.is_empty()) {
        return Some(value.to_string());
    }

    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

impl<S, B> Service<ServiceRequest> for AccessTokenMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let cookie_value = req.cookie(ACCESS_COOKIE).map(|c| c.value().to_string());
        let token = bearer_or_cookie_token(cookie_value.as_deref(), req.headers());

        match token {
            None => {
                tracing::debug!("Missing access token");
                let error: Error = AppError::Auth(AuthError::MissingToken).into();
                Box::pin(async move { Err(error) })
            }
            Some(token) => match self.issuer.verify_access_token(&token) {
                Ok(claims) => {
                    tracing::debug!(user_id = %claims.sub, "Access token validated");
                    req.extensions_mut().insert(claims);

                    let service = self.service.clone();
                    Box::pin(async move { service.call(req).await })
                }
                Err(e) => {
                    tracing::warn!("Access token rejected");
                    let error: Error = e.into();
                    Box::pin(async move { Err(error) })
                }
            },
        }
    }
}
