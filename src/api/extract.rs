//! Request extractors for bearer tokens, principals, paging, and path,
//! query and body rejections in the application's error shape.

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::{header, request::Parts},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use validator::Validate;

use crate::auth::{JwtService, Principal};
use crate::domain::value_objects::Page;
use crate::error::AppError;
use crate::state::AppState;

/// The raw token from `Authorization: Bearer <token>`, unverified.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::unauthenticated("missing authorization header"))?;
        JwtService::extract_from_header(header)
            .map(|t| BearerToken(t.to_string()))
            .ok_or_else(|| AppError::unauthenticated("malformed authorization header"))
    }
}

/// A verified, non-revoked caller.
#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(principal.clone());
        }
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let (principal, _) = state.services.auth.authenticate(&token).await.map_err(|e| {
            tracing::warn!(uri = %parts.uri, error = %e, "authentication failed");
            e
        })?;
        parts.extensions.insert(principal.clone());
        Ok(principal)
    }
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
}

/// `page` (default 1) and `pageSize` (default 10) from the query string.
#[derive(Debug, Clone, Copy)]
pub struct Paging(pub Page);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Paging {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(q) = Query::<PageQuery>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::invalid(e.body_text()))?;
        Ok(Paging(Page::new(q.page.unwrap_or(1), q.page_size.unwrap_or(10))?))
    }
}

/// A query string whose rejections use the application's error shape.
#[derive(Debug, Clone)]
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::invalid(e.body_text()))?;
        Ok(ApiQuery(value))
    }
}

/// Path parameters whose rejections use the application's error shape.
#[derive(Debug, Clone)]
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::invalid(e.body_text()))?;
        Ok(ApiPath(value))
    }
}

/// A JSON body whose rejections use the application's error shape.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::invalid(e.body_text()))?;
        Ok(ApiJson(value))
    }
}

/// A JSON body that also passed its `validator` rules.
#[derive(Debug, Clone)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let ApiJson(value) = ApiJson::<T>::from_request(req, state).await?;
        value.validate().map_err(|e| AppError::invalid(e.to_string()))?;
        Ok(ValidJson(value))
    }
}
