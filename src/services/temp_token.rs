//! Rotating per-shop codes that let walk-in customers open a session.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use rand::Rng;
use serde::Serialize;

use super::shop::load_shop;
use crate::auth::{IssuedToken, JwtService, Principal};
use crate::clock::Clock;
use crate::domain::aggregates::{TempToken, User};
use crate::error::{AppError, Result};
use crate::store::{with_transaction, Store, Tx};

pub const TEMP_TOKEN_TTL_SECS: i64 = 3600;

/// Six decimal digits, never equal to `previous`.
fn generate_code(previous: Option<&str>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let code = rng.gen_range(100_000..=999_999).to_string();
        if previous != Some(code.as_str()) {
            return code;
        }
    }
}

/// The shop's system user, created on first use.
async fn system_user(tx: &mut Tx, shop_id: i64, now: DateTime<Utc>) -> Result<User> {
    if let Some(user) = tx.find_user_by_name(&User::system_name(shop_id)).await? {
        return Ok(user);
    }
    let user = User::system_for_shop(shop_id, now);
    tx.insert_user(&user).await?;
    tracing::info!(shop_id, user_id = user.id, "system user created");
    Ok(user)
}

async fn rotate_in(tx: &mut Tx, shop_id: i64, now: DateTime<Utc>) -> Result<TempToken> {
    let user = system_user(tx, shop_id, now).await?;
    let previous = tx.lock_temp_token(shop_id).await?;
    let token = TempToken {
        shop_id,
        user_id: user.id,
        token: generate_code(previous.as_ref().map(|t| t.token.as_str())),
        expires_at: now + Duration::seconds(TEMP_TOKEN_TTL_SECS),
    };
    tx.upsert_temp_token(&token).await?;
    Ok(token)
}

/// A customer session opened with a valid temp token.
#[derive(Debug, Clone, Serialize)]
pub struct CustomerSession {
    pub user: User,
    pub shop_id: i64,
    #[serde(flatten)]
    pub access: IssuedToken,
}

pub struct TempTokenService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    jwt: JwtService,
}

impl TempTokenService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, jwt: JwtService) -> Self {
        Self { store, clock, jwt }
    }

    /// The current code, or a fresh one when none exists or it has lapsed.
    pub async fn get_or_issue(&self, principal: &Principal, shop_id: i64) -> Result<TempToken> {
        principal.require_staff(shop_id)?;
        let now = self.clock.now();
        with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let shop = load_shop(tx, shop_id).await?;
                if shop.is_expired_at(now) {
                    return Err(AppError::ShopExpired);
                }
                match tx.lock_temp_token(shop_id).await? {
                    Some(current) if !current.is_expired_at(now) => Ok(current),
                    _ => rotate_in(tx, shop_id, now).await,
                }
            }
            .boxed()
        })
        .await
    }

    /// Replace the code now. The old code stops working immediately.
    pub async fn rotate(&self, principal: &Principal, shop_id: i64) -> Result<TempToken> {
        principal.require_staff(shop_id)?;
        let token = self.rotate_shop(shop_id).await?;
        tracing::info!(shop_id, "temp token rotated");
        Ok(token)
    }

    async fn rotate_shop(&self, shop_id: i64) -> Result<TempToken> {
        let now = self.clock.now();
        with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let shop = load_shop(tx, shop_id).await?;
                if shop.is_expired_at(now) {
                    return Err(AppError::ShopExpired);
                }
                rotate_in(tx, shop_id, now).await
            }
            .boxed()
        })
        .await
    }

    /// Exchange a code for a customer token that expires with the code.
    pub async fn validate(&self, shop_id: i64, code: &str) -> Result<CustomerSession> {
        let now = self.clock.now();
        let (token, user) = with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let shop = load_shop(tx, shop_id).await?;
                if shop.is_expired_at(now) {
                    return Err(AppError::ShopExpired);
                }
                let Some(token) = tx.find_temp_token(shop_id).await? else {
                    return Ok((None, None));
                };
                let user = tx.find_user(token.user_id).await?;
                Ok((Some(token), user))
            }
            .boxed()
        })
        .await?;

        let Some(token) = token else {
            return Err(AppError::TempTokenMismatch);
        };
        if token.is_expired_at(now) {
            return Err(AppError::TempTokenExpired);
        }
        if token.token != code.trim() {
            tracing::warn!(shop_id, "temp token mismatch");
            return Err(AppError::TempTokenMismatch);
        }
        let user = user.ok_or_else(|| AppError::Internal(format!("system user {} is missing", token.user_id)))?;

        let principal = Principal::Customer { user_id: user.id, shop_id, username: user.name.clone() };
        let access = self.jwt.issue_until(&principal, now, token.expires_at)?;
        Ok(CustomerSession { user, shop_id, access })
    }

    /// Rotate every stored code. Expired shops and per-shop failures are
    /// skipped; returns how many were rotated.
    pub async fn rotate_all(&self) -> Result<usize> {
        let tokens = with_transaction(self.store.as_ref(), move |tx| {
            async move { Ok(tx.list_temp_tokens().await?) }.boxed()
        })
        .await?;

        let mut rotated = 0;
        for token in tokens {
            match self.rotate_shop(token.shop_id).await {
                Ok(_) => rotated += 1,
                Err(AppError::ShopExpired) => {
                    tracing::debug!(shop_id = token.shop_id, "skipping expired shop");
                }
                Err(e) => {
                    tracing::warn!(shop_id = token.shop_id, error = %e, "temp token rotation failed");
                }
            }
        }
        Ok(rotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code(None);
            assert_eq!(code.len(), 6);
            let n: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&n));
        }
    }

    #[test]
    fn codes_differ_from_previous() {
        for _ in 0..200 {
            let first = generate_code(None);
            assert_ne!(generate_code(Some(&first)), first);
        }
    }
}
