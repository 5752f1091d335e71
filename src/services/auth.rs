//! Login, token verification, refresh, logout and password changes.

use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;

use crate::auth::{password, Claims, IssuedToken, JwtError, JwtService, Policy, Principal};
use crate::clock::Clock;
use crate::domain::aggregates::Operator;
use crate::error::{AppError, Result};
use crate::store::{with_transaction, Store};

impl From<JwtError> for AppError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::InvalidToken(_) => AppError::unauthenticated("invalid token"),
            JwtError::GenerationFailed(cause) => AppError::Internal(cause),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: i64,
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
}

impl LoginResponse {
    fn new(issued: IssuedToken, principal: &Principal) -> Self {
        let user_id = match principal {
            Principal::Operator { id, .. } => *id,
            Principal::ShopOwner { shop_id, .. } => *shop_id,
            Principal::Customer { user_id, .. } => *user_id,
        };
        Self {
            token: issued.token,
            expires_at: issued.expires_at,
            user_id,
            username: principal.username().to_string(),
            is_admin: principal.is_admin(),
        }
    }
}

enum Account {
    Operator(Operator),
    Shop(crate::domain::aggregates::Shop),
    Unknown,
}

pub struct AuthService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    jwt: JwtService,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, jwt: JwtService) -> Self {
        Self { store, clock, jwt }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    /// Operators are tried first, then shop owners. Unknown users and wrong
    /// passwords fail identically.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let now = self.clock.now();
        let name = username.to_string();
        let (operator, shop) = with_transaction(self.store.as_ref(), move |tx| {
            async move {
                let operator = tx.find_operator_by_username(&name).await?;
                let shop = tx.find_shop_by_owner(&name).await?;
                Ok((operator, shop))
            }
            .boxed()
        })
        .await?;

        let account = match (operator, shop) {
            (Some(op), _) if password::verify(password, &op.password_hash) => Account::Operator(op),
            (_, Some(shop)) => Account::Shop(shop),
            _ => Account::Unknown,
        };

        let principal = match account {
            Account::Operator(op) => Principal::Operator { id: op.id, username: op.username },
            Account::Shop(shop) => {
                if shop.is_expired_at(now) {
                    tracing::warn!(shop_id = shop.id, "login rejected for expired shop");
                    return Err(AppError::ShopExpired);
                }
                if !password::verify(password, &shop.owner_password_hash) {
                    tracing::warn!(username, "failed login");
                    return Err(AppError::InvalidCredentials);
                }
                Principal::ShopOwner { shop_id: shop.id, username: shop.principal_name() }
            }
            Account::Unknown => {
                tracing::warn!(username, "failed login");
                return Err(AppError::InvalidCredentials);
            }
        };

        let issued = self.jwt.issue(&principal, now)?;
        tracing::info!(username = principal.username(), admin = principal.is_admin(), "login");
        Ok(LoginResponse::new(issued, &principal))
    }

    /// Signature, expiry, then revocation.
    pub async fn authenticate(&self, token: &str) -> Result<(Principal, Claims)> {
        let claims = self.jwt.decode(token)?;
        if !claims.is_live_at(self.clock.now()) {
            return Err(AppError::unauthenticated("token expired"));
        }
        let owned = token.to_string();
        let revoked = with_transaction(self.store.as_ref(), move |tx| {
            async move { Ok(tx.is_token_revoked(&owned).await?) }.boxed()
        })
        .await?;
        if revoked {
            tracing::warn!(user_id = claims.user_id, "revoked token presented");
            return Err(AppError::unauthenticated("token revoked"));
        }
        Ok((Principal::from(claims.clone()), claims))
    }

    /// Mint a fresh token for the holder of `token`. The old token stays
    /// valid until its own expiry or logout.
    pub async fn refresh(&self, token: &str) -> Result<LoginResponse> {
        let (principal, _) = self.authenticate(token).await?;
        let now = self.clock.now();

        match principal.clone() {
            Principal::Operator { id, .. } => {
                let exists = with_transaction(self.store.as_ref(), move |tx| {
                    async move { Ok(tx.find_operator(id).await?.is_some()) }.boxed()
                })
                .await?;
                if !exists {
                    return Err(AppError::unauthenticated("account no longer exists"));
                }
            }
            Principal::ShopOwner { shop_id, .. } => {
                let shop = with_transaction(self.store.as_ref(), move |tx| {
                    async move { Ok(tx.find_shop(shop_id).await?) }.boxed()
                })
                .await?
                .ok_or_else(|| AppError::unauthenticated("shop no longer exists"))?;
                if shop.is_expired_at(now) {
                    return Err(AppError::ShopExpired);
                }
            }
            Principal::Customer { .. } => {
                return Err(AppError::Forbidden);
            }
        }

        let issued = self.jwt.issue(&principal, now)?;
        Ok(LoginResponse::new(issued, &principal))
    }

    /// Revoke `token` until its original expiry.
    pub async fn logout(&self, token: &str) -> Result<()> {
        let (principal, claims) = self.authenticate(token).await?;
        let now = self.clock.now();
        let owned = token.to_string();
        let expired_at = claims.expires_at();
        with_transaction(self.store.as_ref(), move |tx| {
            async move { Ok(tx.revoke_token(&owned, expired_at, now).await?) }.boxed()
        })
        .await?;
        tracing::info!(username = principal.username(), "logout");
        Ok(())
    }

    pub async fn change_password(&self, principal: &Principal, old: &str, new: &str) -> Result<()> {
        Policy::Strict.check(new)?;
        let old = old.to_string();
        let hashed = password::hash(new)?;
        let now = self.clock.now();

        match principal.clone() {
            Principal::Operator { id, .. } => {
                with_transaction(self.store.as_ref(), move |tx| {
                    async move {
                        let op = tx
                            .find_operator(id)
                            .await?
                            .ok_or_else(|| AppError::unauthenticated("account no longer exists"))?;
                        if !password::verify(&old, &op.password_hash) {
                            return Err(AppError::InvalidCredentials);
                        }
                        tx.update_operator_password(id, &hashed).await?;
                        Ok(())
                    }
                    .boxed()
                })
                .await?
            }
            Principal::ShopOwner { shop_id, .. } => {
                with_transaction(self.store.as_ref(), move |tx| {
                    async move {
                        let mut shop = tx
                            .find_shop(shop_id)
                            .await?
                            .ok_or_else(|| AppError::unauthenticated("shop no longer exists"))?;
                        if !password::verify(&old, &shop.owner_password_hash) {
                            return Err(AppError::InvalidCredentials);
                        }
                        shop.owner_password_hash = hashed;
                        shop.updated_at = now;
                        tx.update_shop(&shop).await?;
                        Ok(())
                    }
                    .boxed()
                })
                .await?
            }
            Principal::Customer { .. } => return Err(AppError::Forbidden),
        }

        tracing::info!(username = principal.username(), "password changed");
        Ok(())
    }

    /// Drop revoked tokens whose own expiry has passed.
    pub async fn purge_revoked(&self) -> Result<u64> {
        let now = self.clock.now();
        with_transaction(self.store.as_ref(), move |tx| {
            async move { Ok(tx.purge_revoked_tokens(now).await?) }.boxed()
        })
        .await
    }

    /// Create the operator unless one with that name exists. Returns whether
    /// an account was created.
    pub async fn ensure_operator(&self, username: &str, plain_or_hash: &str) -> Result<bool> {
        if username.trim().is_empty() {
            return Err(AppError::invalid("operator username is required"));
        }
        if !password::is_hashed(plain_or_hash) {
            Policy::Strict.check(plain_or_hash)?;
        }
        let operator = Operator {
            id: crate::id::next_id(),
            username: username.trim().to_string(),
            password_hash: password::ensure_hashed(plain_or_hash)?,
            created_at: self.clock.now(),
        };
        let created = with_transaction(self.store.as_ref(), move |tx| {
            async move {
                if tx.find_operator_by_username(&operator.username).await?.is_some() {
                    return Ok(false);
                }
                tx.insert_operator(&operator).await?;
                Ok(true)
            }
            .boxed()
        })
        .await?;
        if created {
            tracing::info!(username, "operator created");
        }
        Ok(created)
    }
}
