use std::sync::Arc;

use futures::FutureExt;
use serde::Deserialize;
use validator::Validate;

use crate::auth::{password, Policy, Principal};
use crate::clock::Clock;
use crate::domain::aggregates::{User, UserRole, UserType};
use crate::error::{AppError, Result};
use crate::store::{with_transaction, Store};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewUser {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    pub nickname: Option<String>,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub role: UserRole,
    #[serde(rename = "type", default)]
    pub kind: UserType,
    pub password: Option<String>,
}

pub struct UserService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl UserService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Register an end user. System users are only ever created by the
    /// temp-token flow.
    pub async fn create_user(&self, principal: &Principal, new: NewUser) -> Result<User> {
        if matches!(principal, Principal::Customer { .. }) {
            return Err(AppError::Forbidden);
        }
        new.validate().map_err(|e| AppError::invalid(e.to_string()))?;
        if new.kind == UserType::System {
            return Err(AppError::invalid("system users cannot be created directly"));
        }
        let password_hash = match new.password.as_deref() {
            Some(plain) => {
                Policy::Weak.check(plain)?;
                Some(password::hash(plain)?)
            }
            None => None,
        };

        let user = User {
            id: crate::id::next_id(),
            name: new.name.trim().to_string(),
            nickname: new.nickname,
            phone: new.phone,
            address: new.address,
            role: new.role,
            kind: new.kind,
            password_hash,
            created_at: self.clock.now(),
        };
        let created = user.clone();
        with_transaction(self.store.as_ref(), move |tx| {
            async move {
                tx.insert_user(&user).await?;
                Ok(())
            }
            .boxed()
        })
        .await?;

        tracing::info!(user_id = created.id, kind = created.kind.as_str(), "user created");
        Ok(created)
    }

    /// Staff may read any user; customers only themselves.
    pub async fn get_user(&self, principal: &Principal, user_id: i64) -> Result<User> {
        if let Principal::Customer { user_id: own, .. } = principal {
            if *own != user_id {
                return Err(AppError::Forbidden);
            }
        }
        with_transaction(self.store.as_ref(), move |tx| {
            async move {
                tx.find_user(user_id)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("user {user_id}")))
            }
            .boxed()
        })
        .await
    }
}
