//! Authenticated caller.

use serde::Serialize;

use super::jwt::Claims;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Principal {
    Operator { id: i64, username: String },
    ShopOwner { shop_id: i64, username: String },
    /// Holder of a temp-token session, acting as the shop's system user.
    Customer { user_id: i64, shop_id: i64, username: String },
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Operator { .. })
    }

    /// The single shop this principal is bound to; `None` for operators.
    pub fn scoped_shop_id(&self) -> Option<i64> {
        match self {
            Self::Operator { .. } => None,
            Self::ShopOwner { shop_id, .. } | Self::Customer { shop_id, .. } => Some(*shop_id),
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Self::Operator { username, .. }
            | Self::ShopOwner { username, .. }
            | Self::Customer { username, .. } => username,
        }
    }

    /// Operator, or owner of `shop_id`.
    pub fn require_staff(&self, shop_id: i64) -> Result<()> {
        match self {
            Self::Operator { .. } => Ok(()),
            Self::ShopOwner { shop_id: own, .. } if *own == shop_id => Ok(()),
            _ => Err(AppError::Forbidden),
        }
    }

    /// Any principal allowed to act in `shop_id`, customers included.
    pub fn require_shop(&self, shop_id: i64) -> Result<()> {
        match self.scoped_shop_id() {
            None => Ok(()),
            Some(own) if own == shop_id => Ok(()),
            Some(_) => Err(AppError::Forbidden),
        }
    }

    pub fn require_operator(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    pub(crate) fn to_claims(&self, iat: i64, exp: i64) -> Claims {
        let (user_id, shop_id) = match self {
            Self::Operator { id, .. } => (*id, None),
            Self::ShopOwner { shop_id, .. } => (*shop_id, None),
            Self::Customer { user_id, shop_id, .. } => (*user_id, Some(*shop_id)),
        };
        Claims {
            user_id,
            username: self.username().to_string(),
            is_admin: self.is_admin(),
            iat,
            exp,
            shop_id,
        }
    }
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        match (claims.is_admin, claims.shop_id) {
            (true, _) => Self::Operator { id: claims.user_id, username: claims.username },
            (false, Some(shop_id)) => Self::Customer {
                user_id: claims.user_id,
                shop_id,
                username: claims.username,
            },
            (false, None) => Self::ShopOwner { shop_id: claims.user_id, username: claims.username },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(shop_id: i64) -> Principal {
        Principal::ShopOwner { shop_id, username: "shop_x".into() }
    }

    #[test]
    fn operator_reaches_every_shop() {
        let op = Principal::Operator { id: 1, username: "root".into() };
        assert!(op.is_admin());
        assert_eq!(op.scoped_shop_id(), None);
        assert!(op.require_staff(99).is_ok());
        assert!(op.require_shop(99).is_ok());
        assert!(op.require_operator().is_ok());
    }

    #[test]
    fn owner_is_scoped_to_own_shop() {
        let p = owner(3);
        assert!(p.require_staff(3).is_ok());
        assert!(matches!(p.require_staff(4), Err(AppError::Forbidden)));
        assert!(matches!(p.require_operator(), Err(AppError::Forbidden)));
    }

    #[test]
    fn customer_is_not_staff() {
        let c = Principal::Customer { user_id: 8, shop_id: 3, username: "shop_3_system".into() };
        assert!(c.require_shop(3).is_ok());
        assert!(c.require_shop(4).is_err());
        assert!(c.require_staff(3).is_err());
    }

    #[test]
    fn claims_round_trip() {
        let c = Principal::Customer { user_id: 8, shop_id: 3, username: "shop_3_system".into() };
        let claims = c.to_claims(0, 10);
        assert_eq!(claims.shop_id, Some(3));
        assert_eq!(Principal::from(claims), c);
    }
}
