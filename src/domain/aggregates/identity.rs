//! Operators, shops and end users

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::flow::OrderStatusFlow;

#[derive(Clone, Debug, Serialize)]
pub struct Operator {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Tenant. A shop is expired once `now >= valid_until`.
#[derive(Clone, Debug, Serialize)]
pub struct Shop {
    pub id: i64,
    pub name: String,
    pub owner_username: String,
    #[serde(skip_serializing)]
    pub owner_password_hash: String,
    pub contact_phone: String,
    pub contact_email: String,
    pub address: String,
    pub description: String,
    pub image_ref: String,
    pub valid_until: DateTime<Utc>,
    pub settings: serde_json::Value,
    pub order_status_flow: OrderStatusFlow,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shop {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_until
    }

    /// Principal name carried in a shop owner's token.
    pub fn principal_name(&self) -> String {
        format!("shop_{}", self.owner_username)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Private,
    Public,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    #[default]
    Delivery,
    Pickup,
    System,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "public" => Some(Self::Public),
            _ => None,
        }
    }
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Pickup => "pickup",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delivery" => Some(Self::Delivery),
            "pickup" => Some(Self::Pickup),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub nickname: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub role: UserRole,
    #[serde(rename = "type")]
    pub kind: UserType,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn system_name(shop_id: i64) -> String {
        format!("shop_{shop_id}_system")
    }

    /// The synthetic account temp-token holders act as.
    pub fn system_for_shop(shop_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: crate::id::next_id(),
            name: Self::system_name(shop_id),
            nickname: None,
            phone: None,
            address: None,
            role: UserRole::Private,
            kind: UserType::System,
            password_hash: None,
            created_at: now,
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind == UserType::System
    }
}

/// One per shop; replaced in place on rotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TempToken {
    pub shop_id: i64,
    pub user_id: i64,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl TempToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A logged-out bearer, kept until its own `exp`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevokedToken {
    pub token: String,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn shop(valid_until: DateTime<Utc>) -> Shop {
        let now = Utc::now();
        Shop {
            id: 1,
            name: "Corner".into(),
            owner_username: "corner".into(),
            owner_password_hash: String::new(),
            contact_phone: String::new(),
            contact_email: String::new(),
            address: String::new(),
            description: String::new(),
            image_ref: String::new(),
            valid_until,
            settings: serde_json::Value::Null,
            order_status_flow: OrderStatusFlow::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn shop_expires_at_valid_until() {
        let now = Utc::now();
        let s = shop(now);
        assert!(s.is_expired_at(now));
        assert!(!s.is_expired_at(now - Duration::seconds(1)));
        assert_eq!(s.principal_name(), "shop_corner");
    }

    #[test]
    fn system_user_naming() {
        let user = User::system_for_shop(42, Utc::now());
        assert_eq!(user.name, "shop_42_system");
        assert!(user.is_system());
        assert!(user.password_hash.is_none());
    }

    #[test]
    fn hashes_are_not_serialized() {
        let s = shop(Utc::now());
        let json = serde_json::to_value(&s).unwrap();
        assert!(json.get("owner_password_hash").is_none());
        assert_eq!(json["order_status_flow"]["statuses"][0]["value"], 1);
    }
}
