//! Domain events
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::value_objects::Money;

/// Emitted after the owning transaction commits.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Created {
        order_id: i64,
        shop_id: i64,
        user_id: i64,
        total_price: Money,
        at: DateTime<Utc>,
    },
    StatusChanged {
        order_id: i64,
        shop_id: i64,
        old_status: i32,
        new_status: i32,
        at: DateTime<Utc>,
    },
    Deleted {
        order_id: i64,
        shop_id: i64,
        at: DateTime<Utc>,
    },
}

impl OrderEvent {
    pub fn shop_id(&self) -> i64 {
        match self {
            Self::Created { shop_id, .. }
            | Self::StatusChanged { shop_id, .. }
            | Self::Deleted { shop_id, .. } => *shop_id,
        }
    }

    pub fn subject(&self) -> String {
        format!("orderease.shops.{}.orders", self.shop_id())
    }
}
