//! Rentable item, as seen by the loan service

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Item availability record from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Item {
    pub id: i32,
    pub owner_id: i32,
    pub title: String,
    pub daily_rate: Decimal,
    pub is_available: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Listed by its owner and currently bookable
    pub fn is_bookable(&self) -> bool {
        self.is_available && self.is_active
    }
}

/// Short item representation embedded in loan details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ItemShort {
    pub id: i32,
    pub title: String,
    pub daily_rate: Decimal,
}

impl From<&Item> for ItemShort {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            title: item.title.clone(),
            daily_rate: item.daily_rate,
        }
    }
}
