use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discounted stock offered by a store for a limited pickup window.
///
/// `reserved_quantity` counts units held by PENDING and CONFIRMED
/// reservations. Stock columns are only ever changed through conditional
/// updates in `services::inventory`, which keep
/// `0 <= reserved_quantity <= total_quantity`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub store_id: Uuid,
    pub name: String,
    #[sea_orm(nullable)]
    pub description: Option<String>,
    pub unit_price: Decimal,
    /// Price before the surplus discount, if the store publishes it
    #[sea_orm(nullable)]
    pub original_price: Option<Decimal>,
    pub total_quantity: i32,
    pub reserved_quantity: i32,
    pub available_from: DateTime<Utc>,
    pub available_until: DateTime<Utc>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Units not yet held by any reservation.
    pub fn available_quantity(&self) -> i32 {
        (self.total_quantity - self.reserved_quantity).max(0)
    }

    pub fn window_contains(&self, at: DateTime<Utc>) -> bool {
        self.available_from <= at && at <= self.available_until
    }

    /// Soft-disable rule: sold out or outside the pickup window.
    pub fn is_orderable(&self, at: DateTime<Utc>) -> bool {
        self.available_quantity() > 0 && self.window_contains(at)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::store::Entity",
        from = "Column::StoreId",
        to = "super::store::Column::Id"
    )]
    Store,
    #[sea_orm(has_many = "super::reservation::Entity")]
    Reservations,
}

impl Related<super::store::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Store.def()
    }
}

impl Related<super::reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
