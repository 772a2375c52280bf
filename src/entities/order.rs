use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: String,

    // Pricing breakdown, minor units, frozen at settlement.
    pub subtotal: i64,
    pub discount: i64,
    pub shipping: i64,
    pub tax: i64,
    pub total: i64,
    pub currency: String,

    #[sea_orm(column_type = "Json")]
    pub shipping_address: Json,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,

    // Payment record
    pub payment_method: Option<String>,
    #[sea_orm(unique)]
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub payment_status: String,
    pub paid_at: DateTime<Utc>,
    pub refunded_amount: i64,

    // Delivery metadata
    pub tracking_number: Option<String>,
    pub courier: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::order_timeline::Entity")]
    Timeline,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::order_timeline::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Timeline.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
