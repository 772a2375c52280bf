use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    entities::payment_method::{self, Column, Entity as PaymentMethod},
    errors::ServiceError,
};

/// Remembers which gateway methods a customer has paid with.
#[derive(Clone)]
pub struct PaymentMethodVault {
    db: Arc<DatabaseConnection>,
}

impl PaymentMethodVault {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Records the method used for `gateway_payment_id`. Saving the same payment twice is a no-op.
    #[instrument(skip(self))]
    pub async fn save(
        &self,
        customer_id: Uuid,
        method: &str,
        gateway_payment_id: &str,
    ) -> Result<payment_method::Model, ServiceError> {
        if let Some(existing) = PaymentMethod::find()
            .filter(Column::CustomerId.eq(customer_id))
            .filter(Column::GatewayPaymentId.eq(gateway_payment_id))
            .one(&*self.db)
            .await?
        {
            debug!("payment method already vaulted");
            return Ok(existing);
        }

        let model = payment_method::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            method: Set(method.to_string()),
            gateway_payment_id: Set(gateway_payment_id.to_string()),
            created_at: Set(Utc::now()),
        };
        Ok(model.insert(&*self.db).await?)
    }
}
