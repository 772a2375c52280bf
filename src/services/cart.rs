use std::sync::Arc;

use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    entities::cart_item::{self, Column, Entity as CartItem},
    entities::customer_address::{self, Entity as CustomerAddress},
    errors::ServiceError,
};

/// Read access to a customer's cart and saved addresses.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Items that will be checked out; saved-for-later lines are excluded.
    #[instrument(skip(self))]
    pub async fn active_items(&self, customer_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError> {
        Ok(CartItem::find()
            .filter(Column::CustomerId.eq(customer_id))
            .filter(Column::SavedForLater.eq(false))
            .order_by_asc(Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Removes the active lines, leaving saved-for-later ones in place.
    pub async fn clear_active_in<C: ConnectionTrait>(conn: &C, customer_id: Uuid) -> Result<u64, ServiceError> {
        let result = CartItem::delete_many()
            .filter(Column::CustomerId.eq(customer_id))
            .filter(Column::SavedForLater.eq(false))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    #[instrument(skip(self))]
    pub async fn clear_active(&self, customer_id: Uuid) -> Result<u64, ServiceError> {
        Self::clear_active_in(&*self.db, customer_id).await
    }

    /// Looks up an address, scoped to its owner.
    pub async fn address_for(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<customer_address::Model>, ServiceError> {
        Ok(CustomerAddress::find_by_id(address_id)
            .filter(customer_address::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?)
    }
}
