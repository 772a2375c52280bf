use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_catalog_tables::Migration),
            Box::new(m20240101_000002_create_order_tables::Migration),
        ]
    }
}

// Tables are generated from the entity definitions so columns cannot drift.
async fn create_from_entity<E>(manager: &SchemaManager<'_>, entity: E) -> Result<(), DbErr>
where
    E: sea_orm::EntityTrait,
{
    let backend = manager.get_database_backend();
    let schema = sea_orm::Schema::new(backend);
    let mut stmt = schema.create_table_from_entity(entity);
    manager.create_table(stmt.if_not_exists().to_owned()).await
}

mod m20240101_000001_create_catalog_tables {
    use super::create_from_entity;
    use crate::entities::{cart_item, coupon, customer_address, product_variant};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            create_from_entity(manager, product_variant::Entity).await?;
            create_from_entity(manager, coupon::Entity).await?;
            create_from_entity(manager, cart_item::Entity).await?;
            create_from_entity(manager, customer_address::Entity).await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_items_customer")
                        .table(cart_item::Entity)
                        .col(cart_item::Column::CustomerId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(customer_address::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(cart_item::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(coupon::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(product_variant::Entity).to_owned())
                .await
        }
    }
}

mod m20240101_000002_create_order_tables {
    use super::create_from_entity;
    use crate::entities::{order, order_item, order_timeline, payment_method};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            create_from_entity(manager, order::Entity).await?;
            create_from_entity(manager, order_item::Entity).await?;
            create_from_entity(manager, order_timeline::Entity).await?;
            create_from_entity(manager, payment_method::Entity).await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order")
                        .table(order_item::Entity)
                        .col(order_item::Column::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_timeline_order_position")
                        .table(order_timeline::Entity)
                        .col(order_timeline::Column::OrderId)
                        .col(order_timeline::Column::Position)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_methods_customer_payment")
                        .table(payment_method::Entity)
                        .col(payment_method::Column::CustomerId)
                        .col(payment_method::Column::GatewayPaymentId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(payment_method::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(order_timeline::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(order_item::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(order::Entity).to_owned())
                .await
        }
    }
}
