//! Initial migration to create the snapshot store schema.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_api_cache(manager).await?;
        self.create_entity_record(manager).await?;
        self.create_collection_run(manager).await?;
        self.create_deferred_call(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DeferredCall::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CollectionRun::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EntityRecord::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ApiCache::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    async fn create_api_cache(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ApiCache::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ApiCache::Locator)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    // Validators
                    .col(ColumnDef::new(ApiCache::Etag).text().null())
                    .col(ColumnDef::new(ApiCache::LastModified).text().null())
                    // Payload
                    .col(ColumnDef::new(ApiCache::Body).json().not_null())
                    .col(ColumnDef::new(ApiCache::Status).integer().not_null())
                    .col(
                        ColumnDef::new(ApiCache::CachedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_entity_record(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EntityRecord::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EntityRecord::Key)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EntityRecord::Fields)
                            .json()
                            .not_null()
                            .default(Expr::cust("'{}'")),
                    )
                    .col(
                        ColumnDef::new(EntityRecord::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_collection_run(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CollectionRun::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CollectionRun::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CollectionRun::CollectedAs)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CollectionRun::CollectedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Latest run lookups
        manager
            .create_index(
                Index::create()
                    .name("idx_collection_run_collected_at")
                    .table(CollectionRun::Table)
                    .col((CollectionRun::CollectedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await
    }

    async fn create_deferred_call(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeferredCall::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeferredCall::Locator)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DeferredCall::EntityKey).text().not_null())
                    .col(ColumnDef::new(DeferredCall::Field).string().not_null())
                    .col(
                        ColumnDef::new(DeferredCall::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum ApiCache {
    Table,
    Locator,
    Etag,
    LastModified,
    Body,
    Status,
    CachedAt,
}

#[derive(DeriveIden)]
enum EntityRecord {
    Table,
    Key,
    Fields,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CollectionRun {
    Table,
    Id,
    CollectedAs,
    CollectedAt,
}

#[derive(DeriveIden)]
enum DeferredCall {
    Table,
    Locator,
    EntityKey,
    Field,
    RecordedAt,
}
