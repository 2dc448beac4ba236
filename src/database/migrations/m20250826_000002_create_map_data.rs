use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MapData::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MapData::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MapData::Name).string().not_null())
                    .col(ColumnDef::new(MapData::Description).string_len(1000))
                    .col(
                        ColumnDef::new(MapData::GeometryType)
                            .string()
                            .not_null()
                            .default("point"),
                    )
                    .col(ColumnDef::new(MapData::UserId).integer().not_null())
                    .col(
                        ColumnDef::new(MapData::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(MapData::DataTable).string())
                    .col(ColumnDef::new(MapData::DataColumns).text())
                    .col(ColumnDef::new(MapData::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(MapData::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_map_data_user_active")
                    .table(MapData::Table)
                    .col(MapData::UserId)
                    .col(MapData::IsActive)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MapData::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MapData {
    Table,
    Id,
    Name,
    Description,
    GeometryType,
    UserId,
    IsActive,
    DataTable,
    DataColumns,
    CreatedAt,
    UpdatedAt,
}
