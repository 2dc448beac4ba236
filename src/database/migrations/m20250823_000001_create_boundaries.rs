use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Boundaries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Boundaries::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Boundaries::Name).string().not_null())
                    .col(ColumnDef::new(Boundaries::Code).integer().not_null())
                    .col(ColumnDef::new(Boundaries::Type).string().not_null())
                    .col(ColumnDef::new(Boundaries::ParentType).string().not_null())
                    .col(ColumnDef::new(Boundaries::ParentCode).string().not_null())
                    .col(ColumnDef::new(Boundaries::Geometry).text())
                    .col(ColumnDef::new(Boundaries::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Boundaries::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_boundaries_type_parent_code")
                    .table(Boundaries::Table)
                    .col(Boundaries::Type)
                    .col(Boundaries::ParentCode)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_boundaries_code_type")
                    .table(Boundaries::Table)
                    .col(Boundaries::Code)
                    .col(Boundaries::Type)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Boundaries::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Boundaries {
    Table,
    Id,
    Name,
    Code,
    Type,
    ParentType,
    ParentCode,
    Geometry,
    CreatedAt,
    UpdatedAt,
}
