use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CartLines::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CartLines::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CartLines::BuyerId).uuid().not_null())
                    .col(ColumnDef::new(CartLines::LearnerId).uuid().not_null())
                    .col(ColumnDef::new(CartLines::CourseId).uuid().not_null())
                    .col(
                        ColumnDef::new(CartLines::ApprovalStatus)
                            .string_len(20)
                            .not_null()
                            .default("pending_approval"),
                    )
                    .col(ColumnDef::new(CartLines::CreatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_cart_lines_buyer")
                    .table(CartLines::Table)
                    .col(CartLines::BuyerId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CartLines::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CartLines {
    Table,
    Id,
    BuyerId,
    LearnerId,
    CourseId,
    ApprovalStatus,
    CreatedAt,
}
