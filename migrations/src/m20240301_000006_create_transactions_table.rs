use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Transactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transactions::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::OrderId).uuid().not_null())
                    .col(
                        ColumnDef::new(Transactions::TrackingCode)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::Amount)
                            .decimal_len(19, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::Status)
                            .string_len(20)
                            .not_null()
                            .default("completed"),
                    )
                    .col(
                        ColumnDef::new(Transactions::SettledAt)
                            .timestamp()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_transactions_order")
                            .from(Transactions::Table, Transactions::OrderId)
                            .to(Orders::Table, Orders::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one ledger row per order, ever. Concurrent settlement calls
        // race on this index; the loser treats the violation as already settled.
        manager
            .create_index(
                Index::create()
                    .name("uq_transactions_order")
                    .table(Transactions::Table)
                    .col(Transactions::OrderId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Transactions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Transactions {
    Table,
    Id,
    OrderId,
    TrackingCode,
    Amount,
    Status,
    SettledAt,
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
}
