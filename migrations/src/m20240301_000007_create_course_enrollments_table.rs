use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CourseEnrollments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CourseEnrollments::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CourseEnrollments::LearnerId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CourseEnrollments::CourseId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CourseEnrollments::BuyerId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CourseEnrollments::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // One enrollment per (learner, course) no matter how many times
        // settlement runs.
        manager
            .create_index(
                Index::create()
                    .name("uq_enrollments_learner_course")
                    .table(CourseEnrollments::Table)
                    .col(CourseEnrollments::LearnerId)
                    .col(CourseEnrollments::CourseId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CourseEnrollments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CourseEnrollments {
    Table,
    Id,
    LearnerId,
    CourseId,
    BuyerId,
    CreatedAt,
}
