pub use sea_orm_migration::prelude::*;

mod m20240301_000001_create_courses_table;
mod m20240301_000002_create_cart_lines_table;
mod m20240301_000003_create_orders_table;
mod m20240301_000004_create_order_items_table;
mod m20240301_000005_create_payments_table;
mod m20240301_000006_create_transactions_table;
mod m20240301_000007_create_course_enrollments_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_courses_table::Migration),
            Box::new(m20240301_000002_create_cart_lines_table::Migration),
            Box::new(m20240301_000003_create_orders_table::Migration),
            Box::new(m20240301_000004_create_order_items_table::Migration),
            Box::new(m20240301_000005_create_payments_table::Migration),
            Box::new(m20240301_000006_create_transactions_table::Migration),
            Box::new(m20240301_000007_create_course_enrollments_table::Migration),
        ]
    }
}
