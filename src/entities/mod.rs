pub mod cart_line;
pub mod course;
pub mod course_enrollment;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod transaction;

pub use cart_line::Entity as CartLine;
pub use course::Entity as Course;
pub use course_enrollment::Entity as CourseEnrollment;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use payment::Entity as Payment;
pub use transaction::Entity as Transaction;
