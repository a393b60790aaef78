use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    entities::{cart_line, course, CartLine, Course},
    errors::ServiceError,
};

/// A cart line approved for payment, paired with its course priced at
/// selection time. This is the moment the price is captured; the order item
/// snapshots it and later course edits don't move the total.
#[derive(Debug, Clone)]
pub struct PayableLine {
    pub cart_line: cart_line::Model,
    pub course: course::Model,
}

#[derive(Debug, Clone)]
pub struct CartSelection {
    pub lines: Vec<PayableLine>,
    pub total: Decimal,
}

/// Resolves and validates the cart lines a buyer wants to pay for.
#[derive(Clone)]
pub struct CartSelectionService {
    db: Arc<DatabaseConnection>,
}

impl CartSelectionService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolve `cart_line_ids`, enforce buyer ownership of every line, and
    /// return the payable subset with its total.
    ///
    /// Ownership is all-or-nothing: a single foreign line rejects the whole
    /// request. Payability filtering is per line; only an empty payable set
    /// is an error.
    #[instrument(skip(self, cart_line_ids), fields(requested = cart_line_ids.len()))]
    pub async fn select_payable(
        &self,
        buyer_id: Uuid,
        cart_line_ids: &[Uuid],
    ) -> Result<CartSelection, ServiceError> {
        if cart_line_ids.is_empty() {
            return Err(ServiceError::InvalidInput(
                "at least one cart line id is required".to_string(),
            ));
        }

        let mut requested: Vec<Uuid> = cart_line_ids.to_vec();
        requested.sort();
        requested.dedup();

        let lines = CartLine::find()
            .filter(cart_line::Column::Id.is_in(requested.clone()))
            .all(&*self.db)
            .await?;

        if lines.len() != requested.len() {
            let found: Vec<Uuid> = lines.iter().map(|l| l.id).collect();
            let missing = requested
                .iter()
                .find(|id| !found.contains(id))
                .copied()
                .unwrap_or_default();
            return Err(ServiceError::NotFound(format!(
                "Cart line {} not found",
                missing
            )));
        }

        for line in &lines {
            if line.buyer_id != buyer_id {
                return Err(ServiceError::OwnershipViolation(line.id.to_string()));
            }
        }

        let payable: Vec<cart_line::Model> = lines
            .into_iter()
            .filter(|line| line.approval_status.is_payable())
            .collect();
        if payable.is_empty() {
            return Err(ServiceError::NothingPayable);
        }

        let course_ids: Vec<Uuid> = payable.iter().map(|line| line.course_id).collect();
        let courses: HashMap<Uuid, course::Model> = Course::find()
            .filter(course::Column::Id.is_in(course_ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let mut selected = Vec::with_capacity(payable.len());
        let mut total = Decimal::ZERO;
        for line in payable {
            let course = courses.get(&line.course_id).cloned().ok_or_else(|| {
                ServiceError::NotFound(format!("Course {} not found", line.course_id))
            })?;
            total += course.price;
            selected.push(PayableLine {
                cart_line: line,
                course,
            });
        }

        Ok(CartSelection {
            lines: selected,
            total,
        })
    }
}
