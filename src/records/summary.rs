//! Spending totals over a record set.

use crate::records::RecordSet;
use crate::types::Category;
use serde::Serialize;
use std::collections::BTreeMap;

/// Aggregate view of a record set.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Summary {
    pub total: f64,
    pub count: usize,
    /// Every category is present, zero when unused.
    pub by_category: BTreeMap<Category, f64>,
    /// Highest-spend category, `None` when nothing has been spent.
    pub top_category: Option<(Category, f64)>,
}

impl Summary {
    pub fn of(set: &RecordSet) -> Self {
        let mut by_category: BTreeMap<Category, f64> =
            Category::ALL.iter().map(|c| (*c, 0.0)).collect();
        let mut total = 0.0;

        for record in set.iter() {
            total += record.amount;
            *by_category.entry(record.category).or_insert(0.0) += record.amount;
        }

        // Ties go to the category declared first.
        let mut top_category: Option<(Category, f64)> = None;
        for category in Category::ALL {
            let amount = by_category[&category];
            if amount > top_category.map(|(_, a)| a).unwrap_or(0.0) {
                top_category = Some((category, amount));
            }
        }

        Self {
            total,
            count: set.len(),
            by_category,
            top_category,
        }
    }
}
