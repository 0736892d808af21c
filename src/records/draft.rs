//! Validation of user-entered expenses.

use crate::error::ValidationError;
use crate::types::{Category, Record, RecordId};
use chrono::{DateTime, Utc};

/// An expense as entered, before it is accepted into the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpenseDraft {
    pub name: String,
    pub amount: f64,
    pub category: Category,
    pub location: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ExpenseDraft {
    pub fn new(
        name: impl Into<String>,
        amount: f64,
        category: Category,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            amount,
            category,
            location: None,
            occurred_at,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Parse textual form input (amount and category as typed).
    pub fn from_form(
        name: &str,
        amount: &str,
        category: &str,
        location: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let amount: f64 = amount
            .trim()
            .parse()
            .map_err(|_| ValidationError::NonNumericAmount(amount.to_string()))?;
        let category: Category = category.parse()?;

        Self {
            name: name.to_string(),
            amount,
            category,
            location: Some(location.to_string()),
            occurred_at,
        }
        .validate()
    }

    /// Check the draft and normalize it.
    ///
    /// The name and location are trimmed; a blank location becomes `None`.
    pub fn validate(self) -> Result<Self, ValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        if !self.amount.is_finite() {
            return Err(ValidationError::NonNumericAmount(self.amount.to_string()));
        }
        if self.amount <= 0.0 {
            return Err(ValidationError::NonPositiveAmount(self.amount));
        }

        let location = self
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());

        Ok(Self {
            name,
            amount: self.amount,
            category: self.category,
            location,
            occurred_at: self.occurred_at,
        })
    }

    /// Turn a validated draft into a record with the given identity.
    pub(crate) fn into_record(self, id: RecordId) -> Record {
        Record {
            id,
            name: self.name,
            amount: self.amount,
            category: self.category,
            location: self.location,
            occurred_at: self.occurred_at,
        }
    }
}
