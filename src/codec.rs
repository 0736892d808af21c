//! Mapping between in-memory records and remote rows.
//!
//! The remote collection uses snake_case column names and a text category
//! tag, stores an absent location as an empty string, and carries the owner
//! on every row.

use crate::types::{Category, OwnerId, Record, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of the remote, owner-scoped collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub id: RecordId,
    pub user_id: OwnerId,
    pub product_name: String,
    pub price: f64,
    pub category: String,
    pub place: String,
    pub date: DateTime<Utc>,
    /// Assigned by the remote on first insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Convert a record into a row owned by `owner`.
pub fn to_remote(record: &Record, owner: &OwnerId) -> RemoteRow {
    RemoteRow {
        id: record.id,
        user_id: owner.clone(),
        product_name: record.name.clone(),
        price: record.amount,
        category: record.category.as_str().to_string(),
        place: record.location.clone().unwrap_or_default(),
        date: record.occurred_at,
        created_at: None,
    }
}

/// Convert a remote row back into a record, dropping the owner.
///
/// Category tags are trusted; an unrecognized tag is coerced to
/// [`Category::Other`] rather than failing the whole fetch.
pub fn from_remote(row: RemoteRow) -> Record {
    let category = row.category.parse().unwrap_or_else(|_| {
        tracing::warn!(
            record_id = %row.id,
            tag = %row.category,
            "unknown category tag from remote, using 'other'"
        );
        Category::Other
    });

    Record {
        id: row.id,
        name: row.product_name,
        amount: row.price,
        category,
        location: if row.place.is_empty() {
            None
        } else {
            Some(row.place)
        },
        occurred_at: row.date,
    }
}

/// Convert a whole fetch, most recent expense first.
pub fn records_from_rows(rows: Vec<RemoteRow>) -> Vec<Record> {
    let mut records: Vec<Record> = rows.into_iter().map(from_remote).collect();
    records.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    records
}
