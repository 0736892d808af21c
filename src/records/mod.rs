//! Record model: the ordered set, draft validation, and spending summary.

mod draft;
mod set;
mod summary;

pub use draft::ExpenseDraft;
pub use set::RecordSet;
pub use summary::Summary;
