//! Lesson-plan calendar: entry model, key composition, date shifting and the
//! cascade rescheduler.

pub mod cache;
pub mod cascade;
pub mod dates;
pub mod entry;
pub mod error;
pub mod key;
#[cfg(test)]
pub mod memory;
pub mod reschedule;
pub mod store;
pub mod week;

pub use cache::EntryCache;
pub use dates::Direction;
pub use entry::{Entry, Scope};
pub use error::CalendarError;
pub use store::{EntryStore, SqliteStore};
