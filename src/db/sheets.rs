//! Spreadsheet-backed storage: each tab is a table whose first row names
//! the columns.

pub mod api;
pub mod memory;
pub mod row_store;
pub mod stories;
pub mod users;

pub use api::{GoogleSheetsClient, SheetsApi};
pub use memory::MemorySheets;
pub use row_store::{Record, RowStore};
pub use stories::SheetsStoryRepository;
pub use users::SheetsUserRepository;
