pub mod error;
pub use error::ErrorKind;

pub mod messages;
pub mod records;
pub use records::{Page, Pagination};
