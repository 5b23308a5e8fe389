//! Gateway DTOs and response plumbing.

pub mod requests;
pub mod response;

pub use requests::*;
pub use response::*;
