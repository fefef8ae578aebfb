//! Storage layer: domain models, the repository port and its adapters.

mod memory;
mod models;
mod repository;
mod store;

pub use memory::*;
pub use models::*;
pub use repository::*;
pub use store::*;
