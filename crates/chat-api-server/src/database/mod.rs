pub mod models;
pub mod pool;
pub mod repository;

pub use models::*;
pub use pool::DbPool;
pub use repository::{ExchangeStore, Repository};
