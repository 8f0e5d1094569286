pub mod job_store;
pub mod rate_limiter;
pub mod repository;
pub mod source_adapter;

pub use job_store::*;
pub use rate_limiter::*;
pub use repository::*;
pub use source_adapter::*;
