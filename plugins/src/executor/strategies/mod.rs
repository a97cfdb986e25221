pub mod concurrency;
pub mod retry;

pub use concurrency::{AdaptiveConcurrencyPlugin, FixedConcurrencyPlugin};
pub use retry::{ExponentialBackoffPlugin, LinearRetryPlugin};
