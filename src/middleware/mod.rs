pub mod rate_limit;
pub mod scope;

pub use rate_limit::RateLimiter;
pub use scope::RequestScope;
