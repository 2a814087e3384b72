pub mod finance;
pub mod stats;
