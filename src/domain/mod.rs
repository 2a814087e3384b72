pub mod models;
pub mod progression;
pub mod review;
pub mod validation;
pub mod visibility;
