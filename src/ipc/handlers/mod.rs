pub mod core;
pub mod plans;
pub mod setup;
