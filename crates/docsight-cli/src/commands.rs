pub mod actions;
pub mod analyze;
