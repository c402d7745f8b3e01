pub mod action;
pub mod assembler;
pub mod client;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod providers;
pub mod transport;
pub mod validator;
