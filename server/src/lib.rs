pub mod app;
pub mod core;
pub mod data;
