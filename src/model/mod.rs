pub mod composition;
pub mod config;
pub mod event;
