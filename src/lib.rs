pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod normalize;
pub mod output;
pub mod processor;
pub mod runlog;
pub mod store;
pub mod tracker;
