pub mod cli;
pub mod config;
pub mod editor;
pub mod notes;
pub mod notify;
pub mod offline;
pub mod storage;
pub mod text;
pub mod todos;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
