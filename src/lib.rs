pub mod analysis;
pub mod catalog;
pub mod config;
pub mod core;
pub mod download;
pub mod logger;
pub mod ocr;
pub mod utils;
pub mod workflow;
