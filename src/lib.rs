pub mod args;
pub mod config;
pub mod database;
pub mod materializer;
pub mod model;
pub mod utils;
