pub mod app;
pub mod cli;
pub mod config;
pub mod listing;
pub mod logging;
pub mod state;
pub mod upstream;
pub mod utils;
pub mod web;
