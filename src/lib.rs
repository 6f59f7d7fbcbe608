pub mod api;
pub mod broker;
pub mod config;
pub mod errors;
pub mod input;
pub mod logging;
pub mod pool;
pub mod quest_config;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod ui;
