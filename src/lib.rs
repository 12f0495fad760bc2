pub mod config;
pub mod db;
pub mod hooks;
pub mod http;
pub mod jobs;
pub mod model;
pub mod queue;
pub mod urls;
pub mod wiki;
pub mod worker;
