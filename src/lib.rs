pub mod config;
pub mod geometry;
pub mod jobs;
pub mod pipeline;

pub mod database;
pub mod errors;
pub mod services;
