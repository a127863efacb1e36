//! Chunk planner daemon: HTTP surface and service settings

pub mod api;
pub mod config;
