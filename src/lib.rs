//! Collects claim-check payload files from many check-in directories into one
//! check-out directory, coordinating with other agents through lease markers
//! on the shared filesystem.

pub mod agent;
pub mod build_info;
pub mod claim_file;
pub mod classify;
pub mod clock;
pub mod collector;
pub mod commands;
pub mod config;
pub mod error;
pub mod filter;
pub mod handler;
pub mod model;
pub mod output;
pub mod scheduler;
pub mod store;
