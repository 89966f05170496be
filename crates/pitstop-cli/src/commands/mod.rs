//! Command handlers

pub mod cache;
pub mod config;
pub mod garage;
pub mod remote;
pub mod status;
pub mod sync;
pub mod user;
