//! Command handlers

pub mod config;
pub mod document;
pub mod fetch;
pub mod publish;
pub mod rescue;
pub mod resource;
pub mod status;
