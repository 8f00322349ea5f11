//! Core data model for mindfleet: task records and their on-disk
//! collection, blueprint rendering, completion validation, the worker exit
//! code taxonomy, and configuration.

pub mod blueprint;
pub mod config;
pub mod task_store;
pub mod types;
pub mod validator;
