//! Logging setup shared by the supervisor and worker processes.
//!
//! Both sides log through `tracing`; this crate only installs the global
//! subscriber, in human-readable or JSON form.

pub mod logging;
