// Library root: the shell around the draft engine (configuration, pool
// import, the command protocol and the application loop). The binary and the
// integration tests use these modules.

pub mod app;
pub mod auth;
pub mod config;
pub mod pool;
pub mod protocol;
