// Library root for the draft allocation engine. The app crate and the
// integration tests reach everything through these modules.

pub mod admin;
pub mod db;
pub mod draft;
pub mod engine;
pub mod error;
pub mod events;
