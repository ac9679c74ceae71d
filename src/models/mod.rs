//! Domain model module declarations.

pub mod oauth;
pub mod server;
pub mod token;
pub mod user;
