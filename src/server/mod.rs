// src/server/mod.rs
pub mod admin;
pub mod builder;
pub mod handler;

pub use admin::start_admin_server;
pub use builder::ServerBuilder;
pub use handler::RequestHandler;
