// mdroom-client: room attachment and resource lifecycle for the collaborative editor.

pub mod api;
pub mod bundle;
pub mod config;
pub mod controller;
pub mod engine;
pub mod identity;
pub mod permission;
pub mod resource;
pub mod runtime;
pub mod session;
pub mod token;
