// Wire-level contracts with the document backend and the collaboration endpoint.

pub mod api;
pub mod collab;
