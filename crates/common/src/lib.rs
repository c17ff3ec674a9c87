// mdroom-common: shared types and wire constants for the mdroom workspace

pub mod crdt;
pub mod protocol;
pub mod types;
