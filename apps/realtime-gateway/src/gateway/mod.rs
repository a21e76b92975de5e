pub mod connection;
pub mod direct;
pub mod events;
pub mod handshake;
pub mod preferences;
pub mod registry;
pub mod rooms;
pub mod router;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;
