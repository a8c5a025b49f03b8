//! Live data binding: sessions, scene connections and update fan-out.

pub mod broadcast;
pub mod client;
pub mod connection;
pub mod events;
pub mod index;
pub mod menu;
pub mod postponed;
pub mod registry;
pub mod server;
pub mod session;
pub mod sweeper;
