//! Networking: UDP front-end that maps client addresses to connections.

mod server;

pub use server::Server;
