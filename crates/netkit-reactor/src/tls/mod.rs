//! TLS over the reactor: a memory-buffered session pump (rustls + ring)
//! and the server/client built on it.

pub mod config;
pub mod session;
pub mod server;

pub use config::{
    client_config_from_pem, client_config_with_roots, load_certs, load_private_key, server_config,
    server_config_from_pem, server_name,
};
pub use session::{PumpStatus, Role, TlsCallback, TlsSession, TlsState};
pub use server::{TlsClient, TlsServer};
