//! netkit TLS echo server
//!
//! Each connection gets a server-role TLS session pumped through memory
//! buffers on the reactor thread. Cleartext is echoed back from inside the
//! receive callback.
//!
//! Usage:
//!     cargo build --release -p netkit-tls-echo
//!     ./target/release/netkit-tls-echo [addr] [cert.pem key.pem]
//!
//! Without PEM files a self-signed certificate for "localhost" is generated
//! and written next to the working directory as netkit-tls-echo.pem.
//!
//! Test with:
//!     openssl s_client -connect localhost:9443 -CAfile netkit-tls-echo.pem

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use netkit::tls::{
    server_config, server_config_from_pem, CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerConfig,
    TlsServer, TlsSession,
};
use netkit::{kerror, kinfo, kwarn, signal, stderr_log, LogSink, NetError, ReactorConfig, Result};

const DEFAULT_ADDR: &str = "0.0.0.0:9443";
const SELF_SIGNED_PEM: &str = "netkit-tls-echo.pem";

fn self_signed(log: &dyn LogSink) -> Result<Arc<ServerConfig>> {
    let ck = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| NetError::Tls(format!("self-signed certificate: {}", e)))?;
    if let Err(e) = std::fs::write(SELF_SIGNED_PEM, ck.cert.pem()) {
        kwarn!(log, "tls-echo: could not write {}: {}", SELF_SIGNED_PEM, e);
    } else {
        kinfo!(log, "tls-echo: self-signed certificate written to {}", SELF_SIGNED_PEM);
    }
    let cert: CertificateDer<'static> = ck.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(ck.key_pair.serialize_der()));
    server_config(vec![cert], key)
}

/// Send `bytes` back. A session that refuses them is shut down rather than
/// left running with a gap in its stream.
fn echo(log: &dyn LogSink, session: &mut TlsSession, bytes: &[u8]) {
    if let Err(e) = session.send(bytes) {
        kwarn!(log, "tls-echo: fd {}: echo of {} bytes failed: {}", session.fd(), bytes.len(), e);
        session.close();
    }
}

fn run() -> Result<()> {
    let log = stderr_log();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let addr: SocketAddr = args
        .first()
        .map(String::as_str)
        .unwrap_or(DEFAULT_ADDR)
        .parse()
        .map_err(|_| NetError::Config("address must be host:port"))?;

    let tls = match (args.get(1), args.get(2)) {
        (Some(cert), Some(key)) => server_config_from_pem(Path::new(cert), Path::new(key))?,
        (Some(_), None) => return Err(NetError::Config("certificate given without a key")),
        _ => self_signed(&*log)?,
    };

    signal::install()?;

    let echo_log = Arc::clone(&log);
    let mut server = TlsServer::start(addr, ReactorConfig::from_env(), tls, log.clone(), move |session: &mut TlsSession, bytes: &[u8]| {
        echo(&*echo_log, session, bytes)
    })?;
    kinfo!(log, "tls-echo: listening on {} (Ctrl-C to stop)", server.local_addr());

    let stats = server.stats().clone();
    signal::wait(Duration::from_secs(5), || {
        kinfo!(log, "tls-echo: {}", stats.snapshot());
    });

    kinfo!(log, "tls-echo: shutting down...");
    server.stop();
    kinfo!(log, "tls-echo: done. {}", stats.snapshot());
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        let log = stderr_log();
        kerror!(log, "tls-echo: {}", e);
        std::process::exit(1);
    }
}
