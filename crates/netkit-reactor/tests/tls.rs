//! TLS server/client over loopback with a throwaway self-signed certificate.

use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use netkit_core::log::{LogSink, MemorySink, NullSink};
use netkit_reactor::tls::{client_config_with_roots, server_config, server_name};
use netkit_reactor::{ReactorConfig, TlsClient, TlsServer, TlsSession, TlsState};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn config() -> ReactorConfig {
    ReactorConfig::new()
        .poll_timeout(Duration::from_millis(20))
        .settle_delay(Duration::from_millis(5))
}

fn log() -> Arc<dyn LogSink> {
    Arc::new(NullSink)
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

struct Pki {
    server: Arc<rustls::ServerConfig>,
    client: Arc<rustls::ClientConfig>,
}

fn pki() -> Pki {
    let ck = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert: CertificateDer<'static> = ck.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(ck.key_pair.serialize_der()));
    Pki {
        server: server_config(vec![cert.clone()], key).unwrap(),
        client: client_config_with_roots(vec![cert]).unwrap(),
    }
}

#[test]
fn echo_round_trip() {
    let pki = pki();
    let states: Arc<Mutex<Vec<TlsState>>> = Arc::default();
    let seen = Arc::clone(&states);
    let mut server = TlsServer::start(loopback(), config(), pki.server, log(), move |session: &mut TlsSession, bytes: &[u8]| {
        seen.lock().unwrap().push(session.state());
        session.send(bytes).unwrap();
    })
    .unwrap();

    let got: Arc<Mutex<Vec<u8>>> = Arc::default();
    let sink = Arc::clone(&got);
    let mut client = TlsClient::connect(
        server.local_addr(),
        config(),
        pki.client,
        server_name("localhost").unwrap(),
        log(),
        move |_: &mut TlsSession, bytes: &[u8]| sink.lock().unwrap().extend_from_slice(bytes),
    )
    .unwrap();

    client.send("secret ").unwrap();
    client.send("message").unwrap();
    assert!(wait_until(Duration::from_secs(3), || got.lock().unwrap().len() == 14));
    assert_eq!(got.lock().unwrap().as_slice(), b"secret message");

    // Cleartext only ever reached the callback on an established session.
    let states = states.lock().unwrap().clone();
    assert!(!states.is_empty());
    assert!(states.iter().all(|s| *s == TlsState::Established));

    client.stop();
    server.stop();
}

#[test]
fn bulk_echo_through_full_socket_buffers() {
    let pki = pki();
    let refused = Arc::new(AtomicUsize::new(0));
    let failures = Arc::clone(&refused);
    let mut server = TlsServer::start(loopback(), config(), pki.server, log(), move |session: &mut TlsSession, bytes: &[u8]| {
        if session.send(bytes).is_err() {
            failures.fetch_add(1, Ordering::SeqCst);
        }
    })
    .unwrap();

    let got: Arc<Mutex<Vec<u8>>> = Arc::default();
    let sink = Arc::clone(&got);
    let mut client = TlsClient::connect(
        server.local_addr(),
        config(),
        pki.client,
        server_name("localhost").unwrap(),
        log(),
        move |_: &mut TlsSession, bytes: &[u8]| sink.lock().unwrap().extend_from_slice(bytes),
    )
    .unwrap();

    // 1 MiB in 16 KiB sends, far more than the kernel socket buffers hold.
    let mut sent = Vec::new();
    for i in 0..64u8 {
        let chunk = vec![i; 16 * 1024];
        sent.extend_from_slice(&chunk);
        client.send(chunk).unwrap();
    }

    assert!(wait_until(Duration::from_secs(10), || got.lock().unwrap().len() == sent.len()));
    assert!(*got.lock().unwrap() == sent, "echo lost or reordered bytes");
    assert_eq!(refused.load(Ordering::SeqCst), 0);
    assert_eq!(server.stats().snapshot().errors, 0);

    client.stop();
    server.stop();
}

#[test]
fn client_close_notify_closes_server_side() {
    let pki = pki();
    let mut server = TlsServer::start(loopback(), config(), pki.server, log(), |_: &mut TlsSession, _: &[u8]| {}).unwrap();

    let mut client = TlsClient::connect(
        server.local_addr(),
        config(),
        pki.client,
        server_name("localhost").unwrap(),
        log(),
        |_: &mut TlsSession, _: &[u8]| {},
    )
    .unwrap();

    client.send("hi").unwrap();
    assert!(wait_until(Duration::from_secs(3), || server.stats().snapshot().bytes_in > 0));
    // Let the client take the session tickets so its close is a clean FIN.
    std::thread::sleep(Duration::from_millis(50));
    client.close().unwrap();

    assert!(client.wait_closed(Duration::from_secs(3)));
    assert!(wait_until(Duration::from_secs(3), || server.stats().snapshot().closed == 1));
    assert_eq!(server.stats().snapshot().errors, 0);

    client.stop();
    server.stop();
}

#[test]
fn plaintext_peer_is_rejected() {
    let pki = pki();
    let sink = Arc::new(MemorySink::new());
    let calls = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&calls);
    let mut server = TlsServer::start(loopback(), config(), pki.server, sink.clone(), move |_: &mut TlsSession, _: &[u8]| {
        *counter.lock().unwrap() += 1;
    })
    .unwrap();

    let mut raw = TcpStream::connect(server.local_addr()).unwrap();
    raw.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();

    assert!(wait_until(Duration::from_secs(3), || server.stats().snapshot().errors == 1));
    assert!(wait_until(Duration::from_secs(3), || server.stats().snapshot().closed == 1));
    assert_eq!(*calls.lock().unwrap(), 0);
    assert!(sink.contains("errno"));

    // One bad session does not take the server down.
    assert!(server.is_running());
    server.stop();
}

#[test]
fn server_initiated_close() {
    let pki = pki();
    let fds: Arc<Mutex<Vec<i32>>> = Arc::default();
    let slot = Arc::clone(&fds);
    let mut server = TlsServer::start(loopback(), config(), pki.server, log(), move |session: &mut TlsSession, _: &[u8]| {
        slot.lock().unwrap().push(session.fd());
    })
    .unwrap();

    let mut client = TlsClient::connect(
        server.local_addr(),
        config(),
        pki.client,
        server_name("localhost").unwrap(),
        log(),
        |_: &mut TlsSession, _: &[u8]| {},
    )
    .unwrap();
    client.send("x").unwrap();
    assert!(wait_until(Duration::from_secs(3), || !fds.lock().unwrap().is_empty()));

    let fd = fds.lock().unwrap()[0];
    server.handle().close(fd).unwrap();
    assert!(client.wait_closed(Duration::from_secs(3)));
    assert!(wait_until(Duration::from_secs(3), || server.stats().snapshot().open == 0));

    client.stop();
    server.stop();
}
