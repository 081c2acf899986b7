//! Inline server/client over loopback.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use netkit_core::log::{LogSink, MemorySink, NullSink};
use netkit_reactor::{InlineClient, InlineServer, ReactorConfig};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn config() -> ReactorConfig {
    ReactorConfig::new()
        .poll_timeout(Duration::from_millis(20))
        .settle_delay(Duration::from_millis(5))
}

fn null_log() -> Arc<dyn LogSink> {
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

/// An address nothing listens on (the port was just released).
fn vacant_addr() -> SocketAddr {
    let spare = std::net::TcpListener::bind(loopback()).unwrap();
    spare.local_addr().unwrap()
}

#[test]
fn connect_refused_fails_setup() {
    let err = InlineClient::connect(vacant_addr(), config(), null_log(), |_, _| {}).unwrap_err();
    assert_eq!(err.errno(), Some(libc::ECONNREFUSED));
}

#[test]
fn client_retries_until_server_listens() {
    let addr = vacant_addr();
    let late = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        InlineServer::start(addr, config(), null_log(), |_, _| {}).unwrap()
    });

    let patient = config()
        .connect_attempts(100)
        .connect_backoff(Duration::from_millis(20));
    let mut client = InlineClient::connect(addr, patient, null_log(), |_, _| {}).unwrap();
    let mut server = late.join().unwrap();

    assert!(client.is_open());
    assert!(wait_until(Duration::from_secs(3), || server.stats().snapshot().accepted == 1));

    client.stop();
    server.stop();
}

#[test]
fn ping_is_delivered_exactly_once() {
    let seen: Arc<Mutex<Vec<Vec<u8>>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let mut server = InlineServer::start(loopback(), config(), null_log(), move |_fd, bytes| {
        sink.lock().unwrap().push(bytes.to_vec());
    })
    .unwrap();

    let mut client = TcpStream::connect(server.local_addr()).unwrap();
    client.write_all(b"ping").unwrap();

    assert!(wait_until(Duration::from_secs(2), || !seen.lock().unwrap().is_empty()));
    // Give a duplicate delivery a chance to show up.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(*seen.lock().unwrap(), vec![b"ping".to_vec()]);

    let stats = server.stats().snapshot();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.bytes_in, 4);
    server.stop();
}

#[test]
fn peer_close_deregisters_connection() {
    let log = Arc::new(MemorySink::new());
    let mut server = InlineServer::start(loopback(), config(), log.clone(), |_, _| {}).unwrap();

    let client = TcpStream::connect(server.local_addr()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || server.stats().snapshot().open == 1));
    drop(client);

    assert!(wait_until(Duration::from_secs(2), || server.stats().snapshot().closed == 1));
    let stats = server.stats().snapshot();
    assert_eq!(stats.open, 0);
    assert_eq!(stats.errors, 0);
    server.stop();
    assert!(log.contains("stopped"));
}

#[test]
fn echo_through_handle() {
    let mut server = InlineServer::start_with(loopback(), config(), null_log(), |handle| {
        move |fd, bytes: &[u8]| {
            let _ = handle.send(fd, bytes.to_vec());
        }
    })
    .unwrap();

    let got: Arc<Mutex<Vec<u8>>> = Arc::default();
    let sink = Arc::clone(&got);
    let mut client = InlineClient::connect(server.local_addr(), config(), null_log(), move |_, bytes| {
        sink.lock().unwrap().extend_from_slice(bytes);
    })
    .unwrap();

    client.send("hello ").unwrap();
    client.send(b"world".to_vec()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || got.lock().unwrap().len() == 11));
    assert_eq!(got.lock().unwrap().as_slice(), b"hello world");

    client.stop();
    server.stop();
}

#[test]
fn server_close_is_seen_by_client() {
    let server_fd: Arc<Mutex<Option<i32>>> = Arc::default();
    let slot = Arc::clone(&server_fd);
    let mut server = InlineServer::start(loopback(), config(), null_log(), move |fd, _| {
        *slot.lock().unwrap() = Some(fd);
    })
    .unwrap();

    let mut client = InlineClient::connect(server.local_addr(), config(), null_log(), |_, _| {}).unwrap();
    assert!(client.is_open());
    client.send("x").unwrap();
    assert!(wait_until(Duration::from_secs(2), || server_fd.lock().unwrap().is_some()));

    let fd = server_fd.lock().unwrap().unwrap();
    server.handle().close(fd).unwrap();
    assert!(client.wait_closed(Duration::from_secs(2)));
    assert!(client.send("late").is_err());

    client.stop();
    server.stop();
}

#[test]
fn large_reply_is_flushed_in_full() {
    const LEN: usize = 4 * 1024 * 1024;
    let mut server = InlineServer::start_with(loopback(), config(), null_log(), |handle| {
        move |fd, _: &[u8]| {
            let _ = handle.send(fd, vec![0xabu8; LEN]);
        }
    })
    .unwrap();

    let mut client = TcpStream::connect(server.local_addr()).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(b"go").unwrap();

    let mut total = 0;
    let mut buf = vec![0u8; 64 * 1024];
    while total < LEN {
        let n = client.read(&mut buf).unwrap();
        assert!(n > 0, "server closed early at {total}");
        assert!(buf[..n].iter().all(|&b| b == 0xab));
        total += n;
    }
    assert_eq!(total, LEN);
    server.stop();
}

#[test]
fn bind_conflict_fails_setup() {
    let mut first = InlineServer::start(loopback(), config(), null_log(), |_, _| {}).unwrap();
    let log = Arc::new(MemorySink::new());
    let err = InlineServer::start(first.local_addr(), config(), log.clone(), |_, _| {})
        .err()
        .expect("second bind must fail");
    assert_eq!(err.errno(), Some(libc::EADDRINUSE));
    assert!(log.contains("setup failed"));
    first.stop();
}

#[test]
fn stop_is_prompt() {
    let mut server = InlineServer::start(
        loopback(),
        config().poll_timeout(Duration::from_secs(10)),
        null_log(),
        |_, _| {},
    )
    .unwrap();
    let start = Instant::now();
    server.stop();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!server.is_running());
    assert!(server.handle().send(5, "x").is_err());
}
