//! Pool-backed server/client over loopback.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use netkit_core::event::{ConnectionEvent, EventKind};
use netkit_core::log::{LogSink, NullSink};
use netkit_reactor::{PoolClient, PoolServer, ReactorConfig};
use netkit_runtime::{PoolConfig, ThreadPool};

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

fn pool(workers: usize) -> Arc<ThreadPool> {
    let config = PoolConfig::new()
        .workers(workers)
        .idle_delay(Duration::from_micros(200))
        .name_prefix("test-pool");
    Arc::new(ThreadPool::new(config, log()).unwrap())
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

type Journal = Arc<Mutex<Vec<(RawFd, EventKind, Vec<u8>)>>>;

fn count(journal: &Journal, kind: EventKind) -> usize {
    journal.lock().unwrap().iter().filter(|(_, k, _)| *k == kind).count()
}

#[test]
fn client_close_yields_exactly_one_eof() {
    let journal: Journal = Arc::default();
    let sink = Arc::clone(&journal);
    let mut server = PoolServer::start(loopback(), config(), pool(2), log(), move |_, ev: ConnectionEvent| {
        let kind = ev.kind();
        sink.lock().unwrap().push((ev.fd, kind, ev.payload));
    })
    .unwrap();

    let mut client = TcpStream::connect(server.local_addr()).unwrap();
    client.write_all(b"ping").unwrap();
    assert!(wait_until(Duration::from_secs(2), || count(&journal, EventKind::Data) >= 1));
    drop(client);

    assert!(wait_until(Duration::from_secs(2), || count(&journal, EventKind::Eof) == 1));
    server.pool().wait_all();
    std::thread::sleep(Duration::from_millis(50));

    let entries = journal.lock().unwrap().clone();
    assert_eq!(count(&journal, EventKind::Connect), 1);
    assert_eq!(count(&journal, EventKind::Eof), 1);

    let fd = entries[0].0;
    assert!(entries.iter().all(|(f, _, _)| *f == fd));
    let payload: Vec<u8> = entries
        .iter()
        .filter(|(_, k, _)| *k == EventKind::Data)
        .flat_map(|(_, _, p)| p.clone())
        .collect();
    assert_eq!(payload, b"ping");

    let stats = server.stats().snapshot();
    assert_eq!(stats.closed, 1);
    assert_eq!(stats.open, 0);
    server.stop();
}

#[test]
fn workers_reply_through_handle() {
    let mut server = PoolServer::start(loopback(), config(), pool(4), log(), |handle, ev| {
        if ev.kind() == EventKind::Data {
            let mut reply = ev.payload.clone();
            reply.make_ascii_uppercase();
            let _ = handle.send(ev.fd, reply);
        }
    })
    .unwrap();

    let mut client = TcpStream::connect(server.local_addr()).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client.write_all(b"abc").unwrap();

    let mut buf = [0u8; 3];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ABC");
    server.stop();
}

#[test]
fn many_connections_each_get_one_eof() {
    const CONNS: usize = 16;
    let eofs: Arc<Mutex<HashMap<RawFd, usize>>> = Arc::default();
    let connects = Arc::new(Mutex::new(0usize));
    let (eof_sink, connect_sink) = (Arc::clone(&eofs), Arc::clone(&connects));
    let mut server = PoolServer::start(loopback(), config(), pool(3), log(), move |_, ev| match ev.kind() {
        EventKind::Connect => *connect_sink.lock().unwrap() += 1,
        EventKind::Eof => *eof_sink.lock().unwrap().entry(ev.fd).or_default() += 1,
        EventKind::Data => {}
    })
    .unwrap();

    let clients: Vec<TcpStream> = (0..CONNS)
        .map(|_| TcpStream::connect(server.local_addr()).unwrap())
        .collect();
    assert!(wait_until(Duration::from_secs(2), || *connects.lock().unwrap() == CONNS));
    drop(clients);

    assert!(wait_until(Duration::from_secs(2), || server.stats().snapshot().closed == CONNS as u64));
    server.pool().wait_all();
    let total: usize = eofs.lock().unwrap().values().sum();
    assert_eq!(total, CONNS);
    server.stop();
}

#[test]
fn stop_does_not_report_eof() {
    let eofs = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&eofs);
    let workers = pool(2);
    let mut server = PoolServer::start(loopback(), config(), Arc::clone(&workers), log(), move |_, ev| {
        if ev.eof {
            *sink.lock().unwrap() += 1;
        }
    })
    .unwrap();

    let _client = TcpStream::connect(server.local_addr()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || server.stats().snapshot().open == 1));
    server.stop();
    workers.wait_all();
    assert_eq!(*eofs.lock().unwrap(), 0);
}

#[test]
fn pool_client_sees_connect_data_and_eof() {
    let server_pool = pool(2);
    let mut server = PoolServer::start(loopback(), config(), server_pool, log(), |handle, ev| {
        if ev.kind() == EventKind::Data {
            let _ = handle.send(ev.fd, ev.payload.clone());
            let _ = handle.close(ev.fd);
        }
    })
    .unwrap();

    let journal: Journal = Arc::default();
    let sink = Arc::clone(&journal);
    let mut client = PoolClient::connect(server.local_addr(), config(), pool(2), log(), move |_, ev| {
        let kind = ev.kind();
        sink.lock().unwrap().push((ev.fd, kind, ev.payload));
    })
    .unwrap();

    client.send("bye").unwrap();
    assert!(client.wait_closed(Duration::from_secs(2)));
    assert!(wait_until(Duration::from_secs(2), || count(&journal, EventKind::Eof) == 1));
    client.pool().wait_all();

    assert_eq!(count(&journal, EventKind::Connect), 1);
    let echoed: Vec<u8> = journal
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, k, _)| *k == EventKind::Data)
        .flat_map(|(_, _, p)| p.clone())
        .collect();
    assert_eq!(echoed, b"bye");
    assert!(journal.lock().unwrap().iter().all(|(fd, _, _)| *fd == client.fd()));

    client.stop();
    server.stop();
}
