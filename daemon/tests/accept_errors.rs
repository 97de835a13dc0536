// Accept failures under descriptor exhaustion must not stop the server.
// Kept in its own test binary because it lowers the process-wide fd limit.
use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::num::NonZeroUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use nix::sys::resource::{getrlimit, setrlimit, Resource};
use ringlog_daemon::{Server, ServerConfig};

const FD_LIMIT: u64 = 128;

#[test]
fn server_keeps_serving_after_running_out_of_descriptors() {
    let server = Server::bind(ServerConfig {
        listen: "127.0.0.1:0".parse().expect("addr"),
        capacity: NonZeroUsize::new(4).expect("capacity"),
        ..ServerConfig::default()
    })
    .expect("bind");
    let addr = server.local_addr().expect("addr");
    let shutdown = server.shutdown_handle();
    let handle = thread::spawn(move || server.run());

    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).expect("getrlimit");
    setrlimit(Resource::RLIMIT_NOFILE, FD_LIMIT.min(soft), hard).expect("setrlimit");

    let mut hogs = Vec::new();
    while let Ok(file) = File::open("/dev/null") {
        hogs.push(file);
    }
    // one free descriptor for the client; the server side has none left
    hogs.pop();
    let mut client = TcpStream::connect(addr).expect("connect");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    client.write_all(b"after\n").expect("write");

    thread::sleep(Duration::from_millis(800));
    assert!(!handle.is_finished(), "accept loop gave up");

    drop(hogs);
    let mut reply = Vec::new();
    client.read_to_end(&mut reply).expect("read");
    assert_eq!(reply, b"after\n");

    setrlimit(Resource::RLIMIT_NOFILE, soft, hard).expect("restore rlimit");
    shutdown.store(true, Ordering::Relaxed);
    let summary = handle
        .join()
        .expect("server thread")
        .expect("clean shutdown");
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.entries_released, 1);
}
