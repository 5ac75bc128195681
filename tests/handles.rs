#![cfg(target_os = "linux")]

//! Kept apart from the other tests, which open descriptors of their own in parallel.

use std::fs;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serdrive::serial::baud::BaudRate;
use serdrive::{Channel, Reporter, Target, Transfer};
use tempfile::tempdir;

const CYCLES: usize = 20;

fn open_descriptors() -> usize {
    fs::read_dir("/proc/self/fd").unwrap().count()
}

fn attach(path: &Path) -> UnixStream {
    loop {
        match UnixStream::connect(path) {
            Ok(stream) => return stream,
            Err(_) => thread::sleep(Duration::from_millis(5)),
        }
    }
}

/// Serve one session: take whatever the peer sends until it hangs up.
fn session(channel: &mut Channel, target: &Target, go: &mpsc::Sender<()>) {
    go.send(()).unwrap();
    channel.connect(target, BaudRate::default_pipe()).unwrap();

    let mut buf = [0; 16];
    while let Transfer::Data(_) = channel.read_characters(&mut buf).unwrap() {}
    assert!(channel.reset_connection());

    channel.disconnect();
}

#[test]
fn reconnects_do_not_leak() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("line");
    let target = Target::Pipe(path.clone());

    let (go, ready) = mpsc::channel();
    let client = thread::spawn(move || {
        // One peer per go-ahead, hung up before the next one.
        for _ in 0..CYCLES + 1 {
            ready.recv().unwrap();
            let mut stream = attach(&path);
            stream.write_all(b"hello").unwrap();
        }
    });

    let mut channel = Channel::new(Reporter::discard());
    // Settle anything opened once per process.
    session(&mut channel, &target, &go);
    let before = open_descriptors();

    for _ in 0..CYCLES {
        session(&mut channel, &target, &go);
    }

    assert_eq!(open_descriptors(), before);
    assert!(!channel.is_connected());
    client.join().unwrap();
}
