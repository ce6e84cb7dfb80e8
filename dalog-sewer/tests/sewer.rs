// Copyright (C) 2022-2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of dalog.
//
// dalog is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// mpdpopm is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even
// the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details.
//
// You should have received a copy of the GNU General Public License along with mpdpopm.  If not,
// see <http://www.gnu.org/licenses/>.

//! End-to-end tests for the collection server: real sockets on an ephemeral port, real file.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use dalog_sewer::server::SewerServer;

fn run_local<F: Future>(fut: F) -> F::Output {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap();
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, fut)
}

/// The server binds all interfaces; tests talk to it over loopback.
fn loopback(server: &SewerServer) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], server.local_addr().unwrap().port()))
}

/// Poll until `pred` accepts the output file's contents (the server flushes after every
/// read, but its reads race with the test).
async fn wait_for<P: Fn(&[u8]) -> bool>(path: &Path, pred: P) {
    for _ in 0..500 {
        if let Ok(content) = std::fs::read(path) {
            if pred(&content) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "output file never satisfied the predicate; holds {:?}",
        std::fs::read(path)
    );
}

#[test]
fn test_collects_concurrent_streams() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sewer.log");

    run_local(async {
        let server = SewerServer::bind(0, &path).unwrap();
        let addr = loopback(&server);
        tokio::task::spawn_local(server.run());

        // one client sends a terminated line, another an unterminated fragment & hangs up
        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        a.write_all(b"hello\n").await.unwrap();
        b.write_all(b"world").await.unwrap();
        drop(b);
        a.shutdown().await.unwrap();
        drop(a);

        wait_for(&path, |content| content.len() >= 11).await;
    });

    // every byte sent arrives, verbatim; cross-connection order is unspecified
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.len(), 11);
    assert!(content.contains("hello\n"), "got {:?}", content);
    assert!(content.contains("world"), "got {:?}", content);
}

#[test]
fn test_preserves_per_connection_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sewer.log");

    run_local(async {
        let server = SewerServer::bind(0, &path).unwrap();
        let addr = loopback(&server);
        tokio::task::spawn_local(server.run());

        let mut client = TcpStream::connect(addr).await.unwrap();
        for chunk in [&b"abc"[..], b"def", b"ghi"] {
            client.write_all(chunk).await.unwrap();
        }
        client.shutdown().await.unwrap();
        drop(client);

        wait_for(&path, |content| content.len() >= 9).await;
    });

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "abcdefghi");
}

#[test]
fn test_abrupt_disconnect_leaves_others_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sewer.log");

    run_local(async {
        let server = SewerServer::bind(0, &path).unwrap();
        let addr = loopback(&server);
        tokio::task::spawn_local(server.run());

        let mut survivor = TcpStream::connect(addr).await.unwrap();
        survivor.write_all(b"start").await.unwrap();

        // a client that resets rather than closing cleanly
        let mut rude = TcpStream::connect(addr).await.unwrap();
        rude.write_all(b"junk").await.unwrap();
        rude.set_linger(Some(Duration::ZERO)).unwrap();
        drop(rude);

        // the server must still be serving the surviving connection
        survivor.write_all(b"end").await.unwrap();
        survivor.shutdown().await.unwrap();
        drop(survivor);

        wait_for(&path, |content| {
            content.windows(3).any(|w| w == b"end")
        })
        .await;
    });

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("start"), "got {:?}", content);
    assert!(content.contains("end"), "got {:?}", content);
}

/// The dalog network sink is this server's intended producer; close the loop once.
#[test]
fn test_receives_from_dalog_network_sink() {
    use dalog::sink::{NetworkSink, Sink};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sewer.log");

    run_local(async {
        let server = SewerServer::bind(0, &path).unwrap();
        let addr = loopback(&server);
        tokio::task::spawn_local(server.run());

        // The sink's blocking connect & write land in the kernel's queues without the
        // accept loop running; the payload is small enough not to block.
        let sink = NetworkSink::new(addr.to_string());
        sink.emit(b"|E| kaboom").unwrap();
        drop(sink);

        wait_for(&path, |content| content.len() >= 11).await;
    });

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "|E| kaboom\n");
}
