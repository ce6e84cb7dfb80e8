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

//! The collection server proper.
//!
//! One listening socket, N producer connections, one output file. The wire protocol is
//! nothing at all: whatever bytes a client sends are appended to the file verbatim, flushed
//! after every read. There is no framing & no client identifier, so concurrent clients'
//! bytes interleave at read-granularity -- per-connection ordering is preserved, cross-
//! connection ordering is whatever the kernel delivers. Producers that want their lines kept
//! whole should send whole lines (the dalog network sink does).
//!
//! The server is strictly single-threaded: a current-thread runtime drives one task per
//! connection on a [`LocalSet`], so every write to the shared file is serialized by the
//! event loop itself & the file handle needs no lock. A disorderly client disconnect closes
//! that connection and nothing else; the only fatal errors are the startup ones (can't open
//! the file, can't bind the port).
//!
//! [`LocalSet`]: tokio::task::LocalSet

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{info, warn};

/// Upper bound on a single `recv`; also the most one connection can write to the file ahead
/// of its neighbors.
pub const RECV_BUF_SIZE: usize = 64 * 1024;

const BACKLOG: u32 = 50;

/// Startup errors. All of them are fatal: a sewer that can't persist or can't listen has no
/// reason to exist.
#[derive(Debug, Error)]
pub enum Error {
    #[error("can't open output file {path:?}: {source}")]
    FileOpen {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("can't bind port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
    #[error("can't listen: {0}")]
    Listen(#[source] std::io::Error),
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       struct SewerServer                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A bound-but-not-yet-serving collection server.
pub struct SewerServer {
    listener: TcpListener,
    output: Rc<RefCell<File>>,
}

impl SewerServer {
    /// Open (create/truncate) the output file & bind the listening socket (all interfaces,
    /// `SO_REUSEADDR` so a restart doesn't trip over `TIME_WAIT` remnants). Must be called
    /// within a tokio runtime. Pass port 0 to let the kernel pick (tests do).
    pub fn bind(port: u16, path: &Path) -> Result<SewerServer, Error> {
        let output = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| Error::FileOpen {
                path: path.to_path_buf(),
                source,
            })?;

        let socket = TcpSocket::new_v4().map_err(|source| Error::Bind { port, source })?;
        socket
            .set_reuseaddr(true)
            .map_err(|source| Error::Bind { port, source })?;
        socket
            .bind(SocketAddr::from(([0, 0, 0, 0], port)))
            .map_err(|source| Error::Bind { port, source })?;
        let listener = socket.listen(BACKLOG).map_err(Error::Listen)?;

        Ok(SewerServer {
            listener,
            output: Rc::new(RefCell::new(output)),
        })
    }

    /// The address actually bound (interesting when `bind` was handed port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept forever. Must run on a [`tokio::task::LocalSet`] (connection tasks are
    /// `spawn_local`ed; the shared file handle isn't `Send` & doesn't need to be). An accept
    /// failure is transient -- log it & keep listening; nothing short of process death stops
    /// the loop.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!(%peer, "new connection");
                    // Mirror the C server's socket config: linger off, so close never blocks.
                    if let Err(err) = stream.set_linger(None) {
                        warn!(%peer, "can't configure socket: {}", err);
                    }
                    tokio::task::spawn_local(drain(stream, peer, Rc::clone(&self.output)));
                }
                Err(err) => {
                    warn!("accept failed: {}", err);
                }
            }
        }
    }
}

/// Pump one connection into the output file until EOF or error. Every successful read is
/// written & flushed before this connection is polled again, so a crash loses at most the
/// bytes of the read in flight. A failed file write (disk full, say) drops that read's bytes
/// but keeps both the connection & the server alive.
async fn drain(mut stream: TcpStream, peer: SocketAddr, output: Rc<RefCell<File>>) {
    let mut buf = vec![0u8; RECV_BUF_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                info!(%peer, "remote closed");
                return;
            }
            Ok(n) => {
                let mut file = output.borrow_mut();
                if let Err(err) = file.write_all(&buf[..n]).and_then(|_| file.flush()) {
                    warn!(%peer, "dropping {} bytes: {}", n, err);
                }
            }
            Err(err) => {
                info!(%peer, "read failed, closing: {}", err);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .unwrap()
    }

    #[test]
    fn test_bind_truncates_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        std::fs::write(&path, "stale bytes from last run").unwrap();

        rt().block_on(async {
            let server = SewerServer::bind(0, &path).unwrap();
            assert_ne!(server.local_addr().unwrap().port(), 0);
        });
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_bind_errors() {
        let dir = tempfile::tempdir().unwrap();

        rt().block_on(async {
            // unopenable output file is fatal
            let missing = dir.path().join("no/such/dir/out.log");
            assert!(matches!(
                SewerServer::bind(0, &missing),
                Err(Error::FileOpen { .. })
            ));

            // so is a port someone else holds
            let path = dir.path().join("out.log");
            let first = SewerServer::bind(0, &path).unwrap();
            let port = first.local_addr().unwrap().port();
            assert!(matches!(
                SewerServer::bind(port, &dir.path().join("other.log")),
                Err(Error::Bind { .. }) | Err(Error::Listen(_))
            ));
        });
    }
}
