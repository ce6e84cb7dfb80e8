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

//! Output sinks & the fan-out registry.
//!
//! This module defines the [`Sink`] trait that all backends must support, as well as the
//! stdout, file, syslog & network implementations. A formatted record is handed to every
//! registered sink in registration order; each sink independently guarantees that what it
//! writes ends in exactly one trailing newline (the record itself carries none -- a sink may
//! be handed the very same buffer as its neighbors, so the normalization cannot be
//! centralized).
//!
//! # Examples
//!
//! To tee records to a local file and a collection server:
//!
//! ```no_run
//! use dalog::sink::{FileSink, NetworkSink, SinkSet};
//! let sinks = SinkSet::new();
//! sinks.register(Box::new(FileSink::new("/tmp/my.log").unwrap()));
//! sinks.register(Box::new(NetworkSink::new("loghost:9100")));
//! sinks.dispatch(b"|E| something broke");
//! ```

use crate::error::{Error, Result};

use backtrace::Backtrace;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::TcpStream;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        trait Sink                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Operations all output backends must support.
pub trait Sink: Send + Sync {
    /// Write one formatted record. `content` may or may not end in a newline; the
    /// implementation must ensure its output does, exactly once.
    fn emit(&self, content: &[u8]) -> Result<()>;
}

fn ends_with_newline(content: &[u8]) -> bool {
    content.last() == Some(&b'\n')
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        struct SinkSet                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The ordered fan-out list.
///
/// Registration performs no de-duplication: register a sink twice and every record is
/// delivered to it twice. That is long-standing observed behavior of this library's users'
/// setups, kept as-is.
pub struct SinkSet {
    sinks: RwLock<Vec<Box<dyn Sink>>>,
}

impl Default for SinkSet {
    fn default() -> Self {
        SinkSet::new()
    }
}

impl SinkSet {
    pub fn new() -> SinkSet {
        SinkSet {
            sinks: RwLock::new(Vec::new()),
        }
    }

    /// Append a backend to the fan-out list.
    pub fn register(&self, sink: Box<dyn Sink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand `content` to every registered sink, in registration order. A failing sink is
    /// reported on stderr & skipped; the rest still get the record.
    pub fn dispatch(&self, content: &[u8]) {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        for sink in sinks.iter() {
            if let Err(err) = sink.emit(content) {
                eprintln!("dalog: sink error: {}", err);
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        struct StdoutSink                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Write records to standard output.
#[derive(Default)]
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn emit(&self, content: &[u8]) -> Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(content)?;
        if !ends_with_newline(content) {
            handle.write_all(b"\n")?;
        }
        handle.flush()?;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         struct FileSink                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Append records to a local file, flushing after every record.
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    /// Open (append, create-if-absent) the file at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<FileSink> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path.as_ref())?;
        Ok(FileSink {
            file: Mutex::new(file),
        })
    }
}

impl Sink for FileSink {
    fn emit(&self, content: &[u8]) -> Result<()> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(content)?;
        if !ends_with_newline(content) {
            file.write_all(b"\n")?;
        }
        file.flush()?;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        struct SyslogSink                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Forward records to the local syslog daemon via the Unix datagram socket at `/dev/log`.
#[cfg(target_os = "linux")]
pub struct SyslogSink {
    socket: std::os::unix::net::UnixDatagram,
}

#[cfg(target_os = "linux")]
impl SyslogSink {
    pub fn new() -> Result<SyslogSink> {
        let socket = std::os::unix::net::UnixDatagram::unbound()?;
        socket.connect("/dev/log")?;
        Ok(SyslogSink { socket })
    }
}

#[cfg(target_os = "linux")]
impl Sink for SyslogSink {
    fn emit(&self, content: &[u8]) -> Result<()> {
        if ends_with_newline(content) {
            self.socket.send(content)?;
        } else {
            let mut datagram = Vec::with_capacity(content.len() + 1);
            datagram.extend_from_slice(content);
            datagram.push(b'\n');
            self.socket.send(&datagram)?;
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       struct NetworkSink                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Forward records over a persistent TCP connection to a log-sewer server.
///
/// The connection is made lazily, on the first record (or the first record after a failure).
/// Delivery is at-most-once, fire-and-forget: if a send fails the connection is dropped and
/// the *next* dispatch reconnects; the failed record is not buffered or retried, so log lines
/// are lost on transient network trouble. Callers who need better than that should collect
/// from a local [`FileSink`] instead.
///
/// The lock guarding the handle is held only to clone, install or clear the [`Arc`]; both
/// `connect` (which can stall for the OS connect timeout on a hung peer) and the send itself
/// run with the lock released, so a stalled call stalls only its own thread. Two threads
/// racing to reconnect may both succeed; the loser's fresh socket is dropped (closed), never
/// leaked -- the C library this replaces kept the socket in an unguarded global and leaked
/// the loser's handle in that race.
pub struct NetworkSink {
    addr: String,
    conn: Mutex<Option<Arc<TcpStream>>>,
}

impl NetworkSink {
    /// Create a sink targeting `addr` (`host:port`). No I/O happens until the first record.
    pub fn new<A: Into<String>>(addr: A) -> NetworkSink {
        NetworkSink {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    fn current(&self) -> Option<Arc<TcpStream>> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Connect (no lock held) & install the fresh handle. If another thread won the race in
    /// the meantime, use its connection & drop ours, closing the redundant socket.
    fn reconnect(&self) -> Result<Arc<TcpStream>> {
        let fresh = Arc::new(
            TcpStream::connect(&self.addr).map_err(|err| Error::Transport {
                source: Box::new(err),
                back: Backtrace::new(),
            })?,
        );
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        match &*guard {
            Some(winner) => Ok(winner.clone()),
            None => {
                *guard = Some(fresh.clone());
                Ok(fresh)
            }
        }
    }

    /// Clear the stored handle iff it is still `stream`; a failure on an old connection must
    /// not tear down a newer one some other thread already established.
    fn invalidate(&self, stream: &Arc<TcpStream>) {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(&*guard, Some(current) if Arc::ptr_eq(current, stream)) {
            *guard = None;
        }
    }

    fn send(&self, mut stream: &TcpStream, content: &[u8]) -> std::io::Result<()> {
        stream.write_all(content)?;
        if !ends_with_newline(content) {
            stream.write_all(b"\n")?;
        }
        stream.flush()
    }
}

impl Sink for NetworkSink {
    fn emit(&self, content: &[u8]) -> Result<()> {
        let stream = match self.current() {
            Some(stream) => stream,
            None => self.reconnect()?,
        };
        if let Err(err) = self.send(&stream, content) {
            self.invalidate(&stream);
            return Err(Error::Transport {
                source: Box::new(err),
                back: Backtrace::new(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    /// Capture everything emitted, so tests can inspect the fan-out.
    struct CaptureSink {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl Sink for CaptureSink {
        fn emit(&self, content: &[u8]) -> Result<()> {
            let mut buf = self.buf.lock().unwrap();
            buf.extend_from_slice(content);
            if !ends_with_newline(content) {
                buf.push(b'\n');
            }
            Ok(())
        }
    }

    #[test]
    fn test_dispatch_order_and_duplicates() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sinks = SinkSet::new();
        sinks.register(Box::new(CaptureSink { buf: buf.clone() }));
        // registering twice is accepted behavior: the record is delivered twice
        sinks.register(Box::new(CaptureSink { buf: buf.clone() }));
        assert_eq!(sinks.len(), 2);

        sinks.dispatch(b"once");
        assert_eq!(&*buf.lock().unwrap(), b"once\nonce\n");
    }

    #[test]
    fn test_file_sink_newline_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");

        let sink = FileSink::new(&path).unwrap();
        sink.emit(b"with newline\n").unwrap();
        sink.emit(b"without").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "with newline\nwithout\n");
    }

    #[test]
    fn test_network_sink_lazy_at_most_once_reconnect() {
        use std::io::Read;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        // No connection is made at construction time...
        let sink = NetworkSink::new(addr.to_string());
        assert!(sink.conn.lock().unwrap().is_none());

        // ...only on the first record.
        sink.emit(b"hello\n").unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        let mut got = [0u8; 6];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"hello\n");

        // Leave a record unread in the peer's receive buffer, then close: the pending data
        // makes the peer reset the connection instead of lingering in TIME_WAIT, so the
        // port can be re-bound below.
        sink.emit(b"stranded\n").unwrap();
        drop(peer);
        drop(listener);

        // The failed record is dropped & the handle invalidated...
        while sink.emit(b"lost").is_ok() {
            // The first write after a peer close may land in the socket buffer; keep
            // emitting until the failure surfaces.
        }
        assert!(sink.conn.lock().unwrap().is_none());

        // ...and the very next dispatch after the server returns reconnects & delivers.
        let listener = TcpListener::bind(addr).unwrap();
        sink.emit(b"back\n").unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        let mut got = [0u8; 5];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"back\n");
    }

    #[test]
    fn test_network_sink_concurrent_senders() {
        use std::io::Read;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let sink = Arc::new(NetworkSink::new(addr.to_string()));
        sink.emit(b"prime\n").unwrap();

        // Several threads sending at once must all get through; the handle lock is only
        // held to clone the Arc, never across a send.
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        sink.emit(b"0123456789").unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        drop(sink);

        // 6 primer bytes + 4 threads x 25 records x (10 bytes + appended newline)
        let (mut peer, _) = listener.accept().unwrap();
        let mut got = Vec::new();
        peer.read_to_end(&mut got).unwrap();
        assert_eq!(got.len(), 6 + 4 * 25 * 11);
    }
}
