use std::collections::HashMap;
use std::io::{self, prelude::*};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::error::Error;
use super::backoff::{ExponentialBackoff, Retry};
use super::comm::Transport;
use super::mailbox::{Envelope, Mailbox};
use super::util;

const ACK_TIMEOUT: Duration = Duration::from_millis(5000);
const RETRY_WAIT: Duration = Duration::from_millis(50);
const RETRY_MAX_WAIT: Duration = Duration::from_millis(2000);
const RETRY_ATTEMPTS: usize = 20;

type Outbox = crossbeam_channel::Sender<(usize, Vec<u8>)>;
type EnvelopeSink = crossbeam_channel::Sender<Envelope>;

/// A transport between separate processes. Every rank listens on its own
/// address; a background thread delivers outgoing messages serially over
/// one connection per peer, each message framed by its length and
/// acknowledged by the receiver with the same length. Envelopes are encoded
/// with MessagePack.
///
pub struct TcpTransport {
    rank: usize,
    size: usize,
    outbox: Option<Outbox>,
    mailbox: Mailbox,
    send_thread: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl TcpTransport {
    /// Listen on `peers[rank]` and connect lazily to the other peers.
    pub fn bind(rank: usize, peers: Vec<SocketAddr>) -> Result<Self, Error> {
        let addr = *peers.get(rank).ok_or_else(|| Error::Config(format!("no address for rank {}", rank)))?;
        let listener = TcpListener::bind(addr).map_err(|e| Error::Transport(format!("cannot listen on {}: {}", addr, e)))?;
        Self::from_listener(rank, listener, peers)
    }

    /// Use an already bound listener, e.g. one bound to port 0, whose
    /// address has been put in `peers[rank]`.
    pub fn from_listener(rank: usize, listener: TcpListener, peers: Vec<SocketAddr>) -> Result<Self, Error> {
        if rank >= peers.len() {
            return Err(Error::Config(format!("rank {} is outside a group of {}", rank, peers.len())));
        }
        let failure = Arc::new(Mutex::new(None));
        let (outbox, outgoing) = crossbeam_channel::unbounded();
        let (recv_sink, recv_src) = crossbeam_channel::unbounded();

        let send_thread = Self::start_serial_sender(rank, peers.clone(), outgoing, failure.clone());
        Self::start_listener(listener, recv_sink);

        Ok(Self {
            rank,
            size: peers.len(),
            outbox: Some(outbox),
            mailbox: Mailbox::new(recv_src),
            send_thread: Some(send_thread),
            failure,
        })
    }

    fn start_serial_sender(
        rank: usize,
        peers: Vec<SocketAddr>,
        outgoing: crossbeam_channel::Receiver<(usize, Vec<u8>)>,
        failure: Arc<Mutex<Option<String>>>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut table: HashMap<usize, TcpStream> = HashMap::new();

            for (peer, message) in outgoing {
                if let Err(e) = Self::deliver(&mut table, peers[peer], peer, &message) {
                    error!("rank {} failed to send to {}: {}", rank, peers[peer], e);
                    if let Ok(mut failure) = failure.lock() {
                        failure.get_or_insert(format!("send to rank {} failed: {}", peer, e));
                    }
                }
            }
        })
    }

    /// Send one frame and wait for its acknowledgement. A cached connection
    /// that fails while the frame is written is replaced once and the frame
    /// written again. Once a frame is written it is never resent, since the
    /// peer may already have queued it.
    fn deliver(table: &mut HashMap<usize, TcpStream>, addr: SocketAddr, peer: usize, message: &[u8]) -> io::Result<()> {
        for attempt in 0..2 {
            if !table.contains_key(&peer) {
                table.insert(peer, Self::connect_with_retry(addr)?);
            }
            let stream = table.get_mut(&peer).ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no stream"))?;

            match util::write_frame(stream, message) {
                Ok(()) => break,
                Err(e) if attempt == 0 => {
                    warn!("connection to {} broke ({}); reconnecting", addr, e);
                    table.remove(&peer);
                }
                Err(e) => return Err(e),
            }
        }
        let stream = table.get_mut(&peer).ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no stream"))?;

        match util::read_usize(stream) {
            Ok(ack) if ack == message.len() => Ok(()),
            Ok(ack) => {
                table.remove(&peer);
                Err(io::Error::new(io::ErrorKind::InvalidData, format!("sent {} bytes but receiver acknowledged {}", message.len(), ack)))
            }
            Err(e) => {
                table.remove(&peer);
                Err(e)
            }
        }
    }

    fn start_listener(listener: TcpListener, recv_sink: EnvelopeSink) {
        thread::spawn(move || {
            if let Ok(addr) = listener.local_addr() {
                info!("listening on {}", addr);
            }
            for stream in listener.incoming() {
                match stream.and_then(|s| s.peer_addr().map(|remote| (s, remote))) {
                    Ok((stream, remote)) => Self::handle_connection(stream, remote, recv_sink.clone()),
                    Err(e) => error!("failed to accept a connection: {}", e),
                }
            }
        });
    }

    fn handle_connection(mut stream: TcpStream, remote: SocketAddr, recv_sink: EnvelopeSink) {
        info!("receiving connection from {}", remote);

        thread::spawn(move || match Self::serve(&mut stream, &recv_sink) {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => info!("connection from {} closed", remote),
            Err(e) => error!("connection from {} failed: {}", remote, e),
            Ok(()) => {}
        });
    }

    fn serve(stream: &mut TcpStream, recv_sink: &EnvelopeSink) -> io::Result<()> {
        loop {
            let size = util::read_usize(stream)?;
            let bytes = util::read_bytes_vec(stream, size)?;
            let envelope: Envelope = rmp_serde::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            recv_sink
                .send(envelope)
                .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))?;
            stream.write_all(&size.to_le_bytes())?;
        }
    }

    fn connect_with_retry(addr: SocketAddr) -> io::Result<TcpStream> {
        let connect = || -> io::Result<TcpStream> {
            let stream = TcpStream::connect(addr)?;
            stream.set_read_timeout(Some(ACK_TIMEOUT))?;
            stream.set_nodelay(true)?;
            Ok(stream)
        };
        ExponentialBackoff::new(RETRY_WAIT, RETRY_MAX_WAIT, 2)
            .take(RETRY_ATTEMPTS)
            .retry(connect, |e: &io::Error, delay| info!("connect to {} failed ({}); retrying in {:?}", addr, e, delay))
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::NotConnected, "no connection attempts")))
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn post(&self, peer: usize, tag: u64, message: Vec<u8>) -> Result<(), Error> {
        if peer >= self.size {
            return Err(Error::Transport(format!("rank {} is outside a group of {}", peer, self.size)));
        }
        if let Some(failure) = self.failure.lock().ok().and_then(|f| f.clone()) {
            return Err(Error::Transport(failure));
        }
        let envelope = Envelope { source: self.rank, tag, data: message };
        let bytes = rmp_serde::to_vec(&envelope).map_err(|e| Error::Transport(e.to_string()))?;

        self.outbox
            .as_ref()
            .ok_or_else(|| Error::Transport("transport is shut down".to_string()))?
            .send((peer, bytes))
            .map_err(|_| Error::Transport("send thread has exited".to_string()))
    }

    fn take(&self, peer: usize, tag: u64) -> Result<Vec<u8>, Error> {
        self.mailbox.take(peer, tag)
    }
}

impl Drop for TcpTransport {
    /// Flush every posted message before going away.
    fn drop(&mut self) {
        self.outbox.take();
        if let Some(handle) = self.send_thread.take() {
            if handle.join().is_err() {
                error!("send thread of rank {} panicked", self.rank);
            }
        }
    }
}
