use crate::error::Error;
use super::util;

/// Tag reserved for the collective operations.
///
pub const COLLECTIVE_TAG: u64 = u64::MAX;

/// A pending point-to-point operation, returned by `send_begin` and
/// `recv_begin` and completed by `wait` or the matching `*_end` call.
///
#[derive(Debug)]
pub struct Request {
    peer: usize,
    tag: u64,
    kind: RequestKind,
}

#[derive(Debug)]
enum RequestKind {
    Send,
    Recv(Option<Vec<u8>>),
}

impl Request {
    pub fn peer(&self) -> usize {
        self.peer
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Whether the operation has completed; sends complete when posted.
    pub fn is_complete(&self) -> bool {
        match &self.kind {
            RequestKind::Send => true,
            RequestKind::Recv(data) => data.is_some(),
        }
    }
}

/// Interface for a group of execution units that exchange tagged byte
/// messages. Units are numbered `0 .. size()`. Messages between a given pair
/// of units with a given tag arrive in the order they were sent; messages
/// with different tags may be received in any order. The underlying
/// transport can be in-process channels or TCP.
///
pub trait Transport {
    /// Must be implemented to return the rank of this unit.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of units in the group.
    fn size(&self) -> usize;

    /// Must be implemented to hand a message to the transport. This method
    /// must return immediately; it is not allowed to block until a matching
    /// receive is posted.
    fn post(&self, peer: usize, tag: u64, message: Vec<u8>) -> Result<(), Error>;

    /// Must be implemented to return the next message from `peer` with the
    /// given tag, blocking until it arrives. Messages with other tags that
    /// arrive in the meantime are kept for later.
    fn take(&self, peer: usize, tag: u64) -> Result<Vec<u8>, Error>;

    /// Start sending a buffer. Ownership of the buffer moves to the
    /// transport.
    fn send_begin(&self, peer: usize, tag: u64, buffer: Vec<u8>) -> Result<Request, Error> {
        self.post(peer, tag, buffer)?;
        Ok(Request { peer, tag, kind: RequestKind::Send })
    }

    /// Start receiving a message.
    fn recv_begin(&self, peer: usize, tag: u64) -> Request {
        Request { peer, tag, kind: RequestKind::Recv(None) }
    }

    /// Block until a request completes.
    fn wait(&self, request: &mut Request) -> Result<(), Error> {
        if let RequestKind::Recv(data @ None) = &mut request.kind {
            *data = Some(self.take(request.peer, request.tag)?);
        }
        Ok(())
    }

    fn send_end(&self, mut request: Request) -> Result<(), Error> {
        self.wait(&mut request)
    }

    /// Complete a receive and return the message.
    fn recv_end(&self, mut request: Request) -> Result<Vec<u8>, Error> {
        self.wait(&mut request)?;
        match request.kind {
            RequestKind::Recv(Some(data)) => Ok(data),
            _ => Err(Error::State(format!("request to {} with tag {} is not a receive", request.peer, request.tag))),
        }
    }

    /// Send a message, completing at once.
    fn send(&self, peer: usize, tag: u64, buffer: Vec<u8>) -> Result<(), Error> {
        let request = self.send_begin(peer, tag, buffer)?;
        self.send_end(request)
    }

    /// Receive a message, blocking until it arrives.
    fn recv(&self, peer: usize, tag: u64) -> Result<Vec<u8>, Error> {
        self.recv_end(self.recv_begin(peer, tag))
    }

    /// Implements a binomial tree broadcast from rank 0. The message buffer
    /// must be `Some` on rank 0, and it is ignored elsewhere.
    ///
    fn broadcast(&self, value: Option<Vec<u8>>) -> Result<Vec<u8>, Error> {
        let r = self.rank();
        let p = self.size();

        let value = match (r, value) {
            (0, Some(value)) => value,
            (0, None) => return Err(Error::State("broadcast root has no value".to_string())),
            _ => self.take(r - util::lowbit(r), COLLECTIVE_TAG)?,
        };
        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 && r + one < p {
                self.post(r + one, COLLECTIVE_TAG, value.clone())?
            }
        }
        Ok(value)
    }

    /// Implements a binomial tree reduce to rank 0. All ranks return `None`
    /// except for the root.
    ///
    fn reduce<F>(&self, f: F, mut value: Vec<u8>) -> Result<Option<Vec<u8>>, Error>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        let r = self.rank();
        let p = self.size();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.take(r + one, COLLECTIVE_TAG)?)
                }
            } else {
                self.post(r - one, COLLECTIVE_TAG, value)?;
                return Ok(None);
            }
        }
        Ok(Some(value))
    }

    /// Implements an all-reduce (symmetric fold) operation over a commutative
    /// binary operator.
    ///
    fn all_reduce<F>(&self, f: F, value: Vec<u8>) -> Result<Vec<u8>, Error>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        let reduced = self.reduce(f, value)?;
        self.broadcast(reduced)
    }

    /// Logical OR of a flag over all units.
    ///
    fn all_reduce_or(&self, flag: bool) -> Result<bool, Error> {
        let result = self.all_reduce(|a, b| vec![a[0] | b[0]], vec![flag as u8])?;
        Ok(result.first().map_or(false, |&x| x != 0))
    }
}
