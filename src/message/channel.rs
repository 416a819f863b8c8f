use crossbeam_channel::Sender;
use crate::error::Error;
use super::comm::Transport;
use super::mailbox::{Envelope, Mailbox};

/// A transport between execution units living on threads of one process.
/// Each unit owns one `ChannelTransport`; messages are moved, not copied,
/// through unbounded crossbeam channels, so posting never blocks.
///
pub struct ChannelTransport {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    mailbox: Mailbox,
}

impl ChannelTransport {
    /// Create a fully connected group of `size` transports. Element `r` of
    /// the result has rank `r`; hand each one to its own thread.
    pub fn group(size: usize) -> Vec<Self> {
        let (sinks, sources): (Vec<_>, Vec<_>) = (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        sources
            .into_iter()
            .enumerate()
            .map(|(rank, source)| Self {
                rank,
                peers: sinks.clone(),
                mailbox: Mailbox::new(source),
            })
            .collect()
    }
}

impl Transport for ChannelTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn post(&self, peer: usize, tag: u64, message: Vec<u8>) -> Result<(), Error> {
        let sink = self.peers.get(peer).ok_or_else(|| {
            Error::Transport(format!("rank {} is outside a group of {}", peer, self.peers.len()))
        })?;
        sink.send(Envelope { source: self.rank, tag, data: message })
            .map_err(|_| Error::Transport(format!("rank {} has shut down", peer)))
    }

    fn take(&self, peer: usize, tag: u64) -> Result<Vec<u8>, Error> {
        self.mailbox.take(peer, tag)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::thread;
    use super::ChannelTransport;
    use crate::message::Transport;

    fn run_group<F>(size: usize, f: F) -> Vec<Vec<u8>>
    where
        F: Fn(&ChannelTransport) -> Vec<u8> + Send + Sync + Copy + 'static,
    {
        let handles: Vec<_> = ChannelTransport::group(size)
            .into_iter()
            .map(|transport| thread::spawn(move || f(&transport)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn tagged_messages_reach_their_peer() {
        let results = run_group(2, |t| {
            let other = 1 - t.rank();
            t.send(other, 5, vec![t.rank() as u8; 3]).unwrap();
            t.send(other, 6, vec![9]).unwrap();
            let mut late = t.recv(other, 6).unwrap();
            late.extend(t.recv(other, 5).unwrap());
            late
        });
        assert_eq!(results, vec![vec![9, 1, 1, 1], vec![9, 0, 0, 0]]);
    }

    #[test]
    fn requests_complete_on_wait() {
        let results = run_group(2, |t| {
            let other = 1 - t.rank();
            let recv = t.recv_begin(other, 1);
            assert!(!recv.is_complete());
            let send = t.send_begin(other, 1, vec![t.rank() as u8 + 10]).unwrap();
            t.send_end(send).unwrap();
            t.recv_end(recv).unwrap()
        });
        assert_eq!(results, vec![vec![11], vec![10]]);
    }

    #[test]
    fn all_reduce_sums_over_every_rank() {
        for size in 1..8 {
            let results = run_group(size, |t| {
                t.all_reduce(|a, b| vec![a[0] + b[0]], vec![t.rank() as u8 + 1]).unwrap()
            });
            let expected = (size * (size + 1) / 2) as u8;
            assert!(results.iter().all(|r| r == &vec![expected]), "size {}: {:?}", size, results);
        }
    }

    #[test]
    fn all_reduce_or_sees_a_single_true_flag() {
        for size in 1..6 {
            let results = run_group(size, |t| {
                let flag = t.all_reduce_or(t.rank() == t.size() - 1).unwrap();
                let none = t.all_reduce_or(false).unwrap();
                vec![flag as u8, none as u8]
            });
            assert!(results.iter().all(|r| r == &vec![1, 0]));
        }
    }

    #[test]
    fn posting_outside_the_group_fails() {
        let group = ChannelTransport::group(2);
        assert!(group[0].post(2, 0, vec![]).is_err());
    }
}
