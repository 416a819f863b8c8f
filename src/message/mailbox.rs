use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use crate::error::Error;

/// A message in flight, with the rank that sent it and its tag.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub source: usize,
    pub tag: u64,
    pub data: Vec<u8>,
}

/// Sorts incoming envelopes by `(source, tag)`, holding on to the ones
/// nobody has asked for yet. A mailbox has a single consumer.
///
pub struct Mailbox {
    incoming: Receiver<Envelope>,
    pending: Mutex<HashMap<(usize, u64), VecDeque<Vec<u8>>>>,
}

impl Mailbox {
    pub fn new(incoming: Receiver<Envelope>) -> Self {
        Self {
            incoming,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Block until a message from `source` with `tag` is available, and
    /// return it.
    pub fn take(&self, source: usize, tag: u64) -> Result<Vec<u8>, Error> {
        let key = (source, tag);

        if let Some(data) = self.pop_pending(key)? {
            return Ok(data);
        }
        loop {
            let envelope = self.incoming.recv().map_err(|_| {
                Error::Transport(format!("all senders disconnected while waiting for rank {} tag {}", source, tag))
            })?;
            if (envelope.source, envelope.tag) == key {
                return Ok(envelope.data);
            }
            self.lock()?
                .entry((envelope.source, envelope.tag))
                .or_default()
                .push_back(envelope.data);
        }
    }

    /// Number of received messages not yet taken.
    pub fn num_pending(&self) -> usize {
        self.pending.lock().map_or(0, |pending| pending.values().map(VecDeque::len).sum())
    }

    fn pop_pending(&self, key: (usize, u64)) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.lock()?.get_mut(&key).and_then(VecDeque::pop_front))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(usize, u64), VecDeque<Vec<u8>>>>, Error> {
        self.pending.lock().map_err(|_| Error::Transport("mailbox lock poisoned".to_string()))
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{Envelope, Mailbox};

    #[test]
    fn messages_are_matched_by_source_and_tag() {
        let (sink, source) = crossbeam_channel::unbounded();
        let mailbox = Mailbox::new(source);
        let envelope = |source, tag, byte| Envelope { source, tag, data: vec![byte] };

        sink.send(envelope(1, 7, 10)).unwrap();
        sink.send(envelope(2, 7, 20)).unwrap();
        sink.send(envelope(1, 7, 11)).unwrap();
        sink.send(envelope(1, 8, 30)).unwrap();

        assert_eq!(mailbox.take(1, 8).unwrap(), vec![30]);
        assert_eq!(mailbox.num_pending(), 3);
        assert_eq!(mailbox.take(1, 7).unwrap(), vec![10]);
        assert_eq!(mailbox.take(1, 7).unwrap(), vec![11]);
        assert_eq!(mailbox.take(2, 7).unwrap(), vec![20]);
        assert_eq!(mailbox.num_pending(), 0);
    }

    #[test]
    fn envelopes_survive_message_pack() {
        let envelope = Envelope { source: 3, tag: 1 << 40, data: vec![0, 255, 7] };
        let bytes = rmp_serde::to_vec(&envelope).unwrap();
        let back: Envelope = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn disconnected_mailbox_fails_instead_of_blocking() {
        let (sink, source) = crossbeam_channel::unbounded::<Envelope>();
        drop(sink);
        assert!(Mailbox::new(source).take(0, 0).is_err());
    }
}
