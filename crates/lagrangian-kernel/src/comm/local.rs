//! In-process rank fabric: one tokio task per rank.
//!
//! Particle mailboxes are bounded so a slow rank applies backpressure to the
//! spawned send tasks, never to the sender's tracking loop. Flag and schema
//! mailboxes are unbounded; control traffic is small and must never stall.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{mpsc, Barrier};
use tracing::trace;

use super::{Communicator, SendRequest, Tag};
use crate::error::{Result, TraceError};

#[derive(Debug)]
struct Envelope {
    source: usize,
    payload: Vec<u8>,
}

/// Sending side of one rank's mailboxes.
#[derive(Debug, Clone)]
struct Mailbox {
    particles: mpsc::Sender<Envelope>,
    flags: mpsc::UnboundedSender<Envelope>,
    schema: mpsc::UnboundedSender<Envelope>,
}

/// Receiving side, owned by the rank.
#[derive(Debug)]
struct Inbox {
    particles: Mutex<mpsc::Receiver<Envelope>>,
    flags: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    schema: Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    mailboxes: Vec<Mailbox>,
    barrier: Barrier,
    /// All-gather contributions keyed by collective sequence number.
    slots: DashMap<u64, Vec<Option<Vec<u8>>>>,
}

/// Factory for a set of connected [`LocalComm`]s.
pub struct LocalFabric {
    shared: Arc<Shared>,
    inboxes: Vec<Inbox>,
}

impl LocalFabric {
    /// Connect `size` ranks. `particle_capacity` bounds each particle mailbox.
    pub fn new(size: usize, particle_capacity: usize) -> Result<Self> {
        if size == 0 {
            return Err(TraceError::InvalidConfig(
                "a fabric needs at least one rank".to_string(),
            ));
        }
        if particle_capacity == 0 {
            return Err(TraceError::InvalidConfig(
                "particle mailbox capacity must be positive".to_string(),
            ));
        }

        let mut mailboxes = Vec::with_capacity(size);
        let mut inboxes = Vec::with_capacity(size);
        for _ in 0..size {
            let (particle_tx, particle_rx) = mpsc::channel(particle_capacity);
            let (flag_tx, flag_rx) = mpsc::unbounded_channel();
            let (schema_tx, schema_rx) = mpsc::unbounded_channel();
            mailboxes.push(Mailbox {
                particles: particle_tx,
                flags: flag_tx,
                schema: schema_tx,
            });
            inboxes.push(Inbox {
                particles: Mutex::new(particle_rx),
                flags: Mutex::new(flag_rx),
                schema: Mutex::new(schema_rx),
            });
        }

        Ok(Self {
            shared: Arc::new(Shared {
                size,
                mailboxes,
                barrier: Barrier::new(size),
                slots: DashMap::new(),
            }),
            inboxes,
        })
    }

    /// One communicator per rank, indexed by rank.
    pub fn into_comms(self) -> Vec<LocalComm> {
        let shared = self.shared;
        self.inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalComm {
                rank,
                shared: shared.clone(),
                inbox,
                collective_seq: AtomicU64::new(0),
            })
            .collect()
    }
}

/// A rank's endpoint on a [`LocalFabric`].
#[derive(Debug)]
pub struct LocalComm {
    rank: usize,
    shared: Arc<Shared>,
    inbox: Inbox,
    collective_seq: AtomicU64,
}

fn take<T>(receiver: &Mutex<T>, recv: impl FnOnce(&mut T) -> Option<Envelope>) -> Option<Envelope> {
    let mut guard = receiver.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    recv(&mut guard)
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn isend(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> SendRequest {
        let source = self.rank;
        let envelope = Envelope { source, payload };
        let mailbox = self.shared.mailboxes.get(dest).cloned();

        let handle = tokio::spawn(async move {
            let Some(mailbox) = mailbox else {
                return Err(TraceError::PeerDisconnected(dest));
            };
            let delivered = match tag {
                Tag::Particle => mailbox.particles.send(envelope).await.is_ok(),
                Tag::Flag => mailbox.flags.send(envelope).is_ok(),
                Tag::Schema => mailbox.schema.send(envelope).is_ok(),
            };
            if delivered {
                trace!(source, dest, ?tag, "Message delivered");
                Ok(())
            } else {
                Err(TraceError::PeerDisconnected(dest))
            }
        });

        SendRequest::new(dest, handle)
    }

    fn try_recv_into(&self, tag: Tag, buf: &mut Vec<u8>) -> Option<usize> {
        let envelope = match tag {
            Tag::Particle => take(&self.inbox.particles, |rx| rx.try_recv().ok()),
            Tag::Flag => take(&self.inbox.flags, |rx| rx.try_recv().ok()),
            Tag::Schema => take(&self.inbox.schema, |rx| rx.try_recv().ok()),
        }?;
        buf.clear();
        buf.extend_from_slice(&envelope.payload);
        Some(envelope.source)
    }

    async fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait().await;
        Ok(())
    }

    async fn all_gather(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        let seq = self.collective_seq.fetch_add(1, Ordering::Relaxed);
        {
            let mut slot = self
                .shared
                .slots
                .entry(seq)
                .or_insert_with(|| vec![None; self.shared.size]);
            slot[self.rank] = Some(payload);
        }

        self.shared.barrier.wait().await;

        let gathered = match self.shared.slots.get(&seq) {
            Some(slot) => slot
                .iter()
                .enumerate()
                .map(|(rank, contribution)| {
                    contribution.clone().ok_or_else(|| TraceError::Collective {
                        op: "all_gather",
                        reason: format!("rank {} did not contribute to collective {}", rank, seq),
                    })
                })
                .collect::<Result<Vec<_>>>(),
            None => Err(TraceError::Collective {
                op: "all_gather",
                reason: format!("collective {} vanished", seq),
            }),
        };

        // Nobody may drop the slot until every rank has read it.
        if self.shared.barrier.wait().await.is_leader() {
            self.shared.slots.remove(&seq);
        }

        gathered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_point_to_point_delivery() {
        let mut comms = LocalFabric::new(2, 4).unwrap().into_comms();
        let receiver = comms.pop().unwrap();
        let sender = comms.pop().unwrap();

        sender.isend(1, Tag::Particle, vec![1, 2, 3]).wait().await.unwrap();

        let mut buf = Vec::new();
        assert_eq!(receiver.try_recv_into(Tag::Flag, &mut buf), None);
        assert_eq!(receiver.try_recv_into(Tag::Particle, &mut buf), Some(0));
        assert_eq!(buf, vec![1, 2, 3]);
        assert_eq!(receiver.try_recv_into(Tag::Particle, &mut buf), None);
    }

    #[tokio::test]
    async fn test_send_to_unknown_rank_fails() {
        let comms = LocalFabric::new(1, 4).unwrap().into_comms();
        let result = comms[0].isend(3, Tag::Flag, vec![0]).wait().await;
        assert!(matches!(result, Err(TraceError::PeerDisconnected(3))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_all_gather_orders_by_rank() {
        let comms = LocalFabric::new(3, 4).unwrap().into_comms();
        let tasks: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                tokio::spawn(async move {
                    let first = comm.all_gather(vec![comm.rank() as u8]).await.unwrap();
                    let second = comm.all_gather(vec![10 + comm.rank() as u8]).await.unwrap();
                    (first, second)
                })
            })
            .collect();

        for task in tasks {
            let (first, second) = task.await.unwrap();
            assert_eq!(first, vec![vec![0], vec![1], vec![2]]);
            assert_eq!(second, vec![vec![10], vec![11], vec![12]]);
        }
    }

    #[test]
    fn test_empty_fabric_rejected() {
        assert!(LocalFabric::new(0, 4).is_err());
        assert!(LocalFabric::new(2, 0).is_err());
    }
}
