//! Ownership router: migrates particles to the ranks that may own them and
//! drains particles migrated to this rank.
//!
//! Bounding boxes are all-gathered once at construction and never change, so
//! choosing destinations needs no further communication. A particle is sent
//! to every other rank whose box contains it (or to every other rank when it
//! is manually shifted); receivers keep it only if their locator agrees.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::bounds::BoundingBox;
use crate::codec::WireCodec;
use crate::comm::{Communicator, SendRequest, Tag};
use crate::error::Result;
use crate::model::Integrator;
use crate::particle::ParticleRecord;

pub struct Router<C: Communicator> {
    comm: Arc<C>,
    codec: WireCodec,
    boxes: Vec<BoundingBox>,
    /// Outstanding non-blocking sends.
    pending: Vec<SendRequest>,
    recv_buf: Vec<u8>,
    /// Particle messages issued, one per destination.
    sent: u64,
    /// Particle messages taken from the mailbox, kept or not.
    received: u64,
}

impl<C: Communicator> std::fmt::Debug for Router<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("rank", &self.comm.rank())
            .field("stride", &self.codec.stride())
            .field("pending", &self.pending.len())
            .field("sent", &self.sent)
            .field("received", &self.received)
            .finish()
    }
}

impl<C: Communicator> Router<C> {
    /// Exchange bounding boxes with every rank. Collective.
    pub async fn new(comm: Arc<C>, codec: WireCodec, local_bounds: BoundingBox) -> Result<Self> {
        let boxes = comm
            .all_gather(local_bounds.to_bytes())
            .await?
            .iter()
            .map(|bytes| BoundingBox::from_bytes(bytes))
            .collect::<Result<Vec<_>>>()?;
        debug!(rank = comm.rank(), ranks = boxes.len(), "Gathered rank bounding boxes");

        Ok(Self {
            recv_buf: Vec::with_capacity(codec.stride()),
            comm,
            codec,
            boxes,
            pending: Vec::new(),
            sent: 0,
            received: 0,
        })
    }

    /// Ranks other than this one that should be offered `particle`.
    pub fn destinations(&self, particle: &ParticleRecord) -> Vec<usize> {
        let me = self.comm.rank();
        let position = particle.position();
        self.boxes
            .iter()
            .enumerate()
            .filter(|&(rank, bounds)| {
                rank != me && (particle.manual_shift || bounds.contains(position))
            })
            .map(|(rank, _)| rank)
            .collect()
    }

    /// Migrate `particle` away from this rank.
    ///
    /// Takes ownership: once encoded, the local copy is gone. Returns the
    /// number of ranks it was offered to; zero means it left the global
    /// domain.
    pub fn route(&mut self, particle: ParticleRecord) -> Result<usize> {
        let destinations = self.destinations(&particle);
        if destinations.is_empty() {
            trace!(particle_id = particle.id, "No rank owns particle position");
            return Ok(0);
        }

        let bytes = self.codec.encode(&particle)?;
        drop(particle);

        for &dest in &destinations {
            self.clean_pending()?;
            self.pending
                .push(self.comm.isend(dest, Tag::Particle, bytes.clone()));
            self.sent += 1;
        }

        debug!(
            rank = self.comm.rank(),
            destinations = ?destinations,
            pending = self.pending.len(),
            "Particle migrated"
        );
        Ok(destinations.len())
    }

    /// Receive every particle currently waiting in the mailbox.
    ///
    /// Manually shifted particles get the model's correction applied once and
    /// the flag cleared. Containment is left to the caller.
    pub fn drain<I: Integrator + ?Sized>(&mut self, model: &I) -> Result<Vec<ParticleRecord>> {
        let mut received = Vec::new();
        while let Some(source) = self.comm.try_recv_into(Tag::Particle, &mut self.recv_buf) {
            self.received += 1;
            let mut particle = self.codec.decode(&self.recv_buf)?;
            if particle.manual_shift {
                model.manual_shift(&mut particle);
                particle.manual_shift = false;
            }
            trace!(rank = self.comm.rank(), source, particle_id = particle.id, "Particle received");
            received.push(particle);
        }
        Ok(received)
    }

    /// Drop handles of sends that have completed. Returns how many remain.
    ///
    /// A failed send is reported here; handles whose result is not yet
    /// observable stay pending.
    pub fn clean_pending(&mut self) -> Result<usize> {
        let mut still_pending = Vec::with_capacity(self.pending.len());
        for mut request in self.pending.drain(..) {
            if !request.is_complete() {
                still_pending.push(request);
                continue;
            }
            match request.try_result() {
                Some(result) => result?,
                None => still_pending.push(request),
            }
        }
        self.pending = still_pending;
        Ok(self.pending.len())
    }

    pub fn pending_sends(&self) -> usize {
        self.pending.len()
    }

    /// Cumulative particle messages sent.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Cumulative particle messages received.
    pub fn received(&self) -> u64 {
        self.received
    }
}
