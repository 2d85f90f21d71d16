//! Coordinator-based termination detection.
//!
//! Rank 0 coordinates; every other rank participates. A rank enters the
//! detector only when its queue is empty, and leaves it either with new work
//! or with global termination.
//!
//! ```text
//! participant                          coordinator (rank 0)
//!   queue empty ── EMPTY ───────────►  all EMPTY? re-drain, snapshot counters
//!               ◄────────── EMPTY ───  broadcast
//!   still empty ── FINISHED ────────►  any WORKING -> broadcast WORKING, restart
//!   got work    ── WORKING ─────────►  all FINISHED, counters unchanged and
//!               ◄─────── FINISHED ───  balanced -> broadcast FINISHED
//! ```
//!
//! Every report carries the rank's cumulative particle message counters, and
//! every broadcast a round number that FINISHED answers echo. A unanimous
//! FINISHED round is accepted only if each answer belongs to the current round,
//! each rank's counters equal those of its EMPTY report in the preceding
//! unanimous round, and the global sent and received totals match. A particle
//! still in flight therefore always forces another round.

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::comm::{Communicator, SendRequest, Tag};
use crate::error::{Result, TraceError};

/// Rank state as reported to, or broadcast by, the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RankFlag {
    Working = 0,
    Empty = 1,
    Finished = 2,
}

impl RankFlag {
    fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Working),
            1 => Some(Self::Empty),
            2 => Some(Self::Finished),
            _ => None,
        }
    }
}

/// One FLAG message.
///
/// Broadcasts carry the coordinator's round; participant reports carry the
/// round of the last broadcast they saw plus their particle message counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagReport {
    pub flag: RankFlag,
    pub round: u64,
    pub sent: u64,
    pub received: u64,
}

const REPORT_BYTES: usize = 4 + 8 + 8 + 8;

impl FlagReport {
    pub fn new(flag: RankFlag, round: u64, counters: (u64, u64)) -> Self {
        Self {
            flag,
            round,
            sent: counters.0,
            received: counters.1,
        }
    }

    fn counters(&self) -> (u64, u64) {
        (self.sent, self.received)
    }

    fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(REPORT_BYTES);
        buf.extend_from_slice(&(self.flag as i32).to_le_bytes());
        buf.extend_from_slice(&self.round.to_le_bytes());
        buf.extend_from_slice(&self.sent.to_le_bytes());
        buf.extend_from_slice(&self.received.to_le_bytes());
        buf
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != REPORT_BYTES {
            return Err(TraceError::malformed(
                "flag",
                format!("expected {} bytes, got {}", REPORT_BYTES, bytes.len()),
            ));
        }
        let mut code = [0u8; 4];
        let mut round = [0u8; 8];
        let mut sent = [0u8; 8];
        let mut received = [0u8; 8];
        code.copy_from_slice(&bytes[0..4]);
        round.copy_from_slice(&bytes[4..12]);
        sent.copy_from_slice(&bytes[12..20]);
        received.copy_from_slice(&bytes[20..28]);
        let code = i32::from_le_bytes(code);
        let flag = RankFlag::from_code(code)
            .ok_or_else(|| TraceError::malformed("flag", format!("unknown flag {}", code)))?;
        Ok(Self {
            flag,
            round: u64::from_le_bytes(round),
            sent: u64::from_le_bytes(sent),
            received: u64::from_le_bytes(received),
        })
    }
}

/// What the detector needs from the rank's tracking loop.
pub trait WorkSource {
    /// Pull newly arrived particles into the local queue; returns how many
    /// were kept.
    fn poll_work(&mut self) -> Result<usize>;

    /// Cumulative `(sent, received)` particle message counters.
    fn counters(&self) -> (u64, u64);
}

/// Result of waiting for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// The local queue has particles again.
    WorkAvailable,
    /// Every rank is done; no particle will ever arrive.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for every participant to report EMPTY.
    Collecting,
    /// EMPTY broadcast; waiting for unanimous FINISHED or any WORKING.
    Confirming,
}

/// Coordinator side: tracks the last report of every participant.
#[derive(Debug)]
pub struct CoordinatorFlags {
    /// Indexed by rank; entry 0 is unused.
    states: Vec<FlagReport>,
    requests: Vec<Option<SendRequest>>,
    last_broadcast: Option<RankFlag>,
    /// Bumped on every EMPTY broadcast.
    round: u64,
    phase: Phase,
    /// Counters of the unanimous EMPTY round, own counters last.
    snapshot: Vec<(u64, u64)>,
    saw_working: bool,
    buf: Vec<u8>,
}

impl CoordinatorFlags {
    fn new(size: usize) -> Self {
        Self {
            states: vec![FlagReport::new(RankFlag::Working, 0, (0, 0)); size],
            requests: (0..size).map(|_| None).collect(),
            last_broadcast: None,
            round: 0,
            phase: Phase::Collecting,
            snapshot: Vec::new(),
            saw_working: false,
            buf: Vec::with_capacity(REPORT_BYTES),
        }
    }

    /// Send `flag` to every participant, in order after the previous one.
    async fn send_flag<C: Communicator>(&mut self, comm: &C, flag: RankFlag) -> Result<()> {
        if flag == RankFlag::Empty {
            self.round += 1;
        }
        let bytes = FlagReport::new(flag, self.round, (0, 0)).to_bytes();
        for dest in 1..comm.size() {
            if let Some(previous) = self.requests[dest].take() {
                previous.wait().await?;
            }
            self.requests[dest] = Some(comm.isend(dest, Tag::Flag, bytes.clone()));
        }
        self.last_broadcast = Some(flag);
        debug!(?flag, round = self.round, "Coordinator broadcast flag");
        Ok(())
    }

    /// Read every pending report.
    fn poll_flags<C: Communicator>(&mut self, comm: &C) -> Result<()> {
        while let Some(source) = comm.try_recv_into(Tag::Flag, &mut self.buf) {
            let report = FlagReport::from_bytes(&self.buf)?;
            let slot = self.states.get_mut(source).ok_or_else(|| {
                TraceError::malformed("flag", format!("report from unknown rank {}", source))
            })?;
            *slot = report;
            if report.flag == RankFlag::Working {
                self.saw_working = true;
            }
            trace!(source, flag = ?report.flag, "Coordinator received flag");
        }
        Ok(())
    }

    fn participants(&self) -> &[FlagReport] {
        &self.states[1..]
    }

    fn all(&self, flag: RankFlag) -> bool {
        self.participants().iter().all(|r| r.flag == flag)
    }

    fn any(&self, flag: RankFlag) -> bool {
        self.participants().iter().any(|r| r.flag == flag)
    }

    /// Every participant answered the current EMPTY broadcast with FINISHED.
    fn all_finished(&self) -> bool {
        self.participants()
            .iter()
            .all(|r| r.flag == RankFlag::Finished && r.round == self.round)
    }

    fn take_snapshot(&mut self, own: (u64, u64)) {
        self.snapshot = self
            .participants()
            .iter()
            .map(FlagReport::counters)
            .chain(std::iter::once(own))
            .collect();
    }

    /// Counters unchanged since the EMPTY round, and nothing in flight.
    fn quiescent(&self, own: (u64, u64)) -> bool {
        let current: Vec<(u64, u64)> = self
            .participants()
            .iter()
            .map(FlagReport::counters)
            .chain(std::iter::once(own))
            .collect();
        let sent: u64 = current.iter().map(|c| c.0).sum();
        let received: u64 = current.iter().map(|c| c.1).sum();
        current == self.snapshot && sent == received
    }

    async fn flush(&mut self) -> Result<()> {
        for request in self.requests.iter_mut().filter_map(Option::take) {
            request.wait().await?;
        }
        Ok(())
    }
}

/// Participant side: remembers what it last told the coordinator.
#[derive(Debug)]
pub struct ParticipantFlags {
    /// Last broadcast from the coordinator.
    last_received: FlagReport,
    last_sent: Option<FlagReport>,
    request: Option<SendRequest>,
    buf: Vec<u8>,
}

impl ParticipantFlags {
    fn new() -> Self {
        Self {
            last_received: FlagReport::new(RankFlag::Working, 0, (0, 0)),
            last_sent: None,
            request: None,
            buf: Vec::with_capacity(REPORT_BYTES),
        }
    }

    /// Report to the coordinator, in order after the previous report.
    async fn send_flag<C: Communicator>(&mut self, comm: &C, report: FlagReport) -> Result<()> {
        if let Some(previous) = self.request.take() {
            previous.wait().await?;
        }
        self.request = Some(comm.isend(0, Tag::Flag, report.to_bytes()));
        self.last_sent = Some(report);
        debug!(rank = comm.rank(), flag = ?report.flag, "Reported flag to coordinator");
        Ok(())
    }

    /// Latest coordinator broadcast.
    fn poll_flags<C: Communicator>(&mut self, comm: &C) -> Result<FlagReport> {
        while let Some(source) = comm.try_recv_into(Tag::Flag, &mut self.buf) {
            if source != 0 {
                return Err(TraceError::malformed(
                    "flag",
                    format!("participant received a flag from rank {}", source),
                ));
            }
            self.last_received = FlagReport::from_bytes(&self.buf)?;
        }
        Ok(self.last_received)
    }

    fn last_flag(&self) -> Option<RankFlag> {
        self.last_sent.map(|r| r.flag)
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(request) = self.request.take() {
            request.wait().await?;
        }
        Ok(())
    }
}

/// Role chosen once at startup from the rank index.
#[derive(Debug)]
pub enum FlagManager {
    /// Single-rank run: nothing to agree on.
    Solo,
    Coordinator(CoordinatorFlags),
    Participant(ParticipantFlags),
}

impl FlagManager {
    pub fn for_rank(rank: usize, size: usize) -> Self {
        match (rank, size) {
            (_, 1) => Self::Solo,
            (0, _) => Self::Coordinator(CoordinatorFlags::new(size)),
            _ => Self::Participant(ParticipantFlags::new()),
        }
    }
}

/// Decides, per rank, whether more work may still arrive.
pub struct TerminationDetector<C: Communicator> {
    comm: Arc<C>,
    flags: FlagManager,
    finished: bool,
}

impl<C: Communicator> std::fmt::Debug for TerminationDetector<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminationDetector")
            .field("rank", &self.comm.rank())
            .field("flags", &self.flags)
            .field("finished", &self.finished)
            .finish()
    }
}

impl<C: Communicator> TerminationDetector<C> {
    pub fn new(comm: Arc<C>) -> Self {
        let flags = FlagManager::for_rank(comm.rank(), comm.size());
        Self {
            comm,
            flags,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wait, with the local queue empty, until work arrives or every rank
    /// is done. Keeps draining inbound particles the whole time.
    pub async fn wait_for_work<W: WorkSource>(&mut self, source: &mut W) -> Result<WorkStatus> {
        if self.finished {
            return Ok(WorkStatus::Finished);
        }
        let comm = self.comm.clone();
        let status = match &mut self.flags {
            FlagManager::Solo => {
                if source.poll_work()? > 0 {
                    WorkStatus::WorkAvailable
                } else {
                    WorkStatus::Finished
                }
            }
            FlagManager::Coordinator(flags) => coordinate(comm.as_ref(), flags, source).await?,
            FlagManager::Participant(flags) => participate(comm.as_ref(), flags, source).await?,
        };
        if status == WorkStatus::Finished {
            self.finished = true;
            info!(rank = comm.rank(), "Global termination reached");
        }
        Ok(status)
    }
}

async fn coordinate<C: Communicator, W: WorkSource>(
    comm: &C,
    flags: &mut CoordinatorFlags,
    source: &mut W,
) -> Result<WorkStatus> {
    loop {
        if source.poll_work()? > 0 {
            if flags.last_broadcast == Some(RankFlag::Empty) {
                flags.send_flag(comm, RankFlag::Working).await?;
                flags.phase = Phase::Collecting;
            }
            return Ok(WorkStatus::WorkAvailable);
        }

        flags.poll_flags(comm)?;

        match flags.phase {
            Phase::Collecting => {
                if flags.all(RankFlag::Empty) {
                    // A last particle may have landed since the reports were sent.
                    if source.poll_work()? > 0 {
                        return Ok(WorkStatus::WorkAvailable);
                    }
                    flags.take_snapshot(source.counters());
                    flags.saw_working = false;
                    flags.send_flag(comm, RankFlag::Empty).await?;
                    flags.phase = Phase::Confirming;
                }
            }
            Phase::Confirming => {
                if flags.saw_working || flags.any(RankFlag::Working) {
                    flags.send_flag(comm, RankFlag::Working).await?;
                    flags.phase = Phase::Collecting;
                } else if flags.all_finished() {
                    if flags.quiescent(source.counters()) {
                        flags.send_flag(comm, RankFlag::Finished).await?;
                        flags.flush().await?;
                        return Ok(WorkStatus::Finished);
                    }
                    debug!("Unanimous FINISHED with particles in flight, restarting");
                    flags.send_flag(comm, RankFlag::Working).await?;
                    flags.phase = Phase::Collecting;
                }
            }
        }

        tokio::task::yield_now().await;
    }
}

async fn participate<C: Communicator, W: WorkSource>(
    comm: &C,
    flags: &mut ParticipantFlags,
    source: &mut W,
) -> Result<WorkStatus> {
    loop {
        if source.poll_work()? > 0 {
            if flags.last_flag() != Some(RankFlag::Working) {
                let round = flags.last_received.round;
                flags
                    .send_flag(comm, FlagReport::new(RankFlag::Working, round, source.counters()))
                    .await?;
            }
            return Ok(WorkStatus::WorkAvailable);
        }

        let broadcast = flags.poll_flags(comm)?;
        if broadcast.flag == RankFlag::Finished {
            flags.flush().await?;
            return Ok(WorkStatus::Finished);
        }

        let counters = source.counters();
        let next = match flags.last_sent {
            None => Some(RankFlag::Empty),
            Some(report) if report.flag == RankFlag::Working => Some(RankFlag::Empty),
            // Received (and discarded) particles since the last report.
            Some(report) if report.counters() != counters => Some(RankFlag::Empty),
            // Inbound was re-checked at the top of this iteration.
            Some(report) if report.flag == RankFlag::Empty && broadcast.flag == RankFlag::Empty => {
                Some(RankFlag::Finished)
            }
            // Answered a stale round; answer the current one.
            Some(report)
                if report.flag == RankFlag::Finished
                    && broadcast.flag == RankFlag::Empty
                    && report.round != broadcast.round =>
            {
                Some(RankFlag::Finished)
            }
            Some(report) if report.flag == RankFlag::Finished && broadcast.flag == RankFlag::Working => {
                Some(RankFlag::Empty)
            }
            Some(_) => None,
        };

        if let Some(flag) = next {
            flags
                .send_flag(comm, FlagReport::new(flag, broadcast.round, counters))
                .await?;
        }

        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::comm::{LocalComm, LocalFabric};

    /// Scripted work source: fixed counters and a one-shot batch of work.
    struct CountingSource {
        available: usize,
        sent: u64,
        received: u64,
    }

    impl WorkSource for CountingSource {
        fn poll_work(&mut self) -> Result<usize> {
            let got = self.available;
            self.available = 0;
            Ok(got)
        }

        fn counters(&self) -> (u64, u64) {
            (self.sent, self.received)
        }
    }

    /// Work source whose work is handed in from outside the detector.
    struct SharedSource {
        work: Arc<AtomicUsize>,
    }

    impl WorkSource for SharedSource {
        fn poll_work(&mut self) -> Result<usize> {
            Ok(self.work.swap(0, Ordering::SeqCst))
        }

        fn counters(&self) -> (u64, u64) {
            (0, 0)
        }
    }

    /// Next FLAG message waiting for `comm`.
    async fn next_flag(comm: &LocalComm) -> FlagReport {
        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if comm.try_recv_into(Tag::Flag, &mut buf).is_some() {
                    return FlagReport::from_bytes(&buf).unwrap();
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("no flag arrived")
    }

    async fn broadcast(comm: &LocalComm, flag: RankFlag, round: u64) {
        comm.isend(1, Tag::Flag, FlagReport::new(flag, round, (0, 0)).to_bytes())
            .wait()
            .await
            .unwrap();
    }

    #[test]
    fn test_flag_report_bytes() {
        let report = FlagReport::new(RankFlag::Finished, 3, (7, 9));
        let bytes = report.to_bytes();
        assert_eq!(bytes.len(), REPORT_BYTES);
        assert_eq!(FlagReport::from_bytes(&bytes).unwrap(), report);

        let mut bad = bytes.clone();
        bad[0] = 9;
        assert!(FlagReport::from_bytes(&bad).is_err());
        assert!(FlagReport::from_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn test_roles_by_rank() {
        assert!(matches!(FlagManager::for_rank(0, 1), FlagManager::Solo));
        assert!(matches!(FlagManager::for_rank(0, 4), FlagManager::Coordinator(_)));
        assert!(matches!(FlagManager::for_rank(3, 4), FlagManager::Participant(_)));
    }

    #[tokio::test]
    async fn test_single_rank_finishes_without_flags() {
        let comm = Arc::new(LocalFabric::new(1, 4).unwrap().into_comms().remove(0));
        let mut detector = TerminationDetector::new(comm.clone());
        let mut source = CountingSource {
            available: 0,
            sent: 0,
            received: 0,
        };
        assert_eq!(
            detector.wait_for_work(&mut source).await.unwrap(),
            WorkStatus::Finished
        );
        assert!(detector.is_finished());
        let mut buf = Vec::new();
        assert_eq!(comm.try_recv_into(Tag::Flag, &mut buf), None);
    }

    async fn run_idle_ranks(size: usize) -> Vec<WorkStatus> {
        let comms: Vec<Arc<LocalComm>> = LocalFabric::new(size, 4)
            .unwrap()
            .into_comms()
            .into_iter()
            .map(Arc::new)
            .collect();
        let tasks: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                tokio::spawn(async move {
                    let mut detector = TerminationDetector::new(comm);
                    let mut source = CountingSource {
                        available: 0,
                        sent: 0,
                        received: 0,
                    };
                    detector.wait_for_work(&mut source).await.unwrap()
                })
            })
            .collect();
        let mut statuses = Vec::new();
        for task in tasks {
            statuses.push(task.await.unwrap());
        }
        statuses
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_idle_ranks_reach_termination() {
        for size in [2, 3, 5] {
            let statuses = run_idle_ranks(size).await;
            assert!(statuses.iter().all(|s| *s == WorkStatus::Finished));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unbalanced_counters_block_termination() {
        // Rank 1 claims to have sent a particle nobody received: the
        // coordinator must not declare termination while it is in flight.
        let mut comms = LocalFabric::new(2, 4).unwrap().into_comms();
        let participant = Arc::new(comms.pop().unwrap());
        let coordinator = Arc::new(comms.pop().unwrap());

        let coordinator_task = tokio::spawn(async move {
            let mut detector = TerminationDetector::new(coordinator);
            let mut source = CountingSource {
                available: 0,
                sent: 0,
                received: 0,
            };
            tokio::time::timeout(
                std::time::Duration::from_millis(200),
                detector.wait_for_work(&mut source),
            )
            .await
        });
        let participant_task = tokio::spawn(async move {
            let mut detector = TerminationDetector::new(participant);
            let mut source = CountingSource {
                available: 0,
                sent: 1,
                received: 0,
            };
            tokio::time::timeout(
                std::time::Duration::from_millis(200),
                detector.wait_for_work(&mut source),
            )
            .await
        });

        assert!(coordinator_task.await.unwrap().is_err());
        assert!(participant_task.await.unwrap().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_late_work_resumes_then_terminates() {
        let mut comms = LocalFabric::new(2, 4).unwrap().into_comms();
        let participant = Arc::new(comms.pop().unwrap());
        let coordinator = Arc::new(comms.pop().unwrap());

        let coordinator_task = tokio::spawn(async move {
            let mut detector = TerminationDetector::new(coordinator);
            // The coordinator "sent" one particle and the participant will
            // receive it on its first poll.
            let mut source = CountingSource {
                available: 0,
                sent: 1,
                received: 0,
            };
            detector.wait_for_work(&mut source).await.unwrap()
        });
        let participant_task = tokio::spawn(async move {
            let mut detector = TerminationDetector::new(participant);
            let mut source = CountingSource {
                available: 1,
                sent: 0,
                received: 1,
            };
            let first = detector.wait_for_work(&mut source).await.unwrap();
            let second = detector.wait_for_work(&mut source).await.unwrap();
            (first, second)
        });

        assert_eq!(coordinator_task.await.unwrap(), WorkStatus::Finished);
        assert_eq!(
            participant_task.await.unwrap(),
            (WorkStatus::WorkAvailable, WorkStatus::Finished)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_participant_answers_each_new_round() {
        let mut comms = LocalFabric::new(2, 4).unwrap().into_comms();
        let participant = Arc::new(comms.pop().unwrap());
        let coordinator = comms.pop().unwrap();

        let participant_task = tokio::spawn(async move {
            let mut detector = TerminationDetector::new(participant);
            let mut source = CountingSource {
                available: 0,
                sent: 0,
                received: 0,
            };
            detector.wait_for_work(&mut source).await.unwrap()
        });

        let report = next_flag(&coordinator).await;
        assert_eq!((report.flag, report.round), (RankFlag::Empty, 0));

        broadcast(&coordinator, RankFlag::Empty, 1).await;
        let report = next_flag(&coordinator).await;
        assert_eq!((report.flag, report.round), (RankFlag::Finished, 1));

        // Round 1 was abandoned; the old FINISHED must not carry over.
        broadcast(&coordinator, RankFlag::Empty, 2).await;
        let report = next_flag(&coordinator).await;
        assert_eq!((report.flag, report.round), (RankFlag::Finished, 2));

        broadcast(&coordinator, RankFlag::Finished, 2).await;
        assert_eq!(participant_task.await.unwrap(), WorkStatus::Finished);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_coordinator_work_while_confirming_broadcasts_working() {
        let mut comms = LocalFabric::new(2, 4).unwrap().into_comms();
        let participant = comms.pop().unwrap();
        let coordinator = Arc::new(comms.pop().unwrap());
        let work = Arc::new(AtomicUsize::new(0));

        let coordinator_task = tokio::spawn({
            let work = work.clone();
            async move {
                let mut detector = TerminationDetector::new(coordinator);
                let mut source = SharedSource { work };
                detector.wait_for_work(&mut source).await.unwrap()
            }
        });

        participant
            .isend(0, Tag::Flag, FlagReport::new(RankFlag::Empty, 0, (0, 0)).to_bytes())
            .wait()
            .await
            .unwrap();
        let broadcast = next_flag(&participant).await;
        assert_eq!((broadcast.flag, broadcast.round), (RankFlag::Empty, 1));

        // A particle lands on the coordinator before anyone answers.
        work.store(1, Ordering::SeqCst);
        assert_eq!(coordinator_task.await.unwrap(), WorkStatus::WorkAvailable);

        let broadcast = next_flag(&participant).await;
        assert_eq!(broadcast.flag, RankFlag::Working);
    }
}
