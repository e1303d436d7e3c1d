use std::mem;

use tracing::{debug, info};

use crate::{
    catalog::catalog,
    collector::{Collector, CollectorContext, Disposition, FileSummary},
    config::RdrSpec,
    error::{Error, Result},
    packet::{Packet, PacketExt},
    store::ObjectStore,
};

enum State<S: ObjectStore> {
    /// No packets yet
    Idle,
    Active(Box<Collector<S>>),
    /// `current` has rejected at least one stream, `next` is receiving it
    RollingOver {
        current: Box<Collector<S>>,
        next: Box<Collector<S>>,
    },
    Closed,
}

/// Drives packets through a sequence of RDR files.
///
/// A packet rejected by the active file opens a successor, handed the diary state the
/// successor needs. Diary packets feed both files while rolling over, and the predecessor
/// is closed once all its science streams are rejected.
pub struct RdrBuilder<S, F>
where
    S: ObjectStore,
    F: FnMut() -> Result<S>,
{
    ctx: CollectorContext,
    rdrs: Vec<RdrSpec>,
    open_store: F,
    state: State<S>,
    files: usize,
}

impl<S, F> RdrBuilder<S, F>
where
    S: ObjectStore,
    F: FnMut() -> Result<S>,
{
    /// Create a builder for the products in `rdrs`, calling `open_store` for each new file.
    pub fn new(ctx: CollectorContext, rdrs: &[RdrSpec], open_store: F) -> Self {
        RdrBuilder {
            ctx,
            rdrs: rdrs.to_vec(),
            open_store,
            state: State::Idle,
            files: 0,
        }
    }

    /// Number of files opened so far.
    #[must_use]
    pub fn files(&self) -> usize {
        self.files
    }

    #[must_use]
    pub fn is_rolling_over(&self) -> bool {
        matches!(self.state, State::RollingOver { .. })
    }

    fn open(&mut self, predecessor: Option<&Collector<S>>) -> Result<Box<Collector<S>>> {
        let store = (self.open_store)()?;
        let handoff = predecessor.map(Collector::handoff);
        let collector = Collector::new(self.ctx.clone(), &self.rdrs, store, handoff)?;
        self.files += 1;
        debug!(file = self.files, "opened rdr file");
        Ok(Box::new(collector))
    }

    /// Add a packet, returning any files closed as a result.
    ///
    /// # Errors
    /// [Error::ProtocolViolation] from a granulator, or if the builder is finished. Any
    /// error writing or closing a file.
    pub fn add(&mut self, packet: &Packet) -> Result<Vec<FileSummary<S>>> {
        let state = mem::replace(&mut self.state, State::Closed);
        let mut closed = Vec::default();
        let (state, result) = self.step(state, packet, &mut closed);
        self.state = state;
        result.map(|()| closed)
    }

    /// Advance the state machine; the returned state is kept even on error.
    fn step(
        &mut self,
        state: State<S>,
        packet: &Packet,
        closed: &mut Vec<FileSummary<S>>,
    ) -> (State<S>, Result<()>) {
        match state {
            State::Closed => (
                State::Closed,
                Err(Error::protocol("RdrBuilder", "packet added after finish")),
            ),
            State::Idle => match self.open(None) {
                Ok(current) => self.step(State::Active(current), packet, closed),
                Err(err) => (State::Idle, Err(err)),
            },
            State::Active(mut current) => match current.add(packet) {
                Ok(Disposition::Rejected) => {
                    let mut next = match self.open(Some(&*current)) {
                        Ok(next) => next,
                        Err(err) => return (State::Active(current), Err(err)),
                    };
                    info!(
                        apid = packet.apid(),
                        threshold = ?current.threshold(),
                        "rolling over to a new rdr file"
                    );
                    if let Err(err) = transfer(&mut current, &mut next, packet) {
                        return (State::RollingOver { current, next }, Err(err));
                    }
                    Self::settle(current, next, closed)
                }
                Ok(_) => (State::Active(current), Ok(())),
                Err(err) => (State::Active(current), Err(err)),
            },
            State::RollingOver {
                mut current,
                mut next,
            } => {
                let is_diary = catalog()
                    .stream_of(packet.apid())
                    .is_some_and(|s| s.is_diary());
                if is_diary {
                    let result = current.add(packet).and_then(|_| next.add(packet));
                    return (State::RollingOver { current, next }, result.map(|_| ()));
                }
                match current.add(packet) {
                    Ok(Disposition::Rejected) => match transfer(&mut current, &mut next, packet) {
                        Ok(Disposition::Rejected) => {
                            // the packet is past the successor too; close the predecessor
                            // and let the successor roll over
                            debug!(apid = packet.apid(), "successor rejected packet");
                            match current.finish() {
                                Ok(summary) => closed.push(summary),
                                Err(err) => return (State::Active(next), Err(err)),
                            }
                            self.step(State::Active(next), packet, closed)
                        }
                        Ok(_) => Self::settle(current, next, closed),
                        Err(err) => (State::RollingOver { current, next }, Err(err)),
                    },
                    Ok(_) => Self::settle(current, next, closed),
                    Err(err) => (State::RollingOver { current, next }, Err(err)),
                }
            }
        }
    }

    /// Close `current` if it has nothing left to collect.
    fn settle(
        current: Box<Collector<S>>,
        next: Box<Collector<S>>,
        closed: &mut Vec<FileSummary<S>>,
    ) -> (State<S>, Result<()>) {
        if !current.all_rejected() {
            return (State::RollingOver { current, next }, Ok(()));
        }
        match current.finish() {
            Ok(summary) => {
                closed.push(summary);
                (State::Active(next), Ok(()))
            }
            Err(err) => (State::Active(next), Err(err)),
        }
    }

    /// Close all open files.
    ///
    /// # Errors
    /// Any error closing a file. Files closed before the error are lost.
    pub fn finish(&mut self) -> Result<Vec<FileSummary<S>>> {
        let mut closed = Vec::default();
        match mem::replace(&mut self.state, State::Closed) {
            State::Active(current) => closed.push(current.finish()?),
            State::RollingOver { current, next } => {
                closed.push(current.finish()?);
                closed.push(next.finish()?);
            }
            State::Idle | State::Closed => {}
        }
        self.ctx.pool.drain();
        Ok(closed)
    }
}

/// Move a packet rejected by `current` to `next`, along with the granulator it was rejected
/// by if it has not been moved already.
fn transfer<S: ObjectStore>(
    current: &mut Collector<S>,
    next: &mut Collector<S>,
    packet: &Packet,
) -> Result<Disposition> {
    let Some(stream) = catalog().stream_of(packet.apid()) else {
        return next.add(packet);
    };
    match current.release(stream) {
        Some(granulator) => {
            next.adopt(granulator, packet)?;
            Ok(Disposition::Accepted)
        }
        None => next.add(packet),
    }
}
