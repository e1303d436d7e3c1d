//! Per-instrument packet grouping.
//!
//! Each instrument family decides granule fullness its own way. They all share the
//! [Granulator] contract: call [Granulator::not_full] exactly once for a packet, and if it
//! returns `false` call [Granulator::flush] to take the full granule before calling
//! [Granulator::put] with that same packet.
mod atms;
mod cris;
mod time;
mod viirs;

use std::{mem, sync::Arc};

use tracing::warn;

pub use atms::{AtmsScanGranulator, ScanState};
pub use cris::CrisScanGranulator;
pub use time::TimeGranulator;
pub use viirs::ViirsGranulator;

use crate::{
    catalog::{Instrument, InstrumentStream},
    clock::MissionClock,
    config::{GranulationMode, GranulationSpec},
    error::Result,
    granule::GranuleRecord,
    packet::{Apid, Packet, PacketExt},
    pool::PacketPool,
};

pub trait Granulator {
    /// Returns `false` if `packet` belongs to the next granule.
    ///
    /// # Errors
    /// [crate::Error::ProtocolViolation] if the packet is not valid for the current state.
    fn not_full(&mut self, packet: &Packet) -> Result<bool>;

    /// Add `packet` to the current granule.
    ///
    /// # Errors
    /// [crate::Error::ProtocolViolation] if the granule is full.
    fn put(&mut self, packet: &Packet) -> Result<()>;

    /// Take the current granule, if it has any packets, and begin the next.
    fn flush(&mut self) -> Option<GranuleRecord>;

    /// Discard all state.
    fn reset(&mut self);

    /// The granule currently being filled.
    fn record(&self) -> &GranuleRecord;
}

/// Packet times as seen by a granulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    /// The packet's own valid time
    pub time: Option<i64>,
    /// Time recorded for the packet; own time or inherited from the previous packet
    pub obs_time: Option<i64>,
}

/// Packet storage and timing shared by all granulators.
#[derive(Debug, Clone)]
pub(crate) struct Accumulator {
    stream: &'static InstrumentStream,
    clock: Arc<MissionClock>,
    pool: Arc<PacketPool>,
    record: GranuleRecord,
    last_obs: Option<i64>,
    increment: i64,
    staged: Option<(Apid, u16, Stamp)>,
}

impl Accumulator {
    pub(crate) fn new(
        stream: &'static InstrumentStream,
        clock: Arc<MissionClock>,
        pool: Arc<PacketPool>,
        increment: i64,
    ) -> Self {
        Accumulator {
            stream,
            clock,
            pool,
            record: GranuleRecord::new(stream),
            last_obs: None,
            increment,
            staged: None,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.stream.short_name.as_str()
    }

    pub(crate) fn instrument(&self) -> Instrument {
        self.stream.instrument
    }

    pub(crate) fn clock(&self) -> &MissionClock {
        &self.clock
    }

    pub(crate) fn record(&self) -> &GranuleRecord {
        &self.record
    }

    pub(crate) fn record_mut(&mut self) -> &mut GranuleRecord {
        &mut self.record
    }

    fn own_time(&self, packet: &Packet) -> Option<i64> {
        let timecode = packet.timecode()?;
        match self.clock.iet(timecode) {
            Ok(t) => Some(t),
            Err(err) => {
                warn!(
                    stream = self.name(),
                    apid = packet.header.apid,
                    seq = packet.header.sequence_id,
                    "excluding packet time: {err}"
                );
                None
            }
        }
    }

    /// Compute the times for `packet`, remembering them for the following `push`.
    pub(crate) fn stamp(&mut self, packet: &Packet) -> Stamp {
        let time = self.own_time(packet);
        let stamp = Stamp {
            time,
            obs_time: time.or_else(|| self.last_obs.map(|t| t + self.increment)),
        };
        self.staged = Some((packet.header.apid, packet.header.sequence_id, stamp));
        stamp
    }

    pub(crate) fn push(&mut self, packet: &Packet) {
        let stamp = match self.staged.take() {
            Some((apid, seq, stamp))
                if apid == packet.header.apid && seq == packet.header.sequence_id =>
            {
                stamp
            }
            _ => self.stamp(packet),
        };
        self.staged = None;
        let obs_time = stamp.obs_time.unwrap_or_default();
        self.record
            .push(packet, stamp.time, obs_time, self.pool.as_ref());
        if stamp.obs_time.is_some() {
            self.last_obs = stamp.obs_time;
        }
    }

    /// Take the record if it has any packets.
    pub(crate) fn take(&mut self) -> Option<GranuleRecord> {
        if self.record.is_empty() {
            return None;
        }
        Some(mem::replace(
            &mut self.record,
            GranuleRecord::new(self.stream),
        ))
    }

    pub(crate) fn reset(&mut self) {
        let record = mem::replace(&mut self.record, GranuleRecord::new(self.stream));
        record.recycle(&self.pool);
        self.last_obs = None;
        self.staged = None;
    }
}

/// The closed set of granulators, one per instrument family.
#[derive(Debug, Clone)]
pub enum InstrumentGranulator {
    AtmsScan(AtmsScanGranulator),
    AtmsTime(TimeGranulator),
    CrisScan(CrisScanGranulator),
    CrisTime(TimeGranulator),
    Viirs(ViirsGranulator),
    Omps(TimeGranulator),
    Diary(TimeGranulator),
}

macro_rules! dispatch {
    ($self:ident, $g:ident => $body:expr) => {
        match $self {
            InstrumentGranulator::AtmsScan($g) => $body,
            InstrumentGranulator::CrisScan($g) => $body,
            InstrumentGranulator::Viirs($g) => $body,
            InstrumentGranulator::AtmsTime($g)
            | InstrumentGranulator::CrisTime($g)
            | InstrumentGranulator::Omps($g)
            | InstrumentGranulator::Diary($g) => $body,
        }
    };
}

impl InstrumentGranulator {
    /// Create the granulator for `stream` configured by `spec`.
    #[must_use]
    pub fn new(
        stream: &'static InstrumentStream,
        spec: &GranulationSpec,
        clock: Arc<MissionClock>,
        pool: Arc<PacketPool>,
    ) -> Self {
        match (stream.instrument, spec.atms, spec.cris) {
            (Instrument::Atms, GranulationMode::Scan, _) => {
                InstrumentGranulator::AtmsScan(AtmsScanGranulator::new(
                    stream,
                    clock,
                    pool,
                    spec.scans_per_group,
                    spec.runt_first_granule,
                ))
            }
            (Instrument::Atms, GranulationMode::Time, _) => {
                InstrumentGranulator::AtmsTime(TimeGranulator::atms(stream, clock, pool))
            }
            (Instrument::Cris, _, GranulationMode::Scan) => InstrumentGranulator::CrisScan(
                CrisScanGranulator::new(stream, clock, pool, spec.cris_scans_per_granule),
            ),
            (Instrument::Cris, _, GranulationMode::Time) => {
                InstrumentGranulator::CrisTime(TimeGranulator::new(stream, clock, pool))
            }
            (Instrument::Viirs, ..) => {
                InstrumentGranulator::Viirs(ViirsGranulator::new(stream, clock, pool))
            }
            (Instrument::OmpsTc | Instrument::OmpsNp, ..) => InstrumentGranulator::Omps(
                TimeGranulator::omps(stream, clock, pool, spec.omps_time_increment),
            ),
            (Instrument::Spacecraft, ..) => {
                InstrumentGranulator::Diary(TimeGranulator::new(stream, clock, pool))
            }
        }
    }

    #[must_use]
    pub fn stream(&self) -> &'static InstrumentStream {
        self.record().stream()
    }
}

impl Granulator for InstrumentGranulator {
    fn not_full(&mut self, packet: &Packet) -> Result<bool> {
        dispatch!(self, g => g.not_full(packet))
    }

    fn put(&mut self, packet: &Packet) -> Result<()> {
        dispatch!(self, g => g.put(packet))
    }

    fn flush(&mut self) -> Option<GranuleRecord> {
        dispatch!(self, g => g.flush())
    }

    fn reset(&mut self) {
        dispatch!(self, g => g.reset());
    }

    fn record(&self) -> &GranuleRecord {
        dispatch!(self, g => g.record())
    }
}
