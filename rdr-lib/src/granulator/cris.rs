use std::sync::Arc;

use tracing::debug;

use super::{Accumulator, Granulator};
use crate::{
    catalog::{InstrumentStream, CRIS_EIGHT_SEC_APID},
    clock::MissionClock,
    error::{Error, Result},
    granule::GranuleRecord,
    packet::{Packet, PacketExt},
    pool::PacketPool,
};

/// Groups CrIS packets by counting 8-second science packets, one per scan.
///
/// Packets before the first 8-second packet make up a runt granule of their own.
#[derive(Debug, Clone)]
pub struct CrisScanGranulator {
    acc: Accumulator,
    scans_per_granule: u32,
    locked: bool,
    scans: u32,
    full: bool,
}

impl CrisScanGranulator {
    pub(crate) fn new(
        stream: &'static InstrumentStream,
        clock: Arc<MissionClock>,
        pool: Arc<PacketPool>,
        scans_per_granule: u32,
    ) -> Self {
        CrisScanGranulator {
            acc: Accumulator::new(stream, clock, pool, 0),
            scans_per_granule,
            locked: false,
            scans: 0,
            full: false,
        }
    }

    /// Scans counted in the current granule.
    #[must_use]
    pub fn scans(&self) -> u32 {
        self.scans
    }
}

impl Granulator for CrisScanGranulator {
    fn not_full(&mut self, packet: &Packet) -> Result<bool> {
        if self.full {
            return Ok(false);
        }
        self.acc.stamp(packet);
        if packet.apid() != CRIS_EIGHT_SEC_APID {
            return Ok(true);
        }
        if !self.locked {
            self.locked = true;
            debug!("locked on first cris scan");
            if !self.acc.record().is_empty() {
                self.full = true;
                return Ok(false);
            }
            self.scans = 1;
            return Ok(true);
        }
        if self.scans >= self.scans_per_granule {
            self.full = true;
            return Ok(false);
        }
        self.scans += 1;
        Ok(true)
    }

    fn put(&mut self, packet: &Packet) -> Result<()> {
        if self.full {
            return Err(Error::protocol(
                self.acc.name(),
                "packet added to a full granule",
            ));
        }
        self.acc.push(packet);
        Ok(())
    }

    fn flush(&mut self) -> Option<GranuleRecord> {
        // the packet that filled the granule starts the next scan
        self.scans = u32::from(self.full);
        self.full = false;
        self.acc.take()
    }

    fn reset(&mut self) {
        self.acc.reset();
        self.locked = false;
        self.scans = 0;
        self.full = false;
    }

    fn record(&self) -> &GranuleRecord {
        self.acc.record()
    }
}
