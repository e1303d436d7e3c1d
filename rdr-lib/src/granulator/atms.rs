use std::sync::Arc;

use tracing::trace;

use super::{Accumulator, Granulator};
use crate::{
    catalog::{InstrumentStream, ATMS_HEALTH_APID, ATMS_SCIENCE_APID},
    clock::MissionClock,
    error::{Error, Result},
    granule::GranuleRecord,
    packet::{Packet, PacketExt, TIMECODE_LEN},
    pool::PacketPool,
};

/// Offset into the science packet payload of the byte carrying the scan start flag.
const SCAN_START_OFFSET: usize = 14;
const SCAN_START_MASK: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// No scan start seen yet
    Begin,
    /// The last packet was a scan start
    ScanStart,
    MidScan,
    /// Group is full, waiting for flush
    Complete,
}

pub(crate) fn is_scan_start(packet: &Packet) -> bool {
    packet.apid() == ATMS_SCIENCE_APID
        && packet
            .payload()
            .get(SCAN_START_OFFSET)
            .is_some_and(|b| b & SCAN_START_MASK != 0)
}

/// Groups ATMS packets into scan groups.
///
/// The group counter does not start until the first health and status packet arrives
/// within a scan, so the first group may span more scans than configured.
#[derive(Debug, Clone)]
pub struct AtmsScanGranulator {
    acc: Accumulator,
    state: ScanState,
    counter: Option<u32>,
    scans_per_group: u32,
    runt: bool,
}

impl AtmsScanGranulator {
    pub(crate) fn new(
        stream: &'static InstrumentStream,
        clock: Arc<MissionClock>,
        pool: Arc<PacketPool>,
        scans_per_group: u32,
        runt: bool,
    ) -> Self {
        AtmsScanGranulator {
            acc: Accumulator::new(stream, clock, pool, 0),
            state: ScanState::Begin,
            counter: None,
            scans_per_group,
            runt,
        }
    }

    #[must_use]
    pub fn state(&self) -> ScanState {
        self.state
    }

    fn observe_health(&mut self, packet: &Packet) {
        if packet.apid() == ATMS_HEALTH_APID && self.counter.is_none() {
            trace!("scan group counter started");
            self.counter = Some(1);
        }
    }
}

impl Granulator for AtmsScanGranulator {
    fn not_full(&mut self, packet: &Packet) -> Result<bool> {
        self.acc.stamp(packet);
        let scan_start = is_scan_start(packet);

        match (self.state, scan_start) {
            (ScanState::Complete, true) => Err(Error::protocol(
                self.acc.name(),
                "scan start received for a complete scan group",
            )),
            (ScanState::Complete, false) => Ok(false),
            (ScanState::ScanStart, true) => Err(Error::protocol(
                self.acc.name(),
                "scan start received immediately after a scan start",
            )),
            (ScanState::Begin, true) => {
                if self.runt && !self.acc.record().is_empty() {
                    self.state = ScanState::Complete;
                    Ok(false)
                } else {
                    self.state = ScanState::ScanStart;
                    Ok(true)
                }
            }
            (ScanState::Begin, false) => Ok(true),
            (ScanState::ScanStart | ScanState::MidScan, false) => {
                self.state = ScanState::MidScan;
                self.observe_health(packet);
                Ok(true)
            }
            (ScanState::MidScan, true) => {
                if let Some(count) = self.counter {
                    let count = count + 1;
                    self.counter = Some(count);
                    if count >= self.scans_per_group {
                        self.state = ScanState::Complete;
                        return Ok(false);
                    }
                }
                self.state = ScanState::ScanStart;
                Ok(true)
            }
        }
    }

    fn put(&mut self, packet: &Packet) -> Result<()> {
        if self.state == ScanState::Complete {
            return Err(Error::protocol(
                self.acc.name(),
                "packet added to a complete scan group",
            ));
        }
        self.acc.push(packet);
        Ok(())
    }

    fn flush(&mut self) -> Option<GranuleRecord> {
        if self.state == ScanState::Complete {
            // the packet that completed the group is the next group's scan start
            self.state = ScanState::ScanStart;
            self.counter = self.counter.map(|_| 0);
        }
        self.acc.take()
    }

    fn reset(&mut self) {
        self.acc.reset();
        self.state = ScanState::Begin;
        self.counter = None;
    }

    fn record(&self) -> &GranuleRecord {
        self.acc.record()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::super::testing::*;
    use super::*;
    use crate::catalog::catalog;

    fn granulator(runt: bool) -> AtmsScanGranulator {
        AtmsScanGranulator::new(catalog().stream("RATMS").unwrap(), clock(), pool(), 3, runt)
    }

    fn science(seq: u16, start: bool) -> Packet {
        let mut user = [0u8; 10];
        if start {
            user[SCAN_START_OFFSET - TIMECODE_LEN] = SCAN_START_MASK;
        }
        timed(ATMS_SCIENCE_APID, seq, T2020 + i64::from(seq) * 1000, &user)
    }

    fn health(seq: u16) -> Packet {
        timed(ATMS_HEALTH_APID, seq, T2020 + i64::from(seq) * 1000, &[0u8; 10])
    }

    /// Feed packets honoring the granulator contract, returning the sizes of complete groups
    /// and the index of each packet that completed a group.
    fn feed(g: &mut AtmsScanGranulator, packets: &[Packet]) -> (Vec<usize>, Vec<usize>) {
        let mut sizes = Vec::default();
        let mut completed_at = Vec::default();
        for (idx, pkt) in packets.iter().enumerate() {
            if !g.not_full(pkt).unwrap() {
                assert_eq!(g.state(), ScanState::Complete);
                completed_at.push(idx);
                sizes.push(g.flush().unwrap().len());
            }
            g.put(pkt).unwrap();
        }
        (sizes, completed_at)
    }

    #[test]
    fn test_scan_start_flag() {
        assert!(is_scan_start(&science(1, true)));
        assert!(!is_scan_start(&science(1, false)));
        assert!(!is_scan_start(&health(1)));
    }

    #[test]
    fn test_runt_first_granule() {
        let mut g = granulator(true);
        let packets = vec![science(1, false), science(2, false), science(3, true)];
        let (sizes, at) = feed(&mut g, &packets);
        assert_eq!(sizes, vec![2]);
        assert_eq!(at, vec![2]);
        assert_eq!(g.state(), ScanState::ScanStart);
        assert_eq!(g.record().len(), 1);
    }

    #[test]
    fn test_no_runt_keeps_leading_packets() {
        let mut g = granulator(false);
        let packets = vec![science(1, false), science(2, true), science(3, false)];
        let (sizes, _) = feed(&mut g, &packets);
        assert!(sizes.is_empty());
        assert_eq!(g.record().len(), 3);
    }

    #[test]
    fn test_consecutive_scan_starts() {
        let mut g = granulator(true);
        assert!(g.not_full(&science(1, true)).unwrap());
        g.put(&science(1, true)).unwrap();
        let err = g.not_full(&science(2, true)).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));

        g.reset();
        assert_eq!(g.state(), ScanState::Begin);
        assert!(g.record().is_empty());
    }

    #[test]
    fn test_put_when_complete() {
        let mut g = granulator(true);
        g.put(&science(1, false)).unwrap();
        assert!(!g.not_full(&science(2, true)).unwrap());
        assert!(matches!(
            g.put(&science(2, true)),
            Err(Error::ProtocolViolation { .. })
        ));
        assert!(matches!(
            g.not_full(&science(3, true)),
            Err(Error::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_groups_without_health_never_complete() {
        let mut g = granulator(false);
        let mut packets = Vec::default();
        for scan in 0..10u16 {
            packets.push(science(scan * 2, true));
            packets.push(science(scan * 2 + 1, false));
        }
        let (sizes, _) = feed(&mut g, &packets);
        assert!(sizes.is_empty());
    }

    #[test_case(0; "no mid scan packets")]
    #[test_case(1; "one mid scan packet")]
    #[test_case(7; "several mid scan packets")]
    fn test_health_in_every_scan(n: usize) {
        let mut seq = 0u16;
        let mut next = |start: bool| {
            seq += 1;
            science(seq, start)
        };
        let mut packets = vec![next(true), health(100)];
        packets.extend((0..n).map(|_| next(false)));
        packets.push(next(true));
        packets.push(health(101));
        packets.extend((0..n).map(|_| next(false)));
        packets.push(next(true));
        let last = packets.len() - 1;

        let mut g = granulator(true);
        let (sizes, at) = feed(&mut g, &packets);
        assert_eq!(at, vec![last]);
        assert_eq!(sizes, vec![last]);
        assert_eq!(g.state(), ScanState::ScanStart);
        assert_eq!(g.record().len(), 1);
    }

    proptest! {
        #[test]
        fn completes_on_third_scan_start(n1 in 0usize..20, n2 in 1usize..20, n3 in 0usize..20) {
            let mut seq = 0u16;
            let mut next = |start: bool| { seq += 1; science(seq, start) };

            let mut packets = vec![next(true), next(false)];
            packets.push(health(100));
            packets.extend((0..n1).map(|_| next(false)));
            packets.push(next(true));
            packets.extend((0..n2).map(|_| next(false)));
            packets.push(next(true));
            packets.push(next(false));
            packets.extend((0..n3).map(|_| next(false)));
            packets.push(next(true));
            let last = packets.len() - 1;
            let third_start = last - n3 - 2;

            let mut g = granulator(true);
            let (sizes, at) = feed(&mut g, &packets);
            prop_assert_eq!(at, vec![third_start]);
            prop_assert_eq!(sizes, vec![third_start]);
        }
    }
}
