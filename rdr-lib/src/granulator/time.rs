use std::sync::Arc;

use tracing::{trace, warn};

use super::{Accumulator, Granulator};
use crate::{
    catalog::{InstrumentStream, ATMS_SCIENCE_APID},
    clock::MissionClock,
    error::{Error, Result},
    granule::GranuleRecord,
    packet::{Apid, Packet, PacketExt},
    pool::PacketPool,
};

/// Groups packets into fixed length windows by packet time.
#[derive(Debug, Clone)]
pub struct TimeGranulator {
    acc: Accumulator,
    /// Only these APIDs decide boundaries; all when empty
    boundary_apids: Vec<Apid>,
    /// Inherited times take part in boundary decisions
    inherit: bool,
    window: Option<(i64, i64)>,
    pending: Option<(i64, i64)>,
}

impl TimeGranulator {
    pub(crate) fn new(
        stream: &'static InstrumentStream,
        clock: Arc<MissionClock>,
        pool: Arc<PacketPool>,
    ) -> Self {
        TimeGranulator {
            acc: Accumulator::new(stream, clock, pool, 0),
            boundary_apids: Vec::default(),
            inherit: false,
            window: None,
            pending: None,
        }
    }

    /// ATMS windows are decided by the science packets alone.
    pub(crate) fn atms(
        stream: &'static InstrumentStream,
        clock: Arc<MissionClock>,
        pool: Arc<PacketPool>,
    ) -> Self {
        TimeGranulator {
            boundary_apids: vec![ATMS_SCIENCE_APID],
            ..Self::new(stream, clock, pool)
        }
    }

    /// OMPS packets without their own time inherit the previous time plus `increment`
    /// microseconds.
    pub(crate) fn omps(
        stream: &'static InstrumentStream,
        clock: Arc<MissionClock>,
        pool: Arc<PacketPool>,
        increment: i64,
    ) -> Self {
        TimeGranulator {
            acc: Accumulator::new(stream, clock, pool, increment),
            boundary_apids: Vec::default(),
            inherit: true,
            window: None,
            pending: None,
        }
    }

    #[must_use]
    pub fn window(&self) -> Option<(i64, i64)> {
        self.window
    }

    fn decides(&self, apid: Apid) -> bool {
        self.boundary_apids.is_empty() || self.boundary_apids.contains(&apid)
    }
}

impl Granulator for TimeGranulator {
    fn not_full(&mut self, packet: &Packet) -> Result<bool> {
        if self.pending.is_some() {
            return Ok(false);
        }
        let stamp = self.acc.stamp(packet);
        let time = if self.inherit {
            stamp.obs_time
        } else {
            stamp.time
        };
        let Some(time) = time.filter(|_| self.decides(packet.apid())) else {
            return Ok(true);
        };

        let bounds = self
            .acc
            .clock()
            .granule_boundary(self.acc.instrument(), time);
        match self.window {
            None => {
                trace!(stream = self.acc.name(), ?bounds, "opened granule window");
                self.window = Some(bounds);
                self.acc.record_mut().set_window(Some(bounds));
                Ok(true)
            }
            Some((_, end)) if time >= end => {
                self.pending = Some(bounds);
                Ok(false)
            }
            Some((start, _)) if time < start => {
                warn!(
                    stream = self.acc.name(),
                    apid = packet.apid(),
                    time,
                    start,
                    "packet before granule start; keeping in current granule"
                );
                Ok(true)
            }
            Some(_) => Ok(true),
        }
    }

    fn put(&mut self, packet: &Packet) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::protocol(
                self.acc.name(),
                "packet added to a full granule",
            ));
        }
        self.acc.push(packet);
        Ok(())
    }

    fn flush(&mut self) -> Option<GranuleRecord> {
        let rec = self.acc.take();
        if let Some(bounds) = self.pending.take() {
            self.window = Some(bounds);
            self.acc.record_mut().set_window(Some(bounds));
        }
        rec
    }

    fn reset(&mut self) {
        self.acc.reset();
        self.window = None;
        self.pending = None;
    }

    fn record(&self) -> &GranuleRecord {
        self.acc.record()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::{catalog::catalog, clock::granule_boundary};

    const DIARY_LEN: i64 = 20_000_000;

    fn diary() -> TimeGranulator {
        TimeGranulator::new(catalog().stream("RNSCA").unwrap(), clock(), pool())
    }

    fn feed(g: &mut TimeGranulator, packets: &[Packet]) -> Vec<GranuleRecord> {
        let mut granules = Vec::default();
        for pkt in packets {
            if !g.not_full(pkt).unwrap() {
                granules.extend(g.flush());
            }
            g.put(pkt).unwrap();
        }
        granules
    }

    #[test]
    fn test_diary_windows() {
        let mut g = diary();
        let (start, end) = granule_boundary(T2020, DIARY_LEN, BASE_TIME);
        let packets: Vec<Packet> = (0..45u16)
            .map(|i| timed(11, i, start + i64::from(i) * 1_000_000, &[]))
            .collect();
        let granules = feed(&mut g, &packets);

        assert_eq!(granules.len(), 2);
        assert_eq!(granules[0].len(), 20);
        assert_eq!(granules[0].window(), Some((start, end)));
        assert_eq!(granules[1].len(), 20);
        assert_eq!(granules[1].window(), Some((end, end + DIARY_LEN)));
        assert_eq!(g.record().len(), 5);
        assert_eq!(g.window(), Some((end + DIARY_LEN, end + 2 * DIARY_LEN)));
    }

    #[test]
    fn test_gap_skips_windows() {
        let mut g = diary();
        let (start, _) = granule_boundary(T2020, DIARY_LEN, BASE_TIME);
        let packets = vec![
            timed(11, 1, start, &[]),
            timed(11, 2, start + 5 * DIARY_LEN + 1, &[]),
        ];
        let granules = feed(&mut g, &packets);
        assert_eq!(granules.len(), 1);
        assert_eq!(
            g.window(),
            Some((start + 5 * DIARY_LEN, start + 6 * DIARY_LEN))
        );
    }

    #[test]
    fn test_late_packet_kept() {
        let mut g = diary();
        let (start, _) = granule_boundary(T2020, DIARY_LEN, BASE_TIME);
        let packets = vec![
            timed(11, 1, start + 1_000_000, &[]),
            timed(11, 2, start - 1_000_000, &[]),
        ];
        let granules = feed(&mut g, &packets);
        assert!(granules.is_empty());
        assert_eq!(g.record().len(), 2);
    }

    #[test]
    fn test_untimed_packets_follow() {
        let mut g = diary();
        let (start, end) = granule_boundary(T2020, DIARY_LEN, BASE_TIME);
        let packets = vec![
            first(11, 1, start, &[0u8; 4]),
            cont(11, 2),
            first(11, 3, end, &[0u8; 4]),
            cont(11, 4),
        ];
        let granules = feed(&mut g, &packets);
        assert_eq!(granules.len(), 1);
        assert_eq!(granules[0].len(), 2);
        assert_eq!(g.record().len(), 2);
    }

    #[test]
    fn test_atms_time_only_science_decides() {
        let stream = catalog().stream("RATMS").unwrap();
        let mut g = TimeGranulator::atms(stream, clock(), pool());
        let (start, end) = granule_boundary(T2020, stream.gran_len, BASE_TIME);
        let packets = vec![
            timed(ATMS_SCIENCE_APID, 1, start, &[0u8; 10]),
            // health packet past the end does not close the granule
            timed(531, 2, end + 10, &[0u8; 10]),
            timed(ATMS_SCIENCE_APID, 3, end + 20, &[0u8; 10]),
        ];
        let granules = feed(&mut g, &packets);
        assert_eq!(granules.len(), 1);
        assert_eq!(granules[0].len(), 2);
    }

    #[test]
    fn test_omps_inherited_time_decides() {
        let stream = catalog().stream("ROTCS").unwrap();
        let mut g = TimeGranulator::omps(stream, clock(), pool(), 1);
        let (_, end) = granule_boundary(T2020, stream.gran_len, BASE_TIME);
        let packets = vec![
            first(560, 1, end - 2, &[0u8; 4]),
            cont(560, 2),
            // inherits end, the start of the next granule
            cont(560, 3),
        ];
        let granules = feed(&mut g, &packets);
        assert_eq!(granules.len(), 1);
        assert_eq!(granules[0].len(), 2);
        assert_eq!(g.record().packets()[0].obs_time, end);
    }

    #[test]
    fn test_put_while_full() {
        let mut g = diary();
        let (start, end) = granule_boundary(T2020, DIARY_LEN, BASE_TIME);
        g.not_full(&timed(11, 1, start, &[])).unwrap();
        g.put(&timed(11, 1, start, &[])).unwrap();
        assert!(!g.not_full(&timed(11, 2, end, &[])).unwrap());
        assert!(matches!(
            g.put(&timed(11, 2, end, &[])),
            Err(Error::ProtocolViolation { .. })
        ));
        g.reset();
        assert_eq!(g.window(), None);
    }
}
