use std::sync::Arc;

use tracing::{trace, warn};

use super::{Accumulator, Granulator};
use crate::{
    catalog::{InstrumentStream, VIIRS_CAL_APID, VIIRS_ENG_APID, VIIRS_FIRST_BAND_APID},
    clock::MissionClock,
    error::{Error, Result},
    granule::GranuleRecord,
    packet::{Apid, Packet, PacketExt},
    pool::PacketPool,
};

const VIIRS_LAST_BAND_APID: Apid = VIIRS_FIRST_BAND_APID + 21;

/// Location of the scan number within a packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanField {
    U32(usize),
    /// Engineering packets only carry the low 16 bits
    U16(usize),
}

fn scan_field(apid: Apid) -> Option<ScanField> {
    match apid {
        VIIRS_FIRST_BAND_APID..=VIIRS_LAST_BAND_APID => Some(ScanField::U32(10)),
        VIIRS_CAL_APID => Some(ScanField::U32(14)),
        VIIRS_ENG_APID => Some(ScanField::U16(12)),
        _ => None,
    }
}

/// Scan number carried by a first or standalone packet.
fn scan_number(packet: &Packet) -> Option<(u32, ScanField)> {
    if !(packet.is_first() || packet.is_standalone()) {
        return None;
    }
    let field = scan_field(packet.apid())?;
    let payload = packet.payload();
    let num = match field {
        ScanField::U32(off) => u32::from_be_bytes(payload.get(off..off + 4)?.try_into().ok()?),
        ScanField::U16(off) => {
            u32::from(u16::from_be_bytes(payload.get(off..off + 2)?.try_into().ok()?))
        }
    };
    Some((num, field))
}

/// Groups VIIRS packets by time, only splitting granules between scans.
///
/// A granule is full when the first timed packet of a new scan falls past the window end, so
/// a scan straddling a boundary stays whole.
#[derive(Debug, Clone)]
pub struct ViirsGranulator {
    acc: Accumulator,
    scan: Option<u32>,
    new_scan: bool,
    window: Option<(i64, i64)>,
    pending: Option<(i64, i64)>,
}

impl ViirsGranulator {
    pub(crate) fn new(
        stream: &'static InstrumentStream,
        clock: Arc<MissionClock>,
        pool: Arc<PacketPool>,
    ) -> Self {
        ViirsGranulator {
            acc: Accumulator::new(stream, clock, pool, 0),
            scan: None,
            new_scan: false,
            window: None,
            pending: None,
        }
    }

    /// Current scan number.
    #[must_use]
    pub fn scan(&self) -> Option<u32> {
        self.scan
    }

    fn observe_scan(&mut self, num: u32, field: ScanField) {
        let num = match (field, self.scan) {
            (ScanField::U16(_), None) => return,
            (ScanField::U16(_), Some(cur)) => (cur & 0xffff_0000) | num,
            (ScanField::U32(_), _) => num,
        };
        match self.scan {
            None => {
                trace!(scan = num, "first viirs scan");
                self.scan = Some(num);
            }
            Some(cur) if cur == num => {}
            Some(cur) => {
                if num < cur {
                    warn!(from = cur, to = num, "viirs scan number went backwards");
                } else if num > cur + 1 {
                    warn!(from = cur, to = num, missing = num - cur - 1, "viirs scans skipped");
                }
                self.scan = Some(num);
                self.new_scan = true;
            }
        }
    }
}

impl Granulator for ViirsGranulator {
    fn not_full(&mut self, packet: &Packet) -> Result<bool> {
        if self.pending.is_some() {
            return Ok(false);
        }
        let stamp = self.acc.stamp(packet);
        if let Some((num, field)) = scan_number(packet) {
            self.observe_scan(num, field);
        }
        let Some(time) = stamp.time else {
            return Ok(true);
        };

        let bounds = self
            .acc
            .clock()
            .granule_boundary(self.acc.instrument(), time);
        match self.window {
            None => {
                self.new_scan = false;
                self.window = Some(bounds);
                self.acc.record_mut().set_window(Some(bounds));
                Ok(true)
            }
            Some((_, end)) if self.new_scan => {
                self.new_scan = false;
                if time >= end {
                    self.pending = Some(bounds);
                    return Ok(false);
                }
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
        self.scan = None;
        self.new_scan = false;
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

    const GRAN_LEN: i64 = 85_350_000;

    fn granulator() -> ViirsGranulator {
        ViirsGranulator::new(catalog().stream("RVIRS").unwrap(), clock(), pool())
    }

    // band packet; user data follows the 8 byte timecode
    fn band(apid: Apid, seq: u16, scan: u32, iet: i64) -> Packet {
        let mut user = [0u8; 8];
        user[2..6].copy_from_slice(&scan.to_be_bytes());
        first(apid, seq, iet, &user)
    }

    fn eng(seq: u16, scan: u16, iet: i64) -> Packet {
        let mut user = [0u8; 8];
        user[4..6].copy_from_slice(&scan.to_be_bytes());
        timed(VIIRS_ENG_APID, seq, iet, &user)
    }

    fn feed(g: &mut ViirsGranulator, packets: &[Packet]) -> Vec<GranuleRecord> {
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
    fn test_scan_number() {
        assert_eq!(scan_number(&band(800, 1, 7, T2020)).unwrap().0, 7);
        assert_eq!(scan_number(&eng(1, 0x1234, T2020)).unwrap().0, 0x1234);
        assert!(scan_number(&cont(800, 2)).is_none());
    }

    #[test]
    fn test_scan_straddling_boundary_stays_whole() {
        let mut g = granulator();
        let (_, end) = granule_boundary(T2020, GRAN_LEN, BASE_TIME);
        let packets = vec![
            band(800, 1, 10, end - 2_000_000),
            cont(800, 2),
            // same scan past the boundary
            band(801, 3, 10, end + 100),
            cont(801, 4),
            // first packet of a new scan
            band(800, 5, 11, end + 1_000_000),
            cont(800, 6),
        ];
        let granules = feed(&mut g, &packets);

        assert_eq!(granules.len(), 1);
        assert_eq!(granules[0].len(), 4);
        assert_eq!(g.record().len(), 2);
        assert_eq!(g.scan(), Some(11));
    }

    #[test]
    fn test_new_scan_inside_window() {
        let mut g = granulator();
        let (start, _) = granule_boundary(T2020, GRAN_LEN, BASE_TIME);
        let packets = vec![
            band(800, 1, 10, start + 1_000_000),
            band(800, 2, 11, start + 2_000_000),
            band(800, 3, 13, start + 3_000_000),
        ];
        assert!(feed(&mut g, &packets).is_empty());
        assert_eq!(g.scan(), Some(13));
    }

    #[test]
    fn test_eng_scan_widened() {
        let mut g = granulator();
        let (start, _) = granule_boundary(T2020, GRAN_LEN, BASE_TIME);
        // low 16 bits alone do not establish a scan
        feed(&mut g, &[eng(1, 5, start)]);
        assert_eq!(g.scan(), None);

        feed(&mut g, &[band(800, 2, 0x0001_0005, start + 10), eng(3, 6, start + 20)]);
        assert_eq!(g.scan(), Some(0x0001_0006));
    }
}
