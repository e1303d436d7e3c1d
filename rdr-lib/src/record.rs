//! The JPSS Common RDR binary record.
//!
//! See: JPSS CDFCB Vol II - RDR Formats.
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::{
    clock::MissionClock,
    error::{Error, Result},
    granule::GranuleRecord,
};

macro_rules! from_bytes4 {
    ($type:ty, $dat:ident, $start:expr) => {
        <$type>::from_be_bytes([
            $dat[$start],
            $dat[$start + 1],
            $dat[$start + 2],
            $dat[$start + 3],
        ])
    };
}

macro_rules! from_bytes8 {
    ($type:ty, $dat:ident, $start:expr) => {
        <$type>::from_be_bytes([
            $dat[$start],
            $dat[$start + 1],
            $dat[$start + 2],
            $dat[$start + 3],
            $dat[$start + 4],
            $dat[$start + 5],
            $dat[$start + 6],
            $dat[$start + 7],
        ])
    };
}

macro_rules! to_str {
    ($data:expr) => {
        std::str::from_utf8($data)?.trim_matches('\0').to_owned()
    };
}

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct StaticHeader {
    pub satellite: String, // 4-bytes
    pub sensor: String,    // 16-bytes
    pub type_id: String,   // 16-bytes
    pub num_apids: u32,
    pub apid_list_offset: u32,
    pub pkt_tracker_offset: u32,
    pub ap_storage_offset: u32,
    /// Length of the entire record
    pub total_length: u32,
    pub start_boundary: i64,
    pub end_boundary: i64,
}

impl StaticHeader {
    pub const LEN: usize = 72;

    /// # Errors
    /// [Error::NotEnoughBytes] if `data` is too short, or invalid UTF-8 in a string field
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < StaticHeader::LEN {
            return Err(Error::NotEnoughBytes("StaticHeader"));
        }
        Ok(Self {
            satellite: to_str!(&data[0..4]),
            sensor: to_str!(&data[4..20]),
            type_id: to_str!(&data[20..36]),
            num_apids: from_bytes4!(u32, data, 36),
            apid_list_offset: from_bytes4!(u32, data, 40),
            pkt_tracker_offset: from_bytes4!(u32, data, 44),
            ap_storage_offset: from_bytes4!(u32, data, 48),
            total_length: from_bytes4!(u32, data, 52),
            start_boundary: from_bytes8!(i64, data, 56),
            end_boundary: from_bytes8!(i64, data, 64),
        })
    }

    #[must_use]
    pub fn as_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        // 3 chars plus NUL
        copy_with_len(&mut buf[..4], self.satellite.as_bytes(), 3);
        copy_with_len(&mut buf[4..20], self.sensor.as_bytes(), 16);
        copy_with_len(&mut buf[20..36], self.type_id.as_bytes(), 16);
        buf[36..40].copy_from_slice(&self.num_apids.to_be_bytes());
        buf[40..44].copy_from_slice(&self.apid_list_offset.to_be_bytes());
        buf[44..48].copy_from_slice(&self.pkt_tracker_offset.to_be_bytes());
        buf[48..52].copy_from_slice(&self.ap_storage_offset.to_be_bytes());
        buf[52..56].copy_from_slice(&self.total_length.to_be_bytes());
        buf[56..64].copy_from_slice(&self.start_boundary.to_be_bytes());
        buf[64..72].copy_from_slice(&self.end_boundary.to_be_bytes());

        buf
    }
}

/// Entry in the APID List.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApidInfo {
    pub name: String,
    pub value: u32,
    pub pkt_tracker_start_idx: u32,
    pub pkts_expected: u32,
    pub pkts_received: u32,
}

impl ApidInfo {
    pub const LEN: usize = 32;

    #[must_use]
    pub fn as_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        copy_with_len(&mut buf[..16], self.name.as_bytes(), 16);
        buf[16..20].copy_from_slice(&self.value.to_be_bytes());
        buf[20..24].copy_from_slice(&self.pkt_tracker_start_idx.to_be_bytes());
        buf[24..28].copy_from_slice(&self.pkts_expected.to_be_bytes());
        buf[28..32].copy_from_slice(&self.pkts_received.to_be_bytes());

        buf
    }

    /// # Errors
    /// [Error::NotEnoughBytes] if `data` is too short
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < ApidInfo::LEN {
            return Err(Error::NotEnoughBytes("ApidInfo"));
        }
        Ok(Self {
            name: to_str!(&data[0..16]),
            value: from_bytes4!(u32, data, 16),
            pkt_tracker_start_idx: from_bytes4!(u32, data, 20),
            pkts_expected: from_bytes4!(u32, data, 24),
            pkts_received: from_bytes4!(u32, data, 28),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PacketTracker {
    /// Observation time as IET microseconds
    pub obs_time: i64,
    /// Sequence number of this trackers packet
    pub sequence_number: u32,
    /// Size in bytes of this tracker packet
    pub size: u32,
    /// Offset to this trackers packet in the AP storage
    pub offset: u32,
    pub fill_percent: u32,
}

impl PacketTracker {
    pub const LEN: usize = 24;

    #[must_use]
    pub fn as_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..8].copy_from_slice(&self.obs_time.to_be_bytes());
        buf[8..12].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[12..16].copy_from_slice(&self.size.to_be_bytes());
        buf[16..20].copy_from_slice(&self.offset.to_be_bytes());
        buf[20..24].copy_from_slice(&self.fill_percent.to_be_bytes());

        buf
    }

    /// # Errors
    /// [Error::NotEnoughBytes] if `data` is too short
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < PacketTracker::LEN {
            return Err(Error::NotEnoughBytes("PacketTracker"));
        }
        Ok(Self {
            obs_time: from_bytes8!(i64, data, 0),
            sequence_number: from_bytes4!(u32, data, 8),
            size: from_bytes4!(u32, data, 12),
            offset: from_bytes4!(u32, data, 16),
            fill_percent: from_bytes4!(u32, data, 20),
        })
    }
}

/// An encoded record along with the structures it was built from.
#[derive(Debug, Clone)]
pub struct SerializedRecord {
    pub header: StaticHeader,
    pub apid_list: Vec<ApidInfo>,
    pub data: Vec<u8>,
}

/// Builds Common RDR records from finalized granules.
#[derive(Debug, Clone)]
pub struct RecordEncoder {
    clock: Arc<MissionClock>,
    satellite: String,
}

impl RecordEncoder {
    #[must_use]
    pub fn new(clock: Arc<MissionClock>, satellite: &str) -> Self {
        RecordEncoder {
            clock,
            satellite: satellite.to_string(),
        }
    }

    /// Granule `(start, end)` for `rec`.
    ///
    /// Start is the boundary containing the first timed packet and end the boundary
    /// containing the last. Falls back to the granulator window for records without any
    /// timed packets.
    ///
    /// # Errors
    /// [Error::EncodingInvariant] if the record has neither packet times nor a window.
    pub fn boundaries(&self, rec: &GranuleRecord) -> Result<(i64, i64)> {
        let instrument = rec.stream().instrument;
        match (rec.first_time(), rec.last_time(), rec.window()) {
            (Some(first), Some(last), _) => Ok((
                self.clock.granule_boundary(instrument, first).0,
                self.clock.granule_boundary(instrument, last).1,
            )),
            (_, _, Some(window)) => Ok(window),
            _ => Err(Error::EncodingInvariant(format!(
                "{} granule has no packet times",
                rec.stream().short_name
            ))),
        }
    }

    /// Encode `rec` as a Common RDR.
    ///
    /// # Errors
    /// [Error::EncodingInvariant] if the record is empty, holds a packet its stream does not
    /// accept, or the encoded length does not match the header.
    pub fn encode(&self, rec: &GranuleRecord) -> Result<SerializedRecord> {
        let stream = rec.stream();
        if rec.is_empty() {
            return Err(Error::EncodingInvariant(format!(
                "{} granule is empty",
                stream.short_name
            )));
        }
        let (start, end) = self.boundaries(rec)?;
        let packets = rec.packets();

        // Storage offsets follow arrival order
        let mut offsets = Vec::with_capacity(packets.len());
        let mut storage_len: u32 = 0;
        for pkt in packets {
            if stream.identity(pkt.apid).is_none() {
                return Err(Error::EncodingInvariant(format!(
                    "apid {} is not part of {}",
                    pkt.apid, stream.short_name
                )));
            }
            offsets.push(storage_len);
            storage_len = storage_len
                .checked_add(u32::try_from(pkt.data.len())?)
                .ok_or_else(|| Error::EncodingInvariant("storage overflow".to_string()))?;
        }

        let mut apid_list = Vec::with_capacity(stream.identities.len());
        let mut tracker_idx: u32 = 0;
        for ident in &stream.identities {
            let received = rec.count(ident.apid);
            apid_list.push(ApidInfo {
                name: ident.name.clone(),
                value: u32::from(ident.apid),
                pkt_tracker_start_idx: tracker_idx,
                pkts_expected: ident.expected,
                pkts_received: received,
            });
            tracker_idx = tracker_idx
                .checked_add(received)
                .ok_or_else(|| Error::EncodingInvariant("tracker index overflow".to_string()))?;
        }

        // Trackers are grouped by APID, stable so arrival order holds within an APID
        let mut order: Vec<usize> = (0..packets.len()).collect();
        order.sort_by_key(|&idx| packets[idx].apid);

        let num_apids = u32::try_from(apid_list.len())?;
        let num_trackers = u32::try_from(packets.len())?;
        let (pkt_tracker_offset, ap_storage_offset, total_length) =
            layout(num_apids, num_trackers, storage_len)?;
        let header = StaticHeader {
            satellite: self.satellite.clone(),
            sensor: stream.sensor.clone(),
            type_id: stream.type_id.clone(),
            num_apids,
            apid_list_offset: StaticHeader::LEN as u32,
            pkt_tracker_offset,
            ap_storage_offset,
            total_length,
            start_boundary: start,
            end_boundary: end,
        };

        let mut data = Vec::with_capacity(header.total_length as usize);
        data.extend_from_slice(&header.as_bytes());
        for info in &apid_list {
            data.extend_from_slice(&info.as_bytes());
        }
        for idx in order {
            let pkt = &packets[idx];
            let tracker = PacketTracker {
                obs_time: pkt.obs_time,
                sequence_number: u32::from(pkt.sequence),
                size: u32::try_from(pkt.data.len())?,
                offset: offsets[idx],
                fill_percent: 0,
            };
            data.extend_from_slice(&tracker.as_bytes());
        }
        for pkt in packets {
            data.extend_from_slice(&pkt.data);
        }

        if data.len() != header.total_length as usize {
            return Err(Error::EncodingInvariant(format!(
                "encoded {} bytes, header says {}",
                data.len(),
                header.total_length
            )));
        }
        debug!(
            stream = %stream.short_name,
            packets = packets.len(),
            bytes = data.len(),
            "encoded record"
        );

        Ok(SerializedRecord {
            header,
            apid_list,
            data,
        })
    }
}

/// The JPSS Common RDR data structures.
#[derive(Debug, Clone, Serialize)]
pub struct CommonRdr {
    pub static_header: StaticHeader,
    pub apid_list: Vec<ApidInfo>,
    pub packet_trackers: Vec<PacketTracker>,
}

impl CommonRdr {
    /// Decode the structures of a Common RDR.
    ///
    /// # Errors
    /// If the data is too short for the offsets and length in the header, or the offsets
    /// are out of order.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let static_header = StaticHeader::from_bytes(data)?;
        let hdr = &static_header;
        if hdr.apid_list_offset as usize != StaticHeader::LEN {
            return Err(Error::EncodingInvariant(format!(
                "apid list offset {} != {}",
                hdr.apid_list_offset,
                StaticHeader::LEN
            )));
        }
        if !(hdr.apid_list_offset <= hdr.pkt_tracker_offset
            && hdr.pkt_tracker_offset <= hdr.ap_storage_offset
            && hdr.ap_storage_offset <= hdr.total_length)
        {
            return Err(Error::EncodingInvariant(format!(
                "record offsets out of order: {hdr:?}"
            )));
        }
        if data.len() < hdr.total_length as usize {
            return Err(Error::NotEnoughBytes("CommonRdr"));
        }

        let mut apid_list: Vec<ApidInfo> = Vec::default();
        let start = hdr.apid_list_offset as usize;
        let end = hdr.pkt_tracker_offset as usize;
        for buf in data[start..end].chunks(ApidInfo::LEN) {
            if buf.len() < ApidInfo::LEN {
                debug!("ApidInfo data < {}; bailing!", ApidInfo::LEN);
                break;
            }
            apid_list.push(ApidInfo::from_bytes(buf)?);
        }

        let mut packet_trackers: Vec<PacketTracker> = Vec::default();
        let start = hdr.pkt_tracker_offset as usize;
        let end = hdr.ap_storage_offset as usize;
        for buf in data[start..end].chunks(PacketTracker::LEN) {
            if buf.len() < PacketTracker::LEN {
                debug!("packet tracker data < {}; bailing!", PacketTracker::LEN);
                break;
            }
            let tracker = PacketTracker::from_bytes(buf)?;
            trace!("{tracker:?}");
            packet_trackers.push(tracker);
        }

        Ok(CommonRdr {
            static_header,
            apid_list,
            packet_trackers,
        })
    }

    /// Bytes of the packet referenced by `tracker` from the record `data`.
    ///
    /// # Errors
    /// [Error::NotEnoughBytes] if the tracker points outside the application packet storage.
    pub fn packet_data<'a>(&self, data: &'a [u8], tracker: &PacketTracker) -> Result<&'a [u8]> {
        let start = self.static_header.ap_storage_offset as usize + tracker.offset as usize;
        let end = start + tracker.size as usize;
        if end > self.static_header.total_length as usize || end > data.len() {
            return Err(Error::NotEnoughBytes("packet data"));
        }
        Ok(&data[start..end])
    }

    /// All packet bytes in storage order.
    ///
    /// # Errors
    /// If any tracker points outside the application packet storage.
    pub fn packets<'a>(&self, data: &'a [u8]) -> Result<Vec<&'a [u8]>> {
        let mut trackers: Vec<&PacketTracker> = self.packet_trackers.iter().collect();
        trackers.sort_by_key(|t| t.offset);
        trackers
            .into_iter()
            .map(|t| self.packet_data(data, t))
            .collect()
    }
}

fn copy_with_len<'a>(dst: &'a mut [u8], src: &'a [u8], len: usize) {
    if src.len() < len {
        dst[..src.len()].copy_from_slice(src);
        for x in dst.iter_mut().skip(src.len()).take(len) {
            *x = 0;
        }
    } else {
        dst[..len].copy_from_slice(&src[..len]);
    }
}

/// Packet tracker offset, application storage offset and total length of a record.
fn layout(num_apids: u32, num_trackers: u32, storage_len: u32) -> Result<(u32, u32, u32)> {
    let overflow = || Error::EncodingInvariant("record length overflows u32".to_string());
    let pkt_tracker_offset = num_apids
        .checked_mul(ApidInfo::LEN as u32)
        .and_then(|n| n.checked_add(StaticHeader::LEN as u32))
        .ok_or_else(overflow)?;
    let ap_storage_offset = num_trackers
        .checked_mul(PacketTracker::LEN as u32)
        .and_then(|n| n.checked_add(pkt_tracker_offset))
        .ok_or_else(overflow)?;
    let total_length = ap_storage_offset
        .checked_add(storage_len)
        .ok_or_else(overflow)?;
    Ok((pkt_tracker_offset, ap_storage_offset, total_length))
}
