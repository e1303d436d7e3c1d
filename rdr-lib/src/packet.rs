//! Space packet access on top of [ccsds::spacepacket].
pub use ccsds::spacepacket::{decode_packets, Apid, Packet, PrimaryHeader};

/// Packet is the first packet in a packet group
pub const SEQ_FIRST: u8 = 1;
/// Packet is a part of a packet group, but not first and not last
pub const SEQ_CONTINUATION: u8 = 0;
/// Packet is the last packet in a packet group
pub const SEQ_LAST: u8 = 2;
/// Packet is not part of a packet group, i.e., standalone.
pub const SEQ_UNSEGMENTED: u8 = 3;

/// Number of bytes in the CDS secondary header timecode.
pub const TIMECODE_LEN: usize = 8;

pub const APID_MAX: Apid = 2047;

/// Granulation accessors for [Packet].
pub trait PacketExt {
    fn apid(&self) -> Apid;

    /// Bytes following the primary header.
    fn payload(&self) -> &[u8];

    /// The raw segmented CDS timecode from the secondary header.
    ///
    /// Only first and standalone packets carry a valid time; `None` for all others.
    fn timecode(&self) -> Option<u64>;
}

impl PacketExt for Packet {
    fn apid(&self) -> Apid {
        self.header.apid
    }

    fn payload(&self) -> &[u8] {
        &self.data[PrimaryHeader::LEN.min(self.data.len())..]
    }

    fn timecode(&self) -> Option<u64> {
        if !self.header.has_secondary_header || !(self.is_first() || self.is_standalone()) {
            return None;
        }
        let start = PrimaryHeader::LEN;
        let buf = self.data.get(start..start + TIMECODE_LEN)?;
        let mut tc = [0u8; TIMECODE_LEN];
        tc.copy_from_slice(buf);
        Some(u64::from_be_bytes(tc))
    }
}

/// Encode the bytes of a version 0 telemetry packet, computing the primary header length.
///
/// `timecode` is written as the secondary header when provided. Decode the result with
/// [Packet::decode].
#[must_use]
pub fn encode_packet(
    apid: Apid,
    sequence_flags: u8,
    sequence_id: u16,
    timecode: Option<u64>,
    user_data: &[u8],
) -> Vec<u8> {
    let tc_len = if timecode.is_some() { TIMECODE_LEN } else { 0 };
    // A packet always has at least one byte of data following the primary header
    let data_len = (tc_len + user_data.len()).max(1);
    let apid = (apid & APID_MAX).to_be_bytes();
    let seq = (sequence_id % (PrimaryHeader::SEQ_MAX + 1)).to_be_bytes();
    let len = u16::try_from(data_len - 1).unwrap_or(u16::MAX).to_be_bytes();

    let mut data = Vec::with_capacity(PrimaryHeader::LEN + data_len);
    data.extend_from_slice(&[
        u8::from(timecode.is_some()) << 3 | (apid[0] & 0x7),
        apid[1],
        (sequence_flags & 0x3) << 6 | (seq[0] & 0x3f),
        seq[1],
        len[0],
        len[1],
    ]);
    if let Some(tc) = timecode {
        data.extend_from_slice(&tc.to_be_bytes());
    }
    data.extend_from_slice(user_data);
    data.resize(PrimaryHeader::LEN + data_len, 0);
    data
}

#[cfg(test)]
pub(crate) fn packet(
    apid: Apid,
    sequence_flags: u8,
    sequence_id: u16,
    timecode: Option<u64>,
    user_data: &[u8],
) -> Packet {
    Packet::decode(&encode_packet(apid, sequence_flags, sequence_id, timecode, user_data))
        .expect("encoded packet decodes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timecode() {
        let dat: [u8; 15] = [
            // Primary/secondary header and a single byte of user data
            0xd, 0x59, 0xd2, 0xab, 0x0, 0x8, 0x52, 0xc0, 0x0, 0x0, 0x0, 0xa7, 0x0, 0xdb, 0xff,
        ];
        let pkt = Packet::decode(&dat).unwrap();

        assert_eq!(pkt.apid(), 1369);
        assert_eq!(pkt.header.sequence_id, 4779);
        assert_eq!(pkt.payload().len(), 9);
        assert_eq!(pkt.timecode(), Some(0x52c0_0000_00a7_00db));
    }

    #[test]
    fn test_encode_matches_decode() {
        let pkt = packet(826, SEQ_FIRST, 16383, Some(42), &[1, 2, 3]);

        assert_eq!(pkt.header.apid, 826);
        assert!(pkt.header.has_secondary_header);
        assert_eq!(pkt.header.sequence_flags, SEQ_FIRST);
        assert_eq!(pkt.header.sequence_id, 16383);
        assert_eq!(pkt.header.len_minus1, 10);
        assert_eq!(pkt.data.len(), PrimaryHeader::LEN + 8 + 3);
        assert_eq!(pkt.timecode(), Some(42));
    }

    #[test]
    fn test_continuation_has_no_time() {
        let pkt = packet(826, SEQ_CONTINUATION, 1, Some(42), &[1]);
        assert_eq!(pkt.timecode(), None);
    }

    #[test]
    fn test_short_secondary_header() {
        let pkt = packet(826, SEQ_UNSEGMENTED, 1, None, &[1, 2]);
        assert!(!pkt.header.has_secondary_header);
        assert_eq!(pkt.timecode(), None);
    }

    #[test]
    fn test_decode_packets() {
        let mut dat = Vec::default();
        for seq in 0..3u16 {
            dat.extend(encode_packet(11, SEQ_UNSEGMENTED, seq, Some(1), &[0; 5]));
        }
        let packets: Vec<Packet> = decode_packets(dat.as_slice())
            .map(Result::unwrap)
            .collect();

        assert_eq!(packets.len(), 3);
        assert_eq!(packets[2].header.sequence_id, 2);
        assert_eq!(packets[2].timecode(), Some(1));
    }
}
