use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use crate::{catalog::InstrumentStream, packet::Apid, packet::Packet, pool::PacketPool};

/// A packet owned by a granule, backed by a pooled buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPacket {
    pub apid: Apid,
    pub sequence: u16,
    /// The packet's own valid timestamp, IET microseconds.
    pub time: Option<i64>,
    /// Observation time recorded for the packet, inherited when it has no own time.
    pub obs_time: i64,
    pub data: Vec<u8>,
}

/// Ordered packets for one stream within one granule window.
///
/// Appends are copy-on-write so [GranuleRecord::snapshot] may be held by a reader while
/// the producer continues to add packets.
#[derive(Debug, Clone)]
pub struct GranuleRecord {
    stream: &'static InstrumentStream,
    packets: Arc<Vec<StoredPacket>>,
    counts: BTreeMap<Apid, u32>,
    first_time: Option<i64>,
    last_time: Option<i64>,
    window: Option<(i64, i64)>,
}

impl Display for GranuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Granule{{stream={} packets={} window={:?}}}",
            self.stream.short_name,
            self.packets.len(),
            self.window
        )
    }
}

impl GranuleRecord {
    #[must_use]
    pub fn new(stream: &'static InstrumentStream) -> Self {
        GranuleRecord {
            stream,
            packets: Arc::default(),
            counts: BTreeMap::default(),
            first_time: None,
            last_time: None,
            window: None,
        }
    }

    /// Append a deep copy of `packet`.
    pub fn push(&mut self, packet: &Packet, time: Option<i64>, obs_time: i64, pool: &PacketPool) {
        let mut data = pool.get(packet.data.len());
        data.copy_from_slice(&packet.data);
        Arc::make_mut(&mut self.packets).push(StoredPacket {
            apid: packet.header.apid,
            sequence: packet.header.sequence_id,
            time,
            obs_time,
            data,
        });
        *self.counts.entry(packet.header.apid).or_default() += 1;
        if let Some(t) = time {
            self.first_time = Some(self.first_time.map_or(t, |f| f.min(t)));
            self.last_time = Some(self.last_time.map_or(t, |l| l.max(t)));
        }
    }

    #[must_use]
    pub fn stream(&self) -> &'static InstrumentStream {
        self.stream
    }

    /// A point in time view of the packets.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<StoredPacket>> {
        self.packets.clone()
    }

    #[must_use]
    pub fn packets(&self) -> &[StoredPacket] {
        &self.packets
    }

    #[must_use]
    pub fn counts(&self) -> &BTreeMap<Apid, u32> {
        &self.counts
    }

    #[must_use]
    pub fn count(&self, apid: Apid) -> u32 {
        self.counts.get(&apid).copied().unwrap_or_default()
    }

    /// Earliest packet timestamp.
    #[must_use]
    pub fn first_time(&self) -> Option<i64> {
        self.first_time
    }

    /// Latest packet timestamp.
    #[must_use]
    pub fn last_time(&self) -> Option<i64> {
        self.last_time
    }

    /// Granule window, if the granulator has established one.
    #[must_use]
    pub fn window(&self) -> Option<(i64, i64)> {
        self.window
    }

    pub fn set_window(&mut self, window: Option<(i64, i64)>) {
        self.window = window;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Percentage of expected packets not received.
    ///
    /// Computed per packet type so an excess of one type cannot hide a shortfall in
    /// another.
    #[must_use]
    pub fn percent_missing(&self) -> f32 {
        let expected = self.stream.expected_packets();
        if expected == 0 {
            return 0.0;
        }
        let received: u64 = self
            .stream
            .identities
            .iter()
            .map(|i| u64::from(self.count(i.apid).min(i.expected)))
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let missing = (expected - received) as f64 / expected as f64 * 100.0;
        missing as f32
    }

    /// Return packet buffers to `pool`.
    ///
    /// Buffers still shared with a snapshot are left to the snapshot.
    pub fn recycle(self, pool: &PacketPool) {
        if let Ok(packets) = Arc::try_unwrap(self.packets) {
            for pkt in packets {
                pool.put(pkt.data);
            }
        }
    }
}
