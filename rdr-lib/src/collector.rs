use std::{
    collections::{BTreeMap, BTreeSet},
    mem,
    sync::Arc,
};

use tracing::{debug, info, trace, warn};

use crate::{
    catalog::{catalog, InstrumentStream},
    clock::MissionClock,
    config::{Config, RdrSpec},
    error::{Error, Result},
    granule::GranuleRecord,
    granulator::{Granulator, InstrumentGranulator},
    meta::{filename, AggrMeta, GranuleMeta},
    packet::{Packet, PacketExt},
    pool::PacketPool,
    record::RecordEncoder,
    store::ObjectStore,
    time::Time,
    writer::{write_aggregate, write_file_attrs, write_granule},
};

/// What a [Collector] did with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    /// Unknown APID or a stream this file does not collect
    Dropped,
    /// The packet belongs past this file's end threshold
    Rejected,
}

/// Result of writing a finished granule.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Written(GranuleMeta),
    /// Diary granule missing too much data to be useful
    Discarded { percent_missing: f32 },
}

/// Diary state carried from a file to its successor.
#[derive(Debug, Clone, Default)]
pub struct Handoff {
    /// Completed diary records that may overlap the successor
    pub diary_records: Vec<GranuleRecord>,
    /// The diary granulator along with its open record
    pub diary: Option<InstrumentGranulator>,
}

/// Everything shared by the collectors of one RDR product.
#[derive(Debug, Clone)]
pub struct CollectorContext {
    pub config: Arc<Config>,
    pub clock: Arc<MissionClock>,
    pub pool: Arc<PacketPool>,
}

impl CollectorContext {
    #[must_use]
    pub fn new(config: Arc<Config>, clock: Arc<MissionClock>, pool: Arc<PacketPool>) -> Self {
        CollectorContext {
            config,
            clock,
            pool,
        }
    }

    fn granulator(&self, stream: &'static InstrumentStream) -> InstrumentGranulator {
        InstrumentGranulator::new(
            stream,
            &self.config.granulation,
            self.clock.clone(),
            self.pool.clone(),
        )
    }
}

/// A closed RDR file.
#[derive(Debug)]
pub struct FileSummary<S> {
    pub store: S,
    /// IDPS style name without extension; `None` when no granules were written
    pub name: Option<String>,
    pub product_ids: Vec<String>,
    pub granules: Vec<GranuleMeta>,
    /// Science time covered, IET microseconds
    pub span: Option<(i64, i64)>,
    pub discarded: usize,
    pub unknown: u64,
    pub created: Time,
}

#[derive(Debug)]
struct StreamState {
    granulator: InstrumentGranulator,
    received: u64,
    rejected: bool,
    released: bool,
}

impl StreamState {
    fn new(granulator: InstrumentGranulator) -> Self {
        StreamState {
            granulator,
            received: 0,
            rejected: false,
            released: false,
        }
    }
}

/// Collects the granules of one output file.
///
/// Science packets are granulated per stream until a granule would start at or past the
/// file threshold, `granules_per_file` granule lengths after the first granule start.
/// Diary granules are held until [Collector::finish] and written only if they overlap the
/// science span.
#[derive(Debug)]
pub struct Collector<S: ObjectStore> {
    ctx: CollectorContext,
    encoder: RecordEncoder,
    store: S,
    streams: Vec<StreamState>,
    diary: Option<InstrumentGranulator>,
    held_diary: Vec<GranuleRecord>,
    threshold: Option<i64>,
    span: Option<(i64, i64)>,
    seqs: BTreeMap<&'static str, usize>,
    granules: Vec<GranuleMeta>,
    discarded: usize,
    unknown: u64,
    created: Time,
}

impl<S: ObjectStore> Collector<S> {
    /// Create a collector for the science products of `rdrs` along with any packed diary.
    ///
    /// # Errors
    /// [Error::ConfigInvalid] if a product is not in the catalog.
    pub fn new(
        ctx: CollectorContext,
        rdrs: &[RdrSpec],
        store: S,
        handoff: Option<Handoff>,
    ) -> Result<Self> {
        let mut streams = Vec::default();
        let mut diary_stream = None;
        for rdr in rdrs {
            streams.push(StreamState::new(ctx.granulator(rdr.stream()?)));
            if let Some(stream) = rdr.diary()? {
                diary_stream = Some(stream);
            }
        }
        let Handoff {
            diary_records,
            diary,
        } = handoff.unwrap_or_default();
        let diary = match (diary_stream, diary) {
            (Some(_), Some(granulator)) => Some(granulator),
            (Some(stream), None) => Some(ctx.granulator(stream)),
            (None, _) => None,
        };
        let encoder = RecordEncoder::new(ctx.clock.clone(), &ctx.config.satellite.id);

        Ok(Collector {
            ctx,
            encoder,
            store,
            streams,
            diary,
            held_diary: diary_records,
            threshold: None,
            span: None,
            seqs: BTreeMap::default(),
            granules: Vec::default(),
            discarded: 0,
            unknown: 0,
            created: Time::now(),
        })
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Granules written so far.
    #[must_use]
    pub fn granules(&self) -> &[GranuleMeta] {
        &self.granules
    }

    /// Time at or past which science granules are rejected.
    #[must_use]
    pub fn threshold(&self) -> Option<i64> {
        self.threshold
    }

    #[must_use]
    pub fn span(&self) -> Option<(i64, i64)> {
        self.span
    }

    /// Number of packets with APIDs not in the catalog.
    #[must_use]
    pub fn unknown(&self) -> u64 {
        self.unknown
    }

    fn stream_index(&self, stream: &InstrumentStream) -> Option<usize> {
        self.streams
            .iter()
            .position(|s| s.granulator.stream() == stream)
    }

    /// Granule start for a record; its window or the boundary of its first packet time.
    fn record_start(&self, rec: &GranuleRecord) -> Option<i64> {
        rec.window().map(|w| w.0).or_else(|| {
            rec.first_time().map(|t| {
                self.ctx
                    .clock
                    .granule_boundary(rec.stream().instrument, t)
                    .0
            })
        })
    }

    fn packet_start(&self, stream: &InstrumentStream, packet: &Packet) -> Option<i64> {
        let time = self.ctx.clock.iet(packet.timecode()?).ok()?;
        Some(self.ctx.clock.granule_boundary(stream.instrument, time).0)
    }

    fn establish_threshold(&mut self, idx: usize) {
        if self.threshold.is_some() {
            return;
        }
        let rec = self.streams[idx].granulator.record();
        if let Some(start) = self.record_start(rec) {
            let stream = rec.stream();
            let threshold =
                start + i64::from(self.ctx.config.file.granules_per_file) * stream.gran_len;
            debug!(stream = %stream.short_name, start, threshold, "established file threshold");
            self.threshold = Some(threshold);
        }
    }

    /// Add a packet to this file.
    ///
    /// # Errors
    /// [Error::ProtocolViolation] if a granulator rejects the packet; the granulator is
    /// reset. Any error writing a full granule.
    pub fn add(&mut self, packet: &Packet) -> Result<Disposition> {
        let apid = packet.apid();
        let Some(stream) = catalog().stream_of(apid) else {
            self.unknown += 1;
            debug!(apid, "dropping {}", Error::UnknownPacket(apid));
            return Ok(Disposition::Dropped);
        };
        if stream.is_diary() {
            return self.add_diary(packet);
        }
        let Some(idx) = self.stream_index(stream) else {
            trace!(apid, stream = %stream.short_name, "stream not collected");
            return Ok(Disposition::Dropped);
        };
        if self.streams[idx].rejected {
            return Ok(Disposition::Rejected);
        }

        let state = &mut self.streams[idx];
        let not_full = match state.granulator.not_full(packet) {
            Ok(not_full) => not_full,
            Err(err) => {
                state.granulator.reset();
                return Err(err);
            }
        };
        if !not_full {
            if let Some(rec) = self.streams[idx].granulator.flush() {
                self.write_record(rec)?;
            }
        }
        // a new granule window opens with this packet
        if !not_full || self.streams[idx].granulator.record().is_empty() {
            let next_start = self
                .record_start(self.streams[idx].granulator.record())
                .or_else(|| self.packet_start(stream, packet));
            if let (Some(start), Some(threshold)) = (next_start, self.threshold) {
                if start >= threshold {
                    debug!(
                        stream = %stream.short_name,
                        start,
                        threshold,
                        "granule starts past file threshold; rejecting stream"
                    );
                    self.streams[idx].rejected = true;
                    return Ok(Disposition::Rejected);
                }
            }
        }

        let state = &mut self.streams[idx];
        if let Err(err) = state.granulator.put(packet) {
            state.granulator.reset();
            return Err(err);
        }
        state.received += 1;
        self.establish_threshold(idx);
        Ok(Disposition::Accepted)
    }

    fn add_diary(&mut self, packet: &Packet) -> Result<Disposition> {
        let Some(granulator) = self.diary.as_mut() else {
            return Ok(Disposition::Dropped);
        };
        let not_full = granulator.not_full(packet).and_then(|not_full| {
            if !not_full {
                if let Some(rec) = granulator.flush() {
                    trace!(%rec, "holding diary granule");
                    self.held_diary.push(rec);
                }
            }
            granulator.put(packet)
        });
        if let Err(err) = not_full {
            granulator.reset();
            return Err(err);
        }
        Ok(Disposition::Accepted)
    }

    /// Take a granulator whose stream was rejected so a successor file can continue it.
    ///
    /// Only returned once per stream; a fresh granulator takes its place.
    pub fn release(&mut self, stream: &InstrumentStream) -> Option<InstrumentGranulator> {
        let idx = self.stream_index(stream)?;
        let state = &mut self.streams[idx];
        if !state.rejected || state.released {
            return None;
        }
        state.released = true;
        let fresh = self.ctx.granulator(state.granulator.stream());
        Some(mem::replace(&mut state.granulator, fresh))
    }

    /// Continue a granulator released by a predecessor with the packet it rejected.
    ///
    /// # Errors
    /// [Error::ProtocolViolation] if the stream is not collected here or the granulator
    /// rejects the packet.
    pub fn adopt(&mut self, granulator: InstrumentGranulator, packet: &Packet) -> Result<()> {
        let stream = granulator.stream();
        let idx = self.stream_index(stream).ok_or_else(|| {
            Error::protocol("Collector", format!("{} is not collected", stream.short_name))
        })?;
        let state = &mut self.streams[idx];
        state.granulator = granulator;
        if let Err(err) = state.granulator.put(packet) {
            state.granulator.reset();
            return Err(err);
        }
        state.received += 1;
        self.establish_threshold(idx);
        Ok(())
    }

    /// True if every stream that received data has been rejected.
    #[must_use]
    pub fn all_rejected(&self) -> bool {
        let mut active = self
            .streams
            .iter()
            .filter(|s| s.received > 0 || s.rejected)
            .peekable();
        active.peek().is_some() && active.all(|s| s.rejected)
    }

    /// Diary state a successor file needs.
    #[must_use]
    pub fn handoff(&self) -> Handoff {
        let Some(diary) = &self.diary else {
            return Handoff::default();
        };
        let diary_len = diary.stream().gran_len;
        let diary_records = self
            .held_diary
            .iter()
            .filter(|rec| match (self.record_start(rec), self.threshold) {
                (Some(start), Some(threshold)) => start > threshold - diary_len,
                _ => true,
            })
            .cloned()
            .collect();
        Handoff {
            diary_records,
            diary: Some(diary.clone()),
        }
    }

    /// Encode and write a granule, or discard a diary granule missing too much data.
    ///
    /// # Errors
    /// If the record cannot be encoded or written.
    pub fn write_record(&mut self, rec: GranuleRecord) -> Result<WriteOutcome> {
        let stream = rec.stream();
        let percent_missing = rec.percent_missing();
        if stream.is_diary() && percent_missing > self.ctx.config.granulation.diary_missing_ceiling
        {
            debug!(%rec, percent_missing, "discarding diary granule");
            self.discarded += 1;
            rec.recycle(&self.ctx.pool);
            return Ok(WriteOutcome::Discarded { percent_missing });
        }

        let encoded = self.encoder.encode(&rec);
        rec.recycle(&self.ctx.pool);
        let encoded = encoded?;
        let bounds = (
            encoded.header.start_boundary,
            encoded.header.end_boundary,
        );
        let meta = GranuleMeta::new(
            &self.ctx.config,
            stream,
            bounds,
            &self.created,
            &encoded.apid_list,
            percent_missing,
        )?;

        let seq = self.seqs.entry(stream.short_name.as_str()).or_default();
        write_granule(
            &mut self.store,
            &self.ctx.config,
            stream,
            *seq,
            &encoded.data,
            &meta,
        )?;
        *seq += 1;

        if !stream.is_diary() {
            self.span = Some(match self.span {
                Some((start, end)) => (start.min(bounds.0), end.max(bounds.1)),
                None => bounds,
            });
        }
        self.granules.push(meta.clone());
        Ok(WriteOutcome::Written(meta))
    }

    fn overlaps_span(&self, rec: &GranuleRecord) -> bool {
        let (Some((span_start, span_end)), Some(start)) = (self.span, self.record_start(rec))
        else {
            return false;
        };
        start > span_start - rec.stream().gran_len && start < span_end
    }

    /// Flush partial granules, write overlapping diary granules, aggregates and file
    /// attributes.
    ///
    /// # Errors
    /// Any error encoding or writing.
    pub fn finish(mut self) -> Result<FileSummary<S>> {
        for idx in 0..self.streams.len() {
            if let Some(rec) = self.streams[idx].granulator.flush() {
                self.write_record(rec)?;
            }
        }

        let mut held = mem::take(&mut self.held_diary);
        if let Some(rec) = self.diary.as_mut().and_then(|g| g.flush()) {
            held.push(rec);
        }
        held.sort_by_key(|rec| self.record_start(rec));
        for rec in held {
            if self.overlaps_span(&rec) {
                self.write_record(rec)?;
            } else {
                trace!(%rec, "diary granule outside of file span");
                rec.recycle(&self.ctx.pool);
            }
        }

        let mut by_stream: BTreeMap<&str, Vec<GranuleMeta>> = BTreeMap::default();
        for gran in &self.granules {
            by_stream
                .entry(gran.collection.as_str())
                .or_default()
                .push(gran.clone());
        }
        let mut product_ids = BTreeSet::default();
        for (short_name, granules) in &by_stream {
            let Some(stream) = catalog().stream(short_name) else {
                warn!(short_name, "granules for unknown stream");
                continue;
            };
            if let Some(aggr) = AggrMeta::from_granules(granules) {
                write_aggregate(&mut self.store, &self.ctx.config, stream, &aggr)?;
            }
            product_ids.insert(stream.product_id.clone());
        }

        write_file_attrs(&mut self.store, &self.ctx.config, &self.created)?;
        self.store.finish()?;
        self.ctx.pool.preen();

        let product_ids: Vec<String> = product_ids.into_iter().collect();
        let name = self.span.map(|(start, end)| {
            filename(
                &self.ctx.config,
                &self.created,
                &Time::from_iet(start),
                &Time::from_iet(end),
                &product_ids,
            )
        });
        info!(
            name = name.as_deref().unwrap_or("<empty>"),
            granules = self.granules.len(),
            discarded = self.discarded,
            unknown = self.unknown,
            "closed rdr"
        );

        Ok(FileSummary {
            store: self.store,
            name,
            product_ids,
            granules: self.granules,
            span: self.span,
            discarded: self.discarded,
            unknown: self.unknown,
            created: self.created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::granule_boundary,
        config::get_default,
        granulator::testing::{clock, pool, timed, BASE_TIME, T2020},
        store::MemoryStore,
    };

    const DIARY_LEN: i64 = 20_000_000;

    fn context() -> CollectorContext {
        let config = get_default("npp").unwrap().unwrap();
        CollectorContext::new(Arc::new(config), clock(), pool())
    }

    fn collector(product: &str) -> Collector<MemoryStore> {
        collector_for(&[product])
    }

    fn collector_for(products: &[&str]) -> Collector<MemoryStore> {
        let ctx = context();
        let rdrs: Vec<RdrSpec> = ctx
            .config
            .rdrs
            .iter()
            .filter(|r| products.contains(&r.product.as_str()))
            .cloned()
            .collect();
        Collector::new(ctx, &rdrs, MemoryStore::new(), None).unwrap()
    }

    /// A diary record with `n` DIARY packets in the window starting at `start`.
    fn diary_record(n: u16, start: i64) -> GranuleRecord {
        let pool = pool();
        let mut rec = GranuleRecord::new(catalog().stream("RNSCA").unwrap());
        for i in 0..n {
            let t = start + i64::from(i) * 1_000_000;
            rec.push(&timed(11, i, t, &[0u8; 4]), Some(t), t, &pool);
        }
        rec.set_window(Some((start, start + DIARY_LEN)));
        rec
    }

    #[test]
    fn test_diary_discard_at_97_percent() {
        let mut c = collector("ROTCS");
        let (start, _) = granule_boundary(T2020, DIARY_LEN, BASE_TIME);

        // 2 of 60 expected
        let outcome = c.write_record(diary_record(2, start)).unwrap();
        match outcome {
            WriteOutcome::Discarded { percent_missing } => assert!(percent_missing > 96.0),
            WriteOutcome::Written(_) => panic!("expected discard"),
        }
        assert!(c.granules().is_empty());
        assert!(!c.store().exists("All_Data"));
    }

    #[test]
    fn test_diary_accept_at_95_percent() {
        let mut c = collector("ROTCS");
        let (start, _) = granule_boundary(T2020, DIARY_LEN, BASE_TIME);

        // 3 of 60 expected
        let WriteOutcome::Written(meta) = c.write_record(diary_record(3, start)).unwrap() else {
            panic!("expected write");
        };
        assert!((meta.percent_missing - 95.0).abs() < 1e-4);

        let path = "Data_Products/SPACECRAFT-DIARY-RDR/SPACECRAFT-DIARY-RDR_Gran_0";
        let attr = c
            .store()
            .read_attribute(path, "N_Percent_Missing_Data")
            .unwrap();
        assert!((attr.as_f32().unwrap() - 95.0).abs() < 1e-4);
        // diary does not extend the science span
        assert_eq!(c.span(), None);
    }

    #[test]
    fn test_unknown_and_uncollected() {
        let mut c = collector("ROTCS");
        assert_eq!(c.add(&timed(1000, 1, T2020, &[])).unwrap(), Disposition::Dropped);
        assert_eq!(c.add(&timed(800, 1, T2020, &[0u8; 16])).unwrap(), Disposition::Dropped);
        assert_eq!(c.unknown(), 1);
    }

    #[test]
    fn test_rejects_past_threshold() {
        let mut c = collector("ROTCS");
        let len = catalog().stream("ROTCS").unwrap().gran_len;
        let (start, end) = granule_boundary(T2020, len, BASE_TIME);

        assert_eq!(
            c.add(&timed(560, 1, start + 10, &[0u8; 8])).unwrap(),
            Disposition::Accepted
        );
        assert_eq!(c.threshold(), Some(end));
        assert!(!c.all_rejected());

        assert_eq!(
            c.add(&timed(560, 2, end + 10, &[0u8; 8])).unwrap(),
            Disposition::Rejected
        );
        assert_eq!(c.granules().len(), 1);
        assert!(c.all_rejected());
        // rejected streams stay rejected
        assert_eq!(
            c.add(&timed(560, 3, start + 20, &[0u8; 8])).unwrap(),
            Disposition::Rejected
        );

        let granulator = c.release(catalog().stream("ROTCS").unwrap()).unwrap();
        assert_eq!(granulator.record().window(), Some((end, end + len)));
        assert!(c.release(catalog().stream("ROTCS").unwrap()).is_none());
    }

    #[test]
    fn test_rejects_stream_first_seen_past_threshold() {
        let mut c = collector_for(&["ROTCS", "RONPS"]);
        let len = catalog().stream("ROTCS").unwrap().gran_len;
        let (start, end) = granule_boundary(T2020 + 3_600_000_000, len, BASE_TIME);

        assert_eq!(
            c.add(&timed(560, 1, start + 10_000_000, &[0u8; 8])).unwrap(),
            Disposition::Accepted
        );
        assert_eq!(c.threshold(), Some(end));

        // first RONPS packet opens a window well past the file
        assert_eq!(
            c.add(&timed(565, 1, start + 10 * len, &[0u8; 8])).unwrap(),
            Disposition::Rejected
        );
        assert!(!c.all_rejected());
        assert_eq!(
            c.add(&timed(560, 2, start + 20_000_000, &[0u8; 8])).unwrap(),
            Disposition::Accepted
        );

        let granulator = c.release(catalog().stream("RONPS").unwrap()).unwrap();
        assert_eq!(
            granulator.record().window(),
            Some((start + 10 * len, start + 11 * len))
        );

        let summary = c.finish().unwrap();
        assert_eq!(summary.span, Some((start, end)));
        assert!(summary
            .granules
            .iter()
            .all(|g| g.collection != "OMPS-NP-SCIENCE-RDR"));
    }

    #[test]
    fn test_threshold_is_per_stream() {
        let mut c = collector_for(&["ROTCS", "RONPS"]);
        let len = catalog().stream("ROTCS").unwrap().gran_len;
        let (start, end) = granule_boundary(T2020 + 3_600_000_000, len, BASE_TIME);

        assert_eq!(
            c.add(&timed(560, 1, start + 1_000_000, &[0u8; 8])).unwrap(),
            Disposition::Accepted
        );
        assert_eq!(
            c.add(&timed(565, 1, start + 2_000_000, &[0u8; 8])).unwrap(),
            Disposition::Accepted
        );
        assert_eq!(c.threshold(), Some(end));

        // TC moves past the file while NP is still collecting
        assert_eq!(
            c.add(&timed(560, 2, end + 1_000_000, &[0u8; 8])).unwrap(),
            Disposition::Rejected
        );
        assert!(!c.all_rejected());
        assert_eq!(
            c.add(&timed(565, 2, start + 3_000_000, &[0u8; 8])).unwrap(),
            Disposition::Accepted
        );
        assert_eq!(
            c.add(&timed(560, 3, start + 4_000_000, &[0u8; 8])).unwrap(),
            Disposition::Rejected
        );

        assert_eq!(
            c.add(&timed(565, 3, end + 2_000_000, &[0u8; 8])).unwrap(),
            Disposition::Rejected
        );
        assert!(c.all_rejected());

        let collections: Vec<&str> = c.granules().iter().map(|g| g.collection.as_str()).collect();
        assert_eq!(collections, vec!["OMPS-TC-SCIENCE-RDR", "OMPS-NP-SCIENCE-RDR"]);
    }

    #[test]
    fn test_finish_writes_overlapping_diary() {
        let mut c = collector("ROTCS");
        let len = catalog().stream("ROTCS").unwrap().gran_len;
        let (start, end) = granule_boundary(T2020 + 3_600_000_000, len, BASE_TIME);

        // diary before, during and after the science granule
        let (dstart, _) = granule_boundary(start - DIARY_LEN * 3, DIARY_LEN, BASE_TIME);
        let mut seq = 0;
        let mut t = dstart;
        while t < end + DIARY_LEN * 3 {
            c.add(&timed(11, seq, t, &[0u8; 4])).unwrap();
            if (start..end).contains(&t) {
                c.add(&timed(560, seq, t, &[0u8; 8])).unwrap();
            }
            seq += 1;
            t += 1_000_000;
        }

        let summary = c.finish().unwrap();
        let (span_start, span_end) = summary.span.unwrap();
        assert_eq!(span_start, start);
        assert_eq!(span_end, end);

        let diary: Vec<&GranuleMeta> = summary
            .granules
            .iter()
            .filter(|g| g.collection == "SPACECRAFT-DIARY-RDR")
            .collect();
        assert!(!diary.is_empty());
        for gran in &diary {
            assert!(gran.begin_time_iet > span_start - DIARY_LEN);
            assert!(gran.begin_time_iet < span_end);
        }
        assert_eq!(summary.product_ids, vec!["RNSCA", "ROTCS"]);
        assert!(summary.name.unwrap().starts_with("RNSCA-ROTCS_npp_d2020"));
        assert!(summary
            .store
            .exists("Data_Products/OMPS-TC-SCIENCE-RDR/OMPS-TC-SCIENCE-RDR_Aggr"));
        assert!(summary
            .store
            .exists("Data_Products/SPACECRAFT-DIARY-RDR/SPACECRAFT-DIARY-RDR_Aggr"));
    }

    #[test]
    fn test_protocol_violation_resets() {
        let ctx = context();
        let mut config = (*ctx.config).clone();
        config.granulation.runt_first_granule = false;
        let ctx = CollectorContext::new(Arc::new(config), ctx.clock, ctx.pool);
        let rdrs = vec![RdrSpec {
            product: "RATMS".to_string(),
            packed_with: Vec::default(),
        }];
        let mut c = Collector::new(ctx, &rdrs, MemoryStore::new(), None).unwrap();

        let mut scan_start = [0u8; 10];
        scan_start[6] = 0x80;
        c.add(&timed(528, 1, T2020, &scan_start)).unwrap();
        // consecutive scan starts
        assert!(matches!(
            c.add(&timed(528, 2, T2020 + 10, &scan_start)),
            Err(Error::ProtocolViolation { .. })
        ));
        // reset granulator accepts a new scan start
        assert_eq!(
            c.add(&timed(528, 3, T2020 + 20, &scan_start)).unwrap(),
            Disposition::Accepted
        );
    }
}
