use anyhow::{anyhow, bail, Context, Result};
use ccsds::spacepacket::{decode_packets, Packet};
use crossbeam::channel::{self, Receiver, Sender};
use rdrgen::{
    config::{Config, RdrSpec},
    BaseTimes, CollectorContext, DirStore, Error, FileSummary, LeapSeconds, MissionClock,
    PacketExt, PacketPool, RdrBuilder,
};
use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
    process,
    sync::Arc,
    thread,
};
use tracing::{debug, info, warn};

/// Packets buffered between the reader and the builders
const PACKET_BUFFER: usize = 4096;

fn read_inputs(inputs: &[PathBuf], tx: &Sender<Packet>) -> Result<u64> {
    let mut count = 0;
    for path in inputs {
        let file = BufReader::new(File::open(path).with_context(|| format!("opening {path:?}"))?);
        for result in decode_packets(file) {
            match result {
                Ok(pkt) => {
                    if tx.send(pkt).is_err() {
                        debug!("builders stopped; ending read");
                        return Ok(count);
                    }
                    count += 1;
                }
                Err(err) => {
                    warn!(?path, "failed reading packets: {err}");
                    break;
                }
            }
        }
        debug!(?path, "finished reading");
    }
    Ok(count)
}

/// Move a closed file to its final name, or remove it if it has no granules.
fn finalize(output: &Path, summary: FileSummary<DirStore>) -> Result<Option<PathBuf>> {
    let root = summary.store.root().to_path_buf();
    if summary.unknown > 0 {
        debug!(unknown = summary.unknown, "dropped packets with unknown apids");
    }
    let Some(name) = summary.name else {
        debug!(?root, "no granules written; removing");
        fs::remove_dir_all(&root).with_context(|| format!("removing {root:?}"))?;
        return Ok(None);
    };
    let dest = output.join(format!("{name}.rdr"));
    if dest.exists() {
        bail!("output already exists: {dest:?}");
    }
    fs::rename(&root, &dest).with_context(|| format!("renaming {root:?} to {dest:?}"))?;
    info!(
        granules = summary.granules.len(),
        discarded = summary.discarded,
        "wrote {dest:?}"
    );
    Ok(Some(dest))
}

fn build(
    ctx: &CollectorContext,
    rdrs: &[RdrSpec],
    output: &Path,
    rx: Receiver<Packet>,
) -> Result<Vec<PathBuf>> {
    let pid = process::id();
    let mut builders: Vec<_> = rdrs
        .iter()
        .map(|rdr| {
            let product = rdr.product.clone();
            let output = output.to_path_buf();
            let mut num = 0;
            let open = move || {
                num += 1;
                DirStore::create(output.join(format!(".{product}-{pid}-{num}.partial")))
            };
            RdrBuilder::new(ctx.clone(), std::slice::from_ref(rdr), open)
        })
        .collect();

    let mut written = Vec::default();
    let mut violations = 0;
    for pkt in rx {
        for builder in &mut builders {
            match builder.add(&pkt) {
                Ok(files) => {
                    for summary in files {
                        written.extend(finalize(output, summary)?);
                    }
                }
                Err(Error::ProtocolViolation { stream, msg }) => {
                    violations += 1;
                    warn!(%stream, apid = pkt.apid(), "dropping packet: {msg}");
                }
                Err(err) => return Err(err).context("building rdrs"),
            }
        }
    }
    for builder in &mut builders {
        for summary in builder.finish().context("closing rdrs")? {
            written.extend(finalize(output, summary)?);
        }
    }
    if violations > 0 {
        warn!(violations, "packets dropped due to granulation protocol violations");
    }
    Ok(written)
}

/// Generate RDRs for every product in `config` from the packets in `inputs`, returning
/// the paths of the RDRs written to `output`.
pub fn create(
    config: Config,
    leaps: Arc<LeapSeconds>,
    inputs: &[PathBuf],
    output: &Path,
) -> Result<Vec<PathBuf>> {
    for input in inputs {
        if !input.exists() {
            bail!("Input does not exist: {input:?}");
        }
    }
    if !output.exists() {
        fs::create_dir_all(output).with_context(|| format!("creating {output:?}"))?;
    }

    let bases = Arc::new(BaseTimes::new(Some(config.satellite.base_time)));
    let clock = Arc::new(MissionClock::new(leaps, bases));
    let rdrs = config.rdrs.clone();
    let ctx = CollectorContext::new(Arc::new(config), clock, Arc::new(PacketPool::new()));

    let (tx, rx) = channel::bounded(PACKET_BUFFER);
    thread::scope(|s| {
        let reader = s.spawn(move || read_inputs(inputs, &tx));
        let written = build(&ctx, &rdrs, output, rx);
        let count = reader
            .join()
            .map_err(|_| anyhow!("packet reader panicked"))??;
        info!(packets = count, "finished reading inputs");
        written
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdrgen::{
        config::get_default, encode_packet, granule_boundary, Meta, MissionTime, ObjectStore,
        SEQ_UNSEGMENTED,
    };
    use std::io::{BufWriter, Write};

    // 2020-01-01T01:00:00Z as IET
    const T0: i64 = 1_956_528_037_000_000 + 3_600_000_000;
    const TC_LEN: i64 = 37_375_000;

    fn packet(apid: u16, seq: u16, iet: i64) -> Vec<u8> {
        let tc = MissionTime::from_micros(iet - 37_000_000).unwrap().packed();
        encode_packet(apid, SEQ_UNSEGMENTED, seq, Some(tc), &[0x11; 40])
    }

    fn write_input(path: &Path, start: i64, seconds: u16) {
        let mut file = BufWriter::new(File::create(path).unwrap());
        for seq in 0..seconds {
            let t = start + i64::from(seq) * 1_000_000;
            file.write_all(&packet(0, seq, t)).unwrap();
            file.write_all(&packet(560, seq, t)).unwrap();
        }
        file.flush().unwrap();
    }

    #[test]
    fn test_create() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.dat");
        let mut config = get_default("npp").unwrap().unwrap();
        config.rdrs.retain(|r| r.product == "ROTCS");
        let (start, _) = granule_boundary(T0, TC_LEN, config.satellite.base_time);
        // 3 granules at 1Hz
        write_input(&input, start, 112);
        let output = dir.path().join("output");

        let written = create(config, LeapSeconds::embedded(), &[input], &output).unwrap();

        assert_eq!(written.len(), 3, "{written:?}");
        let mut entries: Vec<_> = fs::read_dir(&output)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        entries.sort();
        let mut expected = written.clone();
        expected.sort();
        assert_eq!(entries, expected, "partial files left behind");

        for path in &written {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("RNSCA-ROTCS_npp_d20200101_t"), "{name}");
            assert!(name.ends_with(".rdr"));
            let store = DirStore::open(path).unwrap();
            let meta = Meta::from_store(&store).unwrap();
            assert_eq!(meta.granules["OMPS-TC-SCIENCE-RDR"].len(), 1);
            assert!(store.exists("All_Data/SPACECRAFT-DIARY-RDR_All"));
        }
    }

    #[test]
    fn test_create_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let config = get_default("npp").unwrap().unwrap();
        let result = create(
            config,
            LeapSeconds::embedded(),
            &[dir.path().join("missing.dat")],
            dir.path(),
        );
        assert!(result.is_err());
    }
}
