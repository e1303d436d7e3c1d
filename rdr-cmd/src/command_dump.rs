use anyhow::{bail, Context, Result};
use rdrgen::{CommonRdr, DirStore, ObjectStore};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

const ALL_DATA: &str = "All_Data";

/// Write the packets of every granule of the collection group `group` to `dest`,
/// returning the number of packets written.
fn dump_group(store: &DirStore, group: &str, dest: &Path) -> Result<usize> {
    let mut file = BufWriter::new(File::create(dest).context("opening packet dest file")?);
    let mut count = 0;
    for name in store.list(group)? {
        let path = format!("{group}/{name}");
        let data = store.read_bytes(&path)?;
        let rdr = match CommonRdr::from_bytes(&data) {
            Ok(rdr) => rdr,
            Err(err) => {
                warn!(%path, "skipping invalid common rdr: {err}");
                continue;
            }
        };
        for pkt in rdr.packets(&data)? {
            file.write_all(pkt)?;
            count += 1;
        }
        debug!(%path, packets = rdr.packet_trackers.len(), "dumped granule");
    }
    file.flush()?;
    Ok(count)
}

/// Extract the application packets from the RDR `input` to one file per collection in
/// `outdir`, optionally only for the collection `short_name`.
pub fn dump(input: &Path, outdir: &Path, short_name: Option<&str>) -> Result<Vec<PathBuf>> {
    let store = DirStore::open(input).with_context(|| format!("opening {input:?}"))?;
    if !outdir.exists() {
        fs::create_dir_all(outdir).with_context(|| format!("creating {outdir:?}"))?;
    }
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut files = Vec::default();
    for group in store.list(ALL_DATA)? {
        let Some(collection) = group.strip_suffix("_All") else {
            continue;
        };
        if short_name.is_some_and(|s| s != collection) {
            continue;
        }
        let dest = outdir.join(format!("{stem}.{collection}.dat"));
        let count = dump_group(&store, &format!("{ALL_DATA}/{group}"), &dest)?;
        debug!(collection, packets = count, "dumped collection");
        files.push(dest);
    }
    if let Some(short_name) = short_name {
        if files.is_empty() {
            bail!("{short_name} not found in {input:?}");
        }
    }

    Ok(files)
}
