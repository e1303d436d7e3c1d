use anyhow::{Context, Result};
use std::path::Path;

use rdrgen::{DirStore, Meta};

/// Load the metadata of the RDR at `input`, keeping only the collection `short_name`
/// and granules with id `granule_id` when given.
pub fn load<P: AsRef<Path>>(
    input: P,
    short_name: Option<&str>,
    granule_id: Option<&str>,
) -> Result<Meta> {
    let input = input.as_ref();
    let store = DirStore::open(input).with_context(|| format!("opening {input:?}"))?;
    let mut meta = Meta::from_store(&store).context("reading rdr metadata")?;

    if let Some(short_name) = short_name {
        meta.products.retain(|s, _| s == short_name);
        meta.granules.retain(|s, _| s == short_name);
        meta.aggregates.retain(|s, _| s == short_name);
    }

    if let Some(granule_id) = granule_id {
        for granules in meta.granules.values_mut() {
            granules.retain(|g| g.id == granule_id);
        }
    }

    Ok(meta)
}

pub fn info<P: AsRef<Path>>(
    input: P,
    short_name: Option<String>,
    granule_id: Option<String>,
) -> Result<()> {
    let meta = load(input, short_name.as_deref(), granule_id.as_deref())?;

    print!("{}", serde_json::to_string_pretty(&meta)?);

    Ok(())
}
