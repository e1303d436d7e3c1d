use tracing::debug;

use crate::{
    catalog::InstrumentStream,
    config::Config,
    error::Result,
    meta::{AggrMeta, GranuleMeta, ProductMeta, ALL_DATA, DATA_PRODUCTS},
    store::{AttrValue, Handle, ObjectStore},
    time::{attr_date, attr_time, Time},
};

/// Write a string attr truncated to a max len
macro_rules! wattstr {
    ($store:expr, $handle:expr, $name:expr, $value:expr, $maxlen:expr) => {{
        let value: String = $value.chars().take($maxlen).collect();
        $store.write_attribute($handle, $name, AttrValue::Str(value))?;
    }};
}

/// Write a u64 attr
macro_rules! wattu64 {
    ($store:expr, $handle:expr, $name:expr, $value:expr) => {
        $store.write_attribute($handle, $name, AttrValue::U64($value))?
    };
}

fn ensure_group<S: ObjectStore + ?Sized>(store: &mut S, path: &str) -> Result<Handle> {
    if store.exists(path) {
        store.open(path)
    } else {
        store.create_group(path)
    }
}

/// Write the root attributes.
///
/// # Errors
/// Any store error
pub fn write_file_attrs<S: ObjectStore + ?Sized>(
    store: &mut S,
    config: &Config,
    created: &Time,
) -> Result<()> {
    let root = store.open("/")?;
    wattstr!(store, &root, "Distributor", config.distributor, 4);
    wattstr!(store, &root, "Mission_Name", config.satellite.mission, 20);
    wattstr!(store, &root, "Platform_Short_Name", config.satellite.short_name, 3);
    wattstr!(store, &root, "N_Dataset_Source", config.origin, 4);
    wattstr!(store, &root, "N_HDF_Creation_Date", attr_date(created), 8);
    wattstr!(store, &root, "N_HDF_Creation_Time", attr_time(created), 16);
    store.close(root)
}

/// Create Data_Products/<shortname> and set attributes returning group path.
fn write_product_group<S: ObjectStore + ?Sized>(
    store: &mut S,
    product: &ProductMeta,
) -> Result<String> {
    let path = format!("{DATA_PRODUCTS}/{}", product.collection);
    if store.exists(&path) {
        return Ok(path);
    }
    ensure_group(store, DATA_PRODUCTS)?;
    let group = store.create_group(&path)?;
    wattstr!(store, &group, "Instrument_Short_Name", product.instrument, 10);
    wattstr!(store, &group, "N_Collection_Short_Name", product.collection, 20);
    wattstr!(store, &group, "N_Dataset_Type_Tag", product.dataset_type, 3);
    wattstr!(store, &group, "N_Processing_Domain", product.processing_domain, 3);
    store.close(group)?;
    Ok(path)
}

fn write_granule_attrs<S: ObjectStore + ?Sized>(
    store: &mut S,
    handle: &Handle,
    meta: &GranuleMeta,
) -> Result<()> {
    wattstr!(store, handle, "Beginning_Date", meta.begin_date, 8);
    wattstr!(store, handle, "Beginning_Time", meta.begin_time, 16);
    wattstr!(store, handle, "Ending_Date", meta.end_date, 8);
    wattstr!(store, handle, "Ending_Time", meta.end_time, 16);
    wattstr!(store, handle, "N_Creation_Date", meta.creation_date, 8);
    wattstr!(store, handle, "N_Creation_Time", meta.creation_time, 16);
    wattstr!(store, handle, "N_Granule_Status", meta.status, 3);
    wattstr!(store, handle, "N_Granule_Version", meta.version, 2);
    wattstr!(store, handle, "N_JPSS_Document_Ref", meta.jpss_doc, 52);
    wattstr!(store, handle, "N_LEOA_Flag", meta.leoa_flag, 3);
    wattstr!(store, handle, "N_Reference_ID", meta.reference_id, 39);
    wattstr!(store, handle, "N_Granule_ID", meta.id, 15);
    wattstr!(store, handle, "N_IDPS_Mode", meta.idps_mode, 3);
    wattstr!(store, handle, "N_Software_Version", meta.software_version, 19);

    wattu64!(store, handle, "N_Beginning_Orbit_Number", meta.orbit_number);
    wattu64!(store, handle, "N_Beginning_Time_IET", u64::try_from(meta.begin_time_iet)?);
    wattu64!(store, handle, "N_Ending_Time_IET", u64::try_from(meta.end_time_iet)?);

    store.write_attribute(
        handle,
        "N_Packet_Type",
        AttrValue::StrArray(
            meta.packet_type
                .iter()
                .map(|n| n.chars().take(17).collect())
                .collect(),
        ),
    )?;
    store.write_attribute(
        handle,
        "N_Packet_Type_Count",
        AttrValue::U64Array(meta.packet_type_count.clone()),
    )?;
    store.write_attribute(
        handle,
        "N_Percent_Missing_Data",
        AttrValue::F32(meta.percent_missing),
    )?;
    Ok(())
}

/// Write a serialized granule record to All_Data/<shortname>_All/RawApplicationPackets_<idx>
/// and reference it from Data_Products/<shortname>/<shortname>_Gran_<idx>.
///
/// Returns the All_Data dataset path.
///
/// # Errors
/// Any store error, including if the granule index was already written
pub fn write_granule<S: ObjectStore + ?Sized>(
    store: &mut S,
    config: &Config,
    stream: &InstrumentStream,
    idx: usize,
    data: &[u8],
    meta: &GranuleMeta,
) -> Result<String> {
    let short_name = &stream.short_name;
    ensure_group(store, ALL_DATA)?;
    ensure_group(store, &format!("{ALL_DATA}/{short_name}_All"))?;

    let src_path = format!("{ALL_DATA}/{short_name}_All/RawApplicationPackets_{idx}");
    let dataset = store.create_dataset(&src_path, data.len())?;
    store.write_bytes(&dataset, data)?;
    store.close(dataset)?;

    let group_path = write_product_group(store, &ProductMeta::from_stream(stream, &config.mode))?;
    let reference = store.create_reference(&src_path)?;
    let gran_path = format!("{group_path}/{short_name}_Gran_{idx}");
    let gran = store.create_dataset(&gran_path, reference.as_bytes().len())?;
    store.write_bytes(&gran, reference.as_bytes())?;
    write_granule_attrs(store, &gran, meta)?;
    store.close(gran)?;

    debug!(path = %src_path, id = %meta.id, bytes = data.len(), "wrote granule");
    Ok(src_path)
}

/// Write the Data_Products/<shortname>/<shortname>_Aggr dataset referencing the
/// All_Data/<shortname>_All group.
///
/// # Errors
/// Any store error
pub fn write_aggregate<S: ObjectStore + ?Sized>(
    store: &mut S,
    config: &Config,
    stream: &InstrumentStream,
    aggr: &AggrMeta,
) -> Result<()> {
    let short_name = &stream.short_name;
    ensure_group(store, ALL_DATA)?;
    ensure_group(store, &format!("{ALL_DATA}/{short_name}_All"))?;
    let group_path = write_product_group(store, &ProductMeta::from_stream(stream, &config.mode))?;

    let reference = store.create_reference(&format!("{ALL_DATA}/{short_name}_All"))?;
    let path = format!("{group_path}/{short_name}_Aggr");
    let dataset = store.create_dataset(&path, reference.as_bytes().len())?;
    store.write_bytes(&dataset, reference.as_bytes())?;

    wattu64!(store, &dataset, "AggregateBeginningOrbitNumber", aggr.begin_orbit_number);
    wattu64!(store, &dataset, "AggregateEndingOrbitNumber", aggr.end_orbit_number);
    wattu64!(store, &dataset, "AggregateNumberGranules", aggr.num_granules);
    for (name, val) in [
        ("AggregateBeginningDate", &aggr.begin_date),
        ("AggregateBeginningTime", &aggr.begin_time),
        ("AggregateBeginningGranuleID", &aggr.begin_granule_id),
        ("AggregateEndingDate", &aggr.end_date),
        ("AggregateEndingTime", &aggr.end_time),
        ("AggregateEndingGranuleID", &aggr.end_granule_id),
    ] {
        store.write_attribute(&dataset, name, AttrValue::Str(val.clone()))?;
    }
    store.close(dataset)
}

#[cfg(test)]
mod tests {
    use hifitime::Epoch;

    use super::*;
    use crate::{
        catalog::catalog,
        config::get_default,
        meta::Meta,
        record::ApidInfo,
        store::MemoryStore,
    };

    fn created() -> Time {
        Time::from_epoch(Epoch::from_gregorian_utc(2020, 1, 1, 12, 13, 14, 0))
    }

    fn granule(config: &Config, stream: &InstrumentStream, n: i64) -> GranuleMeta {
        let start = created().iet() + n * stream.gran_len;
        let apids = vec![ApidInfo {
            name: "DIARY".to_string(),
            value: 11,
            pkt_tracker_start_idx: 0,
            pkts_expected: 20,
            pkts_received: 18,
        }];
        GranuleMeta::new(
            config,
            stream,
            (start, start + stream.gran_len),
            &created(),
            &apids,
            10.0,
        )
        .unwrap()
    }

    #[test]
    fn test_write_and_read_back() {
        let config = get_default("npp").unwrap().unwrap();
        let stream = catalog().stream("RNSCA").unwrap();
        let mut store = MemoryStore::new();

        write_file_attrs(&mut store, &config, &created()).unwrap();
        let granules = vec![granule(&config, stream, 0), granule(&config, stream, 1)];
        for (idx, gran) in granules.iter().enumerate() {
            let path = write_granule(&mut store, &config, stream, idx, &[idx as u8; 10], gran)
                .unwrap();
            assert_eq!(
                path,
                format!("All_Data/SPACECRAFT-DIARY-RDR_All/RawApplicationPackets_{idx}")
            );
        }
        let aggr = AggrMeta::from_granules(&granules).unwrap();
        write_aggregate(&mut store, &config, stream, &aggr).unwrap();

        let reference = store
            .read_reference("Data_Products/SPACECRAFT-DIARY-RDR/SPACECRAFT-DIARY-RDR_Gran_1")
            .unwrap();
        assert_eq!(store.read_bytes(&reference.path).unwrap(), vec![1u8; 10]);

        let meta = Meta::from_store(&store).unwrap();
        assert_eq!(meta.distributor, "ssec");
        assert_eq!(meta.platform, "NPP");
        assert_eq!(meta.creation_time, "121314.000000Z");
        let product = &meta.products["SPACECRAFT-DIARY-RDR"];
        assert_eq!(product.instrument, "SPACECRAFT");
        assert_eq!(product.dataset_type, "RDR");
        assert_eq!(meta.granules["SPACECRAFT-DIARY-RDR"], granules);
        assert_eq!(meta.aggregates["SPACECRAFT-DIARY-RDR"], aggr);
    }

    #[test]
    fn test_duplicate_granule_index() {
        let config = get_default("npp").unwrap().unwrap();
        let stream = catalog().stream("RNSCA").unwrap();
        let mut store = MemoryStore::new();
        let gran = granule(&config, stream, 0);

        write_granule(&mut store, &config, stream, 0, &[0; 4], &gran).unwrap();
        assert!(write_granule(&mut store, &config, stream, 0, &[0; 4], &gran).is_err());
    }
}
