use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    catalog::InstrumentStream,
    clock::granule_id,
    config::Config,
    error::{Error, Result},
    record::ApidInfo,
    store::ObjectStore,
    time::{attr_date, attr_time, Time},
};

pub(crate) const ALL_DATA: &str = "All_Data";
pub(crate) const DATA_PRODUCTS: &str = "Data_Products";

fn attr_string<S: ObjectStore + ?Sized>(store: &S, path: &str, name: &str) -> Result<String> {
    let value = store.read_attribute(path, name)?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::store(path, format!("attribute {name} is not a string")))
}

fn attr_u64<S: ObjectStore + ?Sized>(store: &S, path: &str, name: &str) -> Result<u64> {
    store
        .read_attribute(path, name)?
        .as_u64()
        .ok_or_else(|| Error::store(path, format!("attribute {name} is not a u64")))
}

fn attr_i64<S: ObjectStore + ?Sized>(store: &S, path: &str, name: &str) -> Result<i64> {
    Ok(i64::try_from(attr_u64(store, path, name)?)?)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AggrMeta {
    pub begin_orbit_number: u64,
    pub end_orbit_number: u64,
    pub num_granules: u64,
    pub begin_date: String,
    pub begin_time: String,
    pub begin_granule_id: String,
    pub end_date: String,
    pub end_time: String,
    pub end_granule_id: String,
}

impl AggrMeta {
    /// Create meta spanning the provided granules. `None` if there are none.
    #[must_use]
    pub fn from_granules(granules: &[GranuleMeta]) -> Option<Self> {
        let start = granules.iter().min_by_key(|g| g.begin_time_iet)?;
        let end = granules.iter().max_by_key(|g| g.end_time_iet)?;
        Some(Self {
            begin_orbit_number: start.orbit_number,
            end_orbit_number: end.orbit_number,
            num_granules: granules.len() as u64,
            begin_date: start.begin_date.clone(),
            begin_time: start.begin_time.clone(),
            begin_granule_id: start.id.clone(),
            end_date: end.end_date.clone(),
            end_time: end.end_time.clone(),
            end_granule_id: end.id.clone(),
        })
    }

    pub(crate) fn from_store<S: ObjectStore + ?Sized>(store: &S, path: &str) -> Result<Self> {
        Ok(Self {
            begin_orbit_number: attr_u64(store, path, "AggregateBeginningOrbitNumber")?,
            end_orbit_number: attr_u64(store, path, "AggregateEndingOrbitNumber")?,
            num_granules: attr_u64(store, path, "AggregateNumberGranules")?,
            begin_date: attr_string(store, path, "AggregateBeginningDate")?,
            begin_time: attr_string(store, path, "AggregateBeginningTime")?,
            begin_granule_id: attr_string(store, path, "AggregateBeginningGranuleID")?,
            end_date: attr_string(store, path, "AggregateEndingDate")?,
            end_time: attr_string(store, path, "AggregateEndingTime")?,
            end_granule_id: attr_string(store, path, "AggregateEndingGranuleID")?,
        })
    }
}

/// Metadata associated with a particular granule dataset from RDR path
/// /Data_Products/<collection>/<collection>_Gran_<x>.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GranuleMeta {
    pub instrument: String,
    pub collection: String,
    pub begin_date: String,
    pub begin_time: String,
    pub begin_time_iet: i64,
    pub end_date: String,
    pub end_time: String,
    pub end_time_iet: i64,
    pub creation_date: String,
    pub creation_time: String,
    pub orbit_number: u64,
    pub id: String,
    pub status: String,
    pub version: String,
    pub idps_mode: String,
    pub jpss_doc: String,
    pub leoa_flag: String,
    pub packet_type: Vec<String>,
    pub packet_type_count: Vec<u64>,
    pub percent_missing: f32,
    pub reference_id: String,
    pub software_version: String,
}

impl GranuleMeta {
    const DEFAULT_VERSION: &'static str = "A1";
    const DEFAULT_STATUS: &'static str = "N/A";
    const DEFAULT_LEOA_FLAG: &'static str = "Off";

    /// Metadata for a granule of `stream` spanning `start` to `end` IET.
    ///
    /// Packet types include only APIDs with packets, sorted by name.
    ///
    /// # Errors
    /// [Error::InvalidGranuleStart] if `start` is before the satellite base time.
    pub fn new(
        config: &Config,
        stream: &InstrumentStream,
        (start, end): (i64, i64),
        created: &Time,
        apid_list: &[ApidInfo],
        percent_missing: f32,
    ) -> Result<Self> {
        let sat = &config.satellite;
        let id = granule_id(&sat.short_name, sat.base_time, start)?;
        let begin = Time::from_iet(start);
        let end_time = Time::from_iet(end);

        let mut types: Vec<&ApidInfo> = apid_list.iter().filter(|a| a.pkts_received > 0).collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self {
            instrument: stream.sensor.clone(),
            collection: stream.short_name.clone(),
            begin_date: attr_date(&begin),
            begin_time: attr_time(&begin),
            begin_time_iet: start,
            end_date: attr_date(&end_time),
            end_time: attr_time(&end_time),
            end_time_iet: end,
            creation_date: attr_date(created),
            creation_time: attr_time(created),
            orbit_number: sat.orbit_number,
            reference_id: format!("{}:{}:{}", stream.short_name, id, Self::DEFAULT_VERSION),
            id,
            status: Self::DEFAULT_STATUS.to_string(),
            version: Self::DEFAULT_VERSION.to_string(),
            idps_mode: config.mode.clone(),
            jpss_doc: String::new(),
            leoa_flag: Self::DEFAULT_LEOA_FLAG.to_string(),
            packet_type: types.iter().map(|a| a.name.clone()).collect(),
            packet_type_count: types.iter().map(|a| u64::from(a.pkts_received)).collect(),
            percent_missing,
            software_version: concat!("rdrgen-", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    /// Read granule metadata from the attributes of the dataset at `path`.
    pub(crate) fn from_store<S: ObjectStore + ?Sized>(
        store: &S,
        instrument: &str,
        collection: &str,
        path: &str,
    ) -> Result<Self> {
        let attr = |name: &str| attr_string(store, path, name);
        let packet_type = store
            .read_attribute(path, "N_Packet_Type")?
            .as_str_array()
            .map(<[String]>::to_vec)
            .ok_or_else(|| Error::store(path, "N_Packet_Type is not a string array"))?;
        let packet_type_count = store
            .read_attribute(path, "N_Packet_Type_Count")?
            .as_u64_array()
            .map(<[u64]>::to_vec)
            .ok_or_else(|| Error::store(path, "N_Packet_Type_Count is not a u64 array"))?;
        let percent_missing = store
            .read_attribute(path, "N_Percent_Missing_Data")?
            .as_f32()
            .ok_or_else(|| Error::store(path, "N_Percent_Missing_Data is not a f32"))?;

        Ok(Self {
            instrument: instrument.to_string(),
            collection: collection.to_string(),
            begin_date: attr("Beginning_Date")?,
            begin_time: attr("Beginning_Time")?,
            begin_time_iet: attr_i64(store, path, "N_Beginning_Time_IET")?,
            end_date: attr("Ending_Date")?,
            end_time: attr("Ending_Time")?,
            end_time_iet: attr_i64(store, path, "N_Ending_Time_IET")?,
            creation_date: attr("N_Creation_Date")?,
            creation_time: attr("N_Creation_Time")?,
            orbit_number: attr_u64(store, path, "N_Beginning_Orbit_Number")?,
            id: attr("N_Granule_ID")?,
            status: attr("N_Granule_Status")?,
            version: attr("N_Granule_Version")?,
            idps_mode: attr("N_IDPS_Mode")?,
            jpss_doc: attr("N_JPSS_Document_Ref")?,
            leoa_flag: attr("N_LEOA_Flag")?,
            packet_type,
            packet_type_count,
            percent_missing,
            reference_id: attr("N_Reference_ID")?,
            software_version: attr("N_Software_Version")?,
        })
    }
}

/// Metadata associated with a particular product group from RDR path
/// /Data_Products/<collection>
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProductMeta {
    pub instrument: String,
    pub collection: String,
    pub processing_domain: String,
    pub dataset_type: String,
}

impl ProductMeta {
    const DEFAULT_TYPE_TAG: &'static str = "RDR";

    #[must_use]
    pub fn from_stream(stream: &InstrumentStream, mode: &str) -> Self {
        Self {
            instrument: stream.sensor.clone(),
            collection: stream.short_name.clone(),
            processing_domain: mode.to_string(),
            dataset_type: Self::DEFAULT_TYPE_TAG.to_string(),
        }
    }

    fn from_store<S: ObjectStore + ?Sized>(store: &S, path: &str) -> Result<Self> {
        Ok(Self {
            instrument: attr_string(store, path, "Instrument_Short_Name")?,
            collection: attr_string(store, path, "N_Collection_Short_Name")?,
            processing_domain: attr_string(store, path, "N_Processing_Domain")?,
            dataset_type: attr_string(store, path, "N_Dataset_Type_Tag")?,
        })
    }
}

/// RDR metadata generally representing the attributes available in an RDR file.
#[derive(Debug, Clone, Serialize)]
pub struct Meta {
    pub distributor: String,
    pub mission: String,
    pub dataset_source: String,
    pub platform: String,
    pub creation_date: String,
    pub creation_time: String,
    /// Product name to metadata
    pub products: BTreeMap<String, ProductMeta>,
    /// Product name to the granules for that product
    pub granules: BTreeMap<String, Vec<GranuleMeta>>,
    /// Product name to the aggregate for that product
    pub aggregates: BTreeMap<String, AggrMeta>,
}

impl Meta {
    /// Read all metadata from an RDR store.
    ///
    /// # Errors
    /// If any expected object or attribute is missing.
    pub fn from_store<S: ObjectStore + ?Sized>(store: &S) -> Result<Self> {
        let root = "/";
        let mut meta = Meta {
            distributor: attr_string(store, root, "Distributor")?,
            mission: attr_string(store, root, "Mission_Name")?,
            dataset_source: attr_string(store, root, "N_Dataset_Source")?,
            platform: attr_string(store, root, "Platform_Short_Name")?,
            creation_date: attr_string(store, root, "N_HDF_Creation_Date")?,
            creation_time: attr_string(store, root, "N_HDF_Creation_Time")?,
            products: BTreeMap::default(),
            granules: BTreeMap::default(),
            aggregates: BTreeMap::default(),
        };

        for name in store.list(DATA_PRODUCTS)? {
            let group_path = format!("{DATA_PRODUCTS}/{name}");
            let product = ProductMeta::from_store(store, &group_path)?;
            for dataset in store.list(&group_path)? {
                let path = format!("{group_path}/{dataset}");
                if dataset.ends_with("_Aggr") {
                    meta.aggregates
                        .insert(name.clone(), AggrMeta::from_store(store, &path)?);
                    continue;
                }
                let gran = GranuleMeta::from_store(
                    store,
                    &product.instrument,
                    &product.collection,
                    &path,
                )?;
                meta.granules.entry(name.clone()).or_default().push(gran);
            }
            meta.products.insert(name, product);
        }

        Ok(meta)
    }
}

/// Create an IDPS style RDR filename, without an extension.
#[must_use]
pub fn filename(
    config: &Config,
    created: &Time,
    start: &Time,
    end: &Time,
    product_ids: &[String],
) -> String {
    let (sy, sm, sd, shh, smm, sss, sns) = start.utc_fields();
    let (_, _, _, ehh, emm, ess, ens) = end.utc_fields();
    let (cy, cm, cd, chh, cmm, css, cns) = created.utc_fields();
    let origin: String = config.origin.chars().take(3).collect();
    format!(
        "{}_{}_d{sy:04}{sm:02}{sd:02}_t{shh:02}{smm:02}{sss:02}{}_e{ehh:02}{emm:02}{ess:02}{}_b{:05}_c{cy:04}{cm:02}{cd:02}{chh:02}{cmm:02}{css:02}{:06}_{}u_{}",
        product_ids.join("-"),
        config.satellite.id,
        sns / 100_000_000,
        ens / 100_000_000,
        config.satellite.orbit_number,
        cns / 1000,
        origin,
        config.mode,
    )
}
