use std::{fs::File, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    catalog::{catalog, InstrumentStream},
    error::{Error, Result},
};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SatSpec {
    pub id: String,
    pub short_name: String,
    /// Mission base time in IET microseconds used for granule boundaries and ids
    pub base_time: i64,
    pub mission: String,
    #[serde(default = "default_orbit_number")]
    pub orbit_number: u64,
}

fn default_orbit_number() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RdrSpec {
    pub product: String,
    #[serde(default)]
    pub packed_with: Vec<String>,
}

impl RdrSpec {
    /// The primary stream for this RDR.
    ///
    /// # Errors
    /// [Error::ConfigInvalid] if the product is not known.
    pub fn stream(&self) -> Result<&'static InstrumentStream> {
        catalog()
            .stream(&self.product)
            .ok_or_else(|| Error::ConfigInvalid(format!("unknown product {}", self.product)))
    }

    /// The packed diary stream, if any.
    ///
    /// # Errors
    /// [Error::ConfigInvalid] if a packed product is not known.
    pub fn diary(&self) -> Result<Option<&'static InstrumentStream>> {
        for id in &self.packed_with {
            let stream = catalog()
                .stream(id)
                .ok_or_else(|| Error::ConfigInvalid(format!("unknown packed product {id}")))?;
            if stream.is_diary() {
                return Ok(Some(stream));
            }
        }
        Ok(None)
    }
}

/// How scan based instruments are granulated.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GranulationMode {
    /// Group by instrument scans
    #[default]
    Scan,
    /// Group purely by packet time
    Time,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GranulationSpec {
    pub atms: GranulationMode,
    pub cris: GranulationMode,
    /// ATMS scans per scan group
    pub scans_per_group: u32,
    pub cris_scans_per_granule: u32,
    /// Emit a short first granule for packets seen before the first scan start
    pub runt_first_granule: bool,
    /// Diary granules missing more than this percent are discarded
    pub diary_missing_ceiling: f32,
    /// Microseconds added to the last OMPS time for packets without their own time
    pub omps_time_increment: i64,
}

impl Default for GranulationSpec {
    fn default() -> Self {
        GranulationSpec {
            atms: GranulationMode::Scan,
            cris: GranulationMode::Scan,
            scans_per_group: 3,
            cris_scans_per_granule: 4,
            runt_first_granule: true,
            diary_missing_ceiling: 96.0,
            omps_time_increment: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileSpec {
    pub granules_per_file: u32,
}

impl Default for FileSpec {
    fn default() -> Self {
        FileSpec {
            granules_per_file: 1,
        }
    }
}

// Per-satellite RDR configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Config {
    pub origin: String,
    pub mode: String,
    pub distributor: String,
    pub satellite: SatSpec,
    pub rdrs: Vec<RdrSpec>,
    #[serde(default)]
    pub granulation: GranulationSpec,
    #[serde(default)]
    pub file: FileSpec,
}

impl Config {
    fn validate(self) -> Result<Self> {
        if self.origin.len() < 3 {
            return Err(Error::ConfigInvalid(format!(
                "origin must be at least 3 characters, got {:?}",
                self.origin
            )));
        }
        if self.rdrs.is_empty() {
            return Err(Error::ConfigInvalid("no rdrs configured".to_string()));
        }
        // Make sure products only specify valid packed products
        for rdr in &self.rdrs {
            let stream = rdr.stream()?;
            if stream.is_diary() {
                return Err(Error::ConfigInvalid(format!(
                    "product {} can only be packed with another product",
                    rdr.product
                )));
            }
            for packed_id in &rdr.packed_with {
                match catalog().stream(packed_id) {
                    Some(s) if s.is_diary() => {}
                    _ => {
                        return Err(Error::ConfigInvalid(format!(
                            "product {} has invalid packed product {}",
                            rdr.product, packed_id
                        )))
                    }
                }
            }
        }
        let gran = &self.granulation;
        if gran.scans_per_group == 0 || gran.cris_scans_per_granule == 0 {
            return Err(Error::ConfigInvalid(
                "scans per granule must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&gran.diary_missing_ceiling) {
            return Err(Error::ConfigInvalid(format!(
                "diary missing ceiling {} is not a percent",
                gran.diary_missing_ceiling
            )));
        }
        if gran.omps_time_increment < 0 {
            return Err(Error::ConfigInvalid(
                "omps time increment must not be negative".to_string(),
            ));
        }
        if self.file.granules_per_file == 0 {
            return Err(Error::ConfigInvalid(
                "granules per file must be greater than 0".to_string(),
            ));
        }

        Ok(self)
    }

    /// # Errors
    /// If the file cannot be read or the config is not valid
    pub fn with_path<P: AsRef<Path>>(fpath: P) -> Result<Config> {
        let fin = File::open(fpath)?;
        let config: Config = serde_yaml::from_reader(fin)?;

        config.validate()
    }

    /// # Errors
    /// If `dat` is not valid config YAML
    pub fn with_data(dat: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(dat)?;
        config.validate()
    }
}

static NPP_CONFIG: &str = include_str!(concat!(env!("OUT_DIR"), "/npp.config.yaml"));
static J01_CONFIG: &str = include_str!(concat!(env!("OUT_DIR"), "/j01.config.yaml"));
static J02_CONFIG: &str = include_str!(concat!(env!("OUT_DIR"), "/j02.config.yaml"));
static J03_CONFIG: &str = include_str!(concat!(env!("OUT_DIR"), "/j03.config.yaml"));

#[must_use]
pub fn get_default_content(satid: &str) -> Option<&'static str> {
    match satid {
        "npp" => Some(NPP_CONFIG),
        "j01" => Some(J01_CONFIG),
        "j02" => Some(J02_CONFIG),
        "j03" => Some(J03_CONFIG),
        _ => None,
    }
}

/// # Errors
/// If the embedded config is not valid
pub fn get_default(satid: &str) -> Result<Option<Config>> {
    match get_default_content(satid) {
        Some(cfg) => Ok(Some(Config::with_data(cfg)?)),
        None => Ok(None),
    }
}
