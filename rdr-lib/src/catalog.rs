//! Static packet and stream tables.
//!
//! Every RDR collection this crate can produce is described here, along with the APIDs it
//! accepts. Granule rules are tied to the [Instrument] family, not configured at runtime.
use std::collections::HashMap;

use lazy_static::lazy_static;
use serde::Serialize;

use crate::packet::Apid;

/// Instrument families with their own granulation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Instrument {
    Atms,
    Cris,
    Viirs,
    OmpsTc,
    OmpsNp,
    Spacecraft,
}

impl Instrument {
    pub const ALL: [Instrument; 6] = [
        Instrument::Atms,
        Instrument::Cris,
        Instrument::Viirs,
        Instrument::OmpsTc,
        Instrument::OmpsNp,
        Instrument::Spacecraft,
    ];

    /// Granule duration in microseconds.
    #[must_use]
    pub const fn granule_duration(self) -> i64 {
        match self {
            Instrument::Atms | Instrument::Cris => 31_997_000,
            Instrument::Viirs => 85_350_000,
            Instrument::OmpsTc | Instrument::OmpsNp => 37_375_000,
            Instrument::Spacecraft => 20_000_000,
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A single packet type within a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacketIdentity {
    pub name: String,
    pub apid: Apid,
    pub description: String,
    /// Number of packets in one segmented packet group.
    pub group_size: u32,
    /// Packets expected in a complete granule.
    pub expected: u32,
}

impl PacketIdentity {
    fn new(name: &str, apid: Apid, description: &str, group_size: u32, expected: u32) -> Self {
        PacketIdentity {
            name: name.to_string(),
            apid,
            description: description.to_string(),
            group_size,
            expected,
        }
    }
}

/// One RDR output collection, e.g., `VIIRS-SCIENCE-RDR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentStream {
    /// Collection short name
    pub short_name: String,
    /// IDPS product id used in file names, e.g., `RVIRS`
    pub product_id: String,
    pub sensor: String,
    pub type_id: String,
    pub instrument: Instrument,
    /// Granule length in microseconds
    pub gran_len: i64,
    /// Accepted packet types, sorted by APID
    pub identities: Vec<PacketIdentity>,
}

impl InstrumentStream {
    fn new(
        short_name: &str,
        product_id: &str,
        sensor: &str,
        instrument: Instrument,
        mut identities: Vec<PacketIdentity>,
    ) -> Self {
        identities.sort_by_key(|i| i.apid);
        InstrumentStream {
            short_name: short_name.to_string(),
            product_id: product_id.to_string(),
            sensor: sensor.to_string(),
            type_id: if instrument == Instrument::Spacecraft {
                "DIARY".to_string()
            } else {
                "SCIENCE".to_string()
            },
            instrument,
            gran_len: instrument.granule_duration(),
            identities,
        }
    }

    #[must_use]
    pub fn identity(&self, apid: Apid) -> Option<&PacketIdentity> {
        self.identities
            .binary_search_by_key(&apid, |i| i.apid)
            .ok()
            .map(|idx| &self.identities[idx])
    }

    /// Total number of packets expected in a complete granule.
    #[must_use]
    pub fn expected_packets(&self) -> u64 {
        self.identities.iter().map(|i| u64::from(i.expected)).sum()
    }

    #[must_use]
    pub fn is_diary(&self) -> bool {
        self.instrument == Instrument::Spacecraft
    }
}

/// Lookup tables from APIDs to their identity and owning stream.
#[derive(Debug)]
pub struct PacketCatalog {
    streams: Vec<InstrumentStream>,
    by_apid: HashMap<Apid, usize>,
}

impl PacketCatalog {
    fn from_streams(streams: Vec<InstrumentStream>) -> Self {
        let mut by_apid = HashMap::default();
        for (idx, stream) in streams.iter().enumerate() {
            for ident in &stream.identities {
                by_apid.insert(ident.apid, idx);
            }
        }
        PacketCatalog { streams, by_apid }
    }

    #[must_use]
    pub fn identify(&self, apid: Apid) -> Option<&PacketIdentity> {
        self.stream_of(apid).and_then(|s| s.identity(apid))
    }

    #[must_use]
    pub fn stream_of(&self, apid: Apid) -> Option<&InstrumentStream> {
        self.by_apid.get(&apid).map(|idx| &self.streams[*idx])
    }

    /// Lookup a stream by either its collection short name or product id.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&InstrumentStream> {
        self.streams
            .iter()
            .find(|s| s.short_name == name || s.product_id == name)
    }

    #[must_use]
    pub fn streams(&self) -> &[InstrumentStream] {
        &self.streams
    }
}

// VIIRS science bands in APID order
const VIIRS_BANDS: [&str; 22] = [
    "M04", "M05", "M03", "M02", "M01", "M06", "M07", "M09", "M10", "M08", "M11", "M13", "M12",
    "I04", "M16", "M15", "M14", "I05", "I01", "I02", "I03", "DNB",
];
pub const VIIRS_FIRST_BAND_APID: Apid = 800;
pub const VIIRS_CAL_APID: Apid = 825;
pub const VIIRS_ENG_APID: Apid = 826;
// 48 scans per 85.35s granule
const VIIRS_SCANS: u32 = 48;

pub const ATMS_SCIENCE_APID: Apid = 528;
pub const ATMS_HEALTH_APID: Apid = 531;

pub const CRIS_EIGHT_SEC_APID: Apid = 1289;
const CRIS_FIRST_SCIENCE_APID: Apid = 1315;
// 4 x 8s scans per granule
const CRIS_SCANS: u32 = 4;

fn atms_stream() -> InstrumentStream {
    // 12 scans of 8/3 seconds per granule, 104 beam positions per scan
    InstrumentStream::new(
        "ATMS-SCIENCE-RDR",
        "RATMS",
        "ATMS",
        Instrument::Atms,
        vec![
            PacketIdentity::new("DWELL", 515, "diagnostic dwell", 1, 0),
            PacketIdentity::new(
                "SCIENCE",
                ATMS_SCIENCE_APID,
                "radiometric science",
                1,
                1248,
            ),
            PacketIdentity::new("CALIBRATION", 530, "calibration", 1, 12),
            PacketIdentity::new(
                "ENGINEERING_HS",
                ATMS_HEALTH_APID,
                "health and status",
                1,
                12,
            ),
            PacketIdentity::new("ENG_TEMPS", 536, "hot calibration temps", 1, 1),
        ],
    )
}

fn cris_stream() -> InstrumentStream {
    let mut identities = vec![
        PacketIdentity::new(
            "EIGHT_S_SCI",
            CRIS_EIGHT_SEC_APID,
            "8 second science",
            1,
            CRIS_SCANS,
        ),
        PacketIdentity::new("ENGINEERING", 1290, "engineering", 1, CRIS_SCANS),
    ];
    // 27 views per spectral band
    for (band_idx, band) in (0u16..).zip(["LW", "MW", "SW"]) {
        for view in 0..27u16 {
            let apid = CRIS_FIRST_SCIENCE_APID + band_idx * 27 + view;
            identities.push(PacketIdentity::new(
                &format!("{band}_FOV{view:02}"),
                apid,
                &format!("{band} interferogram"),
                1,
                CRIS_SCANS * 30,
            ));
        }
    }
    InstrumentStream::new(
        "CRIS-SCIENCE-RDR",
        "RCRIS",
        "CrIS",
        Instrument::Cris,
        identities,
    )
}

fn viirs_stream() -> InstrumentStream {
    let mut identities = Vec::default();
    for (apid, band) in (VIIRS_FIRST_BAND_APID..).zip(VIIRS_BANDS) {
        identities.push(PacketIdentity::new(
            band,
            apid,
            &format!("{band} band science"),
            17,
            VIIRS_SCANS * 17,
        ));
    }
    identities.push(PacketIdentity::new(
        "CAL",
        VIIRS_CAL_APID,
        "calibration",
        5,
        VIIRS_SCANS * 5,
    ));
    identities.push(PacketIdentity::new(
        "ENG",
        VIIRS_ENG_APID,
        "engineering",
        1,
        VIIRS_SCANS,
    ));
    InstrumentStream::new(
        "VIIRS-SCIENCE-RDR",
        "RVIRS",
        "VIIRS",
        Instrument::Viirs,
        identities,
    )
}

fn omps_tc_stream() -> InstrumentStream {
    InstrumentStream::new(
        "OMPS-TC-SCIENCE-RDR",
        "ROTCS",
        "OMPS",
        Instrument::OmpsTc,
        vec![
            PacketIdentity::new("TC_SCIENCE", 560, "total column science", 10, 50),
            PacketIdentity::new("TC_CAL", 561, "total column calibration", 10, 0),
            PacketIdentity::new("TC_DIAG", 562, "total column diagnostic", 1, 0),
        ],
    )
}

fn omps_np_stream() -> InstrumentStream {
    InstrumentStream::new(
        "OMPS-NP-SCIENCE-RDR",
        "RONPS",
        "OMPS",
        Instrument::OmpsNp,
        vec![
            PacketIdentity::new("NP_SCIENCE", 565, "nadir profile science", 4, 4),
            PacketIdentity::new("NP_CAL", 566, "nadir profile calibration", 4, 0),
        ],
    )
}

fn diary_stream() -> InstrumentStream {
    // 1Hz packets for a 20s granule
    InstrumentStream::new(
        "SPACECRAFT-DIARY-RDR",
        "RNSCA",
        "SPACECRAFT",
        Instrument::Spacecraft,
        vec![
            PacketIdentity::new("CRITICAL", 0, "critical housekeeping", 1, 20),
            PacketIdentity::new("ADCS_HKH", 8, "attitude and orbit", 1, 20),
            PacketIdentity::new("DIARY", 11, "spacecraft diary", 1, 20),
        ],
    )
}

lazy_static! {
    static ref CATALOG: PacketCatalog = PacketCatalog::from_streams(vec![
        atms_stream(),
        cris_stream(),
        viirs_stream(),
        omps_tc_stream(),
        omps_np_stream(),
        diary_stream(),
    ]);
}

/// The built-in catalog.
#[must_use]
pub fn catalog() -> &'static PacketCatalog {
    &CATALOG
}
