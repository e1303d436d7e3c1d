//! JPSS RDR generation from CCSDS space packets.
//!
//! Packets are grouped into per-instrument granules by [Granulator]s, encoded as Common
//! RDR records by the [RecordEncoder], and written with their granule and aggregate
//! metadata to an [ObjectStore] by a [Collector]. The [RdrBuilder] rolls over to new
//! files as granules pass each file's time span.
//!
//! # Reference
//! Joint Polar Satellite System (JPSS) Common Data Format Control Book – External (CDFCB-X) Volume II - RDR Formats
//!
//! Unfortunately, the document does not seem to be publicly available from an official source,
//! but if you may have some luck if you search for CDFCB-X.
//!
mod catalog;
mod clock;
mod collector;
mod error;
mod granule;
mod granulator;
mod leapsecs;
mod meta;
mod packet;
mod pool;
mod record;
mod rollover;
mod store;
mod time;
mod writer;

pub mod config;

pub use catalog::*;
pub use clock::*;
pub use collector::*;
pub use error::*;
pub use granule::*;
pub use granulator::*;
pub use leapsecs::*;
pub use meta::*;
pub use packet::*;
pub use pool::*;
pub use record::*;
pub use rollover::*;
pub use store::*;
pub use time::*;
pub use writer::*;
