//! Domain types: bin sizes, requests and windows, raw and canonical records, frames.

pub mod bin_size;
pub mod frame;
pub mod record;
pub mod request;

pub use bin_size::BinSize;
pub use frame::{CanonicalFrame, MeasurementColumn, METADATA_COLUMNS};
pub use record::{BucketRecord, CanonicalRecord, MeasurementValue, RawRecord};
pub use request::{CacheKey, FetchRequest, Window, WIRE_DATETIME_FORMAT};
