pub mod diff;
pub mod normalize;
pub mod raw;
pub mod record;

pub use diff::{RecordDiff, diff};
pub use normalize::normalize;
pub use raw::{RawNotam, classify_raw, extract_items};
pub use record::{Classification, FetchStatus, NewNotamMarker, NotamRecord, Provider};
