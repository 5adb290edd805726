//! Utility functions for identifiers, timestamps, clocks and persistence.

mod clock;
mod ids;
pub mod persist;
pub mod timestamps;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{generate_uuid, is_safe_id, readable_id};
pub use persist::{read_json, write_json_atomic};
pub use timestamps::{
    compact_stamp, format_iso8601, iso_timestamp, parse_timestamp, Timestamp, TimestampError,
};
