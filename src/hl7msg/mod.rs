pub mod datetime;
pub mod segments;

pub use datetime::{format_hl7_date, format_hl7_datetime, parse_hl7_date, parse_hl7_datetime, DateFormatInvalid};
pub use segments::{
    parse_mrg, parse_msh, parse_pd1, parse_pid, parse_pv1, parse_trigger_event, parse_z99, parse_zbe,
    MrgData, MshData, Pd1Data, PidData, Pv1Data, SegmentError, Z99Update, ZbeData,
};
