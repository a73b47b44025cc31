//! Transaction vocabulary: kinds, sealed records, receipts, and the
//! verification/report result types.

pub mod types;

pub use types::{
    format_timestamp, payload_field_matches, GeoPoint, LedgerReport, LedgerStatus, RecordReceipt,
    ReportFilter, ShipmentStatus, SubmissionPath, Transaction, TransactionKind, TransactionState,
    VerificationReport,
};
