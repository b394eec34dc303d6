pub const RECORDS_RECEIVED: &str = "kiosk_records_received";
pub const RECORDS_REJECTED: &str = "kiosk_records_rejected";
pub const INTERACTIONS_WRITTEN: &str = "kiosk_interactions_written";
pub const LOOKUP_MISSES: &str = "kiosk_reference_lookup_misses";
pub const REFERENCE_CACHE: &str = "kiosk_reference_cache";
pub const STORE_FAILURES: &str = "kiosk_store_failures";
pub const STORE_UNAVAILABLE: &str = "kiosk_store_unavailable";
pub const EMPTY_POLLS: &str = "kiosk_empty_polls";
pub const SOURCE_TRANSPORT_ERRORS: &str = "kiosk_source_transport_errors";
pub const MALFORMED_PAYLOADS: &str = "kiosk_malformed_payloads";
