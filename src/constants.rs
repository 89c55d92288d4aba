/// Marker Tally emits for an empty field value (char code 241).
pub const NULL_MARKER: char = '\u{00F1}';

/// Default Tally gateway port.
pub const DEFAULT_TALLY_PORT: u16 = 9000;

/// Default host for a locally running Tally instance.
pub const DEFAULT_TALLY_HOST: &str = "localhost";

/// Per-request timeout against the Tally gateway, in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Company tag column added to every mirrored table.
pub const COMPANY_COLUMN: &str = "_company";

/// Conventional column names carried by every Primary table mapping.
pub const GUID_COLUMN: &str = "guid";
pub const ALTER_ID_COLUMN: &str = "alterid";
