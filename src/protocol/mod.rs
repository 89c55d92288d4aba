// Module declarations
pub(crate) mod request_builder;
pub(crate) mod response_parser;

// Re-export the public interface
pub use request_builder::{
    alter_ids_request, build_export_request, company_info_request, open_companies_request, Period,
};
pub use response_parser::{parse_rows, FieldValue, ParsedRow, RowIter};
