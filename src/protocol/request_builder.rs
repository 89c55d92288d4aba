//! Builds TDL XML envelopes for the Tally gateway.
//!
//! Output is a pure function of the mapping and the arguments: identical
//! inputs always produce byte-identical XML, so requests can be cached and
//! asserted on in tests.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::mapping::{TableMapping, ValueKind};

lazy_static! {
    static ref SIMPLE_FIELD: Regex = Regex::new(r"^(\.\.)?[a-zA-Z0-9_]+$").unwrap();
}

/// Reporting period compiled into an export request as SVFROMDATE/SVTODATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl Period {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// Wide-open period used by incremental runs, where the alter-id filter
    /// does the real restricting.
    pub fn open() -> Self {
        Self {
            from: NaiveDate::from_ymd_opt(1990, 4, 1).unwrap(),
            to: NaiveDate::from_ymd_opt(2099, 3, 31).unwrap(),
        }
    }
}

impl Default for Period {
    fn default() -> Self {
        Self::open()
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Numbered TDL identifier: ("Fld00", 1) -> "Fld01", ("MyPart00", 12) -> "MyPart12".
fn numbered(template: &str, n: usize) -> String {
    let zeros = template.chars().rev().take_while(|c| *c == '0').count();
    let prefix = &template[..template.len() - zeros];
    format!("{}{:0width$}", prefix, n, width = zeros)
}

/// TDL SET expression for one mapped field.
///
/// Simple field references get a kind-specific wrapper formula; anything
/// more complex is taken verbatim as an expression the config author wrote.
fn field_expression(field: &str, kind: ValueKind) -> String {
    if !SIMPLE_FIELD.is_match(field) {
        return field.to_string();
    }
    match kind {
        ValueKind::Text => format!("${}", field),
        ValueKind::Logical => format!("if ${} then 1 else 0", field),
        ValueKind::Date => format!(
            "if $$IsEmpty:${f} then $$StrByCharCode:241 else $$PyrlYYYYMMDDFormat:${f}:\"-\"",
            f = field
        ),
        ValueKind::Number => format!("if $$IsEmpty:${f} then \"0\" else $$String:${f}", f = field),
        ValueKind::Amount => format!(
            "$$StringFindAndReplace:(if $$IsDebit:${f} then -$$NumValue:${f} else $$NumValue:${f}):\"(-)\":\"-\"",
            f = field
        ),
        ValueKind::Quantity => format!(
            "$$StringFindAndReplace:(if $$IsInwards:${f} then $$Number:$$String:${f}:\"TailUnits\" else -$$Number:$$String:${f}:\"TailUnits\"):\"(-)\":\"-\"",
            f = field
        ),
        ValueKind::Rate => format!("if $$IsEmpty:${f} then 0 else $$Number:${f}", f = field),
    }
}

/// Build the export envelope for one mapped table.
///
/// When `alter_id_threshold` is set, an extra remote-side filter restricts
/// the response to records altered after that id; with `None` the full
/// current set comes back.
pub fn build_export_request(
    mapping: &TableMapping,
    company: &str,
    period: Period,
    alter_id_threshold: Option<i64>,
) -> String {
    let mut filters: Vec<String> = mapping.filters.clone();
    if let Some(threshold) = alter_id_threshold {
        filters.push(format!("$AlterID > {}", threshold));
    }

    let mut xml = String::with_capacity(4096);
    xml.push_str(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><ENVELOPE><HEADER><VERSION>1</VERSION>\
         <TALLYREQUEST>Export</TALLYREQUEST><TYPE>Data</TYPE>\
         <ID>TallyDatabaseLoaderReport</ID></HEADER><BODY><DESC><STATICVARIABLES>\
         <SVEXPORTFORMAT>XML (Data Interchange)</SVEXPORTFORMAT>",
    );
    xml.push_str(&format!(
        "<SVFROMDATE>{}</SVFROMDATE><SVTODATE>{}</SVTODATE>",
        period.from.format("%Y%m%d"),
        period.to.format("%Y%m%d"),
    ));
    if !company.is_empty() {
        xml.push_str(&format!(
            "<SVCURRENTCOMPANY>{}</SVCURRENTCOMPANY>",
            xml_escape(company)
        ));
    }
    xml.push_str(
        "</STATICVARIABLES><TDL><TDLMESSAGE>\
         <REPORT NAME=\"TallyDatabaseLoaderReport\"><FORMS>MyForm</FORMS></REPORT>\
         <FORM NAME=\"MyForm\"><PARTS>MyPart01</PARTS></FORM>",
    );

    // Dotted collections ("Voucher.AllLedgerEntries") become a chain of
    // nested PART/LINE walks; the first route is the top-level collection.
    let mut routes: Vec<&str> = mapping.collection.split('.').collect();
    let target_collection = routes.remove(0);
    let mut walk: Vec<String> = vec!["MyCollection".to_string()];
    walk.extend(routes.iter().map(|r| r.to_string()));

    for (i, route) in walk.iter().enumerate() {
        let part = numbered("MyPart00", i + 1);
        let line = numbered("MyLine00", i + 1);
        xml.push_str(&format!(
            "<PART NAME=\"{part}\"><LINES>{line}</LINES><REPEAT>{line} : {route}</REPEAT>\
             <SCROLLED>Vertical</SCROLLED></PART>"
        ));
    }
    for i in 0..walk.len().saturating_sub(1) {
        let line = numbered("MyLine00", i + 1);
        let part = numbered("MyPart00", i + 2);
        xml.push_str(&format!(
            "<LINE NAME=\"{line}\"><FIELDS>FldBlank</FIELDS><EXPLODE>{part}</EXPLODE></LINE>"
        ));
    }

    let field_list = (1..=mapping.fields.len())
        .map(|i| numbered("Fld00", i))
        .collect::<Vec<_>>()
        .join(",");
    xml.push_str(&format!(
        "<LINE NAME=\"{}\"><FIELDS>{}</FIELDS></LINE>",
        numbered("MyLine00", walk.len()),
        field_list
    ));

    for (i, field) in mapping.fields.iter().enumerate() {
        xml.push_str(&format!(
            "<FIELD NAME=\"{}\"><SET>{}</SET><XMLTAG>{}</XMLTAG></FIELD>",
            numbered("Fld00", i + 1),
            field_expression(&field.field, field.kind),
            numbered("F00", i + 1),
        ));
    }
    xml.push_str("<FIELD NAME=\"FldBlank\"><SET>\"\"</SET></FIELD>");

    xml.push_str(&format!(
        "<COLLECTION NAME=\"MyCollection\"><TYPE>{}</TYPE>",
        target_collection
    ));
    if !mapping.fetch.is_empty() {
        xml.push_str(&format!("<FETCH>{}</FETCH>", mapping.fetch.join(",")));
    }
    if !filters.is_empty() {
        let names = (1..=filters.len())
            .map(|i| numbered("Fltr00", i))
            .collect::<Vec<_>>()
            .join(",");
        xml.push_str(&format!("<FILTER>{}</FILTER>", names));
    }
    xml.push_str("</COLLECTION>");
    for (i, filter) in filters.iter().enumerate() {
        xml.push_str(&format!(
            "<SYSTEM TYPE=\"Formulae\" NAME=\"{}\">{}</SYSTEM>",
            numbered("Fltr00", i + 1),
            filter
        ));
    }

    xml.push_str("</TDLMESSAGE></TDL></DESC></BODY></ENVELOPE>");
    xml
}

fn probe_envelope(report: &str, company: &str, tdl_body: &str) -> String {
    let company_var = if company.is_empty() {
        String::new()
    } else {
        format!(
            "<SVCURRENTCOMPANY>{}</SVCURRENTCOMPANY>",
            xml_escape(company)
        )
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><ENVELOPE><HEADER><VERSION>1</VERSION>\
         <TALLYREQUEST>Export</TALLYREQUEST><TYPE>Data</TYPE><ID>{report}</ID></HEADER>\
         <BODY><DESC><STATICVARIABLES><SVEXPORTFORMAT>$$SysName:XML</SVEXPORTFORMAT>\
         {company_var}</STATICVARIABLES><TDL><TDLMESSAGE>{tdl_body}</TDLMESSAGE></TDL>\
         </DESC></BODY></ENVELOPE>"
    )
}

/// Envelope asking for the list of companies currently open in Tally.
pub fn open_companies_request() -> String {
    probe_envelope(
        "ListOfCompanies",
        "",
        "<REPORT NAME=\"ListOfCompanies\"><FORMS>ListOfCompanies</FORMS></REPORT>\
         <FORM NAME=\"ListOfCompanies\"><PARTS>ListOfCompanies</PARTS></FORM>\
         <PART NAME=\"ListOfCompanies\"><LINES>ListOfCompanies</LINES>\
         <REPEAT>ListOfCompanies : Company</REPEAT><SCROLLED>Vertical</SCROLLED></PART>\
         <LINE NAME=\"ListOfCompanies\"><FIELDS>FldName,FldGuid,FldBooksFrom,FldBooksTo</FIELDS></LINE>\
         <FIELD NAME=\"FldName\"><SET>$Name</SET></FIELD>\
         <FIELD NAME=\"FldGuid\"><SET>$Guid</SET></FIELD>\
         <FIELD NAME=\"FldBooksFrom\"><SET>$$PyrlYYYYMMDD:$BooksFrom</SET></FIELD>\
         <FIELD NAME=\"FldBooksTo\"><SET>$$PyrlYYYYMMDD:$LastVoucherDate</SET></FIELD>",
    )
}

/// Envelope asking for one company's identity: guid, alter id, book range.
pub fn company_info_request(company: &str) -> String {
    probe_envelope(
        "CurrentCompanyInfo",
        company,
        "<REPORT NAME=\"CurrentCompanyInfo\"><FORMS>CurrentCompanyInfo</FORMS></REPORT>\
         <FORM NAME=\"CurrentCompanyInfo\"><PARTS>CurrentCompanyInfo</PARTS></FORM>\
         <PART NAME=\"CurrentCompanyInfo\"><LINES>CurrentCompanyInfo</LINES>\
         <REPEAT>CurrentCompanyInfo : Company</REPEAT><SCROLLED>Vertical</SCROLLED></PART>\
         <LINE NAME=\"CurrentCompanyInfo\"><FIELDS>FldName,FldGuid,FldAlterId,FldBooksFrom,FldBooksTo</FIELDS></LINE>\
         <FIELD NAME=\"FldName\"><SET>$Name</SET></FIELD>\
         <FIELD NAME=\"FldGuid\"><SET>$Guid</SET></FIELD>\
         <FIELD NAME=\"FldAlterId\"><SET>$AlterID</SET></FIELD>\
         <FIELD NAME=\"FldBooksFrom\"><SET>$$PyrlYYYYMMDD:$BooksFrom</SET></FIELD>\
         <FIELD NAME=\"FldBooksTo\"><SET>$$PyrlYYYYMMDD:$LastVoucherDate</SET></FIELD>",
    )
}

/// Envelope asking for the company-wide master and transaction alter-id
/// counters used for the cheap "anything changed?" probe.
pub fn alter_ids_request(company: &str) -> String {
    probe_envelope(
        "GetAlterIds",
        company,
        "<REPORT NAME=\"GetAlterIds\"><FORMS>GetAlterIds</FORMS></REPORT>\
         <FORM NAME=\"GetAlterIds\"><PARTS>GetAlterIds</PARTS></FORM>\
         <PART NAME=\"GetAlterIds\"><LINES>GetAlterIds</LINES>\
         <REPEAT>GetAlterIds : MyCollection</REPEAT><SCROLLED>Vertical</SCROLLED></PART>\
         <LINE NAME=\"GetAlterIds\"><FIELDS>FldAlterMaster,FldAlterTransaction</FIELDS></LINE>\
         <FIELD NAME=\"FldAlterMaster\"><SET>$AltMstId</SET></FIELD>\
         <FIELD NAME=\"FldAlterTransaction\"><SET>$AltVchId</SET></FIELD>\
         <COLLECTION NAME=\"MyCollection\"><TYPE>Company</TYPE>\
         <FILTER>FilterActiveCompany</FILTER></COLLECTION>\
         <SYSTEM TYPE=\"Formulae\" NAME=\"FilterActiveCompany\">$$IsEqual:##SVCurrentCompany:$Name</SYSTEM>",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingSet;

    fn ledger_mapping() -> TableMapping {
        let doc = r#"{"master": [{
            "name": "mst_ledger", "collection": "Ledger", "nature": "Primary",
            "fields": [
                {"name": "guid", "field": "Guid"},
                {"name": "alterid", "field": "AlterId", "type": "number"},
                {"name": "name", "field": "Name"},
                {"name": "opening_balance", "field": "OpeningBalance", "type": "amount"}
            ],
            "fetch": ["AlterId"],
            "filters": ["NOT $IsDeleted"]
        }]}"#;
        MappingSet::from_json(doc).unwrap().master[0].clone()
    }

    #[test]
    fn build_is_deterministic() {
        let mapping = ledger_mapping();
        let a = build_export_request(&mapping, "Alpha & Co", Period::open(), Some(1000));
        let b = build_export_request(&mapping, "Alpha & Co", Period::open(), Some(1000));
        assert_eq!(a, b);
    }

    #[test]
    fn threshold_becomes_remote_filter() {
        let mapping = ledger_mapping();
        let without = build_export_request(&mapping, "", Period::open(), None);
        let with = build_export_request(&mapping, "", Period::open(), Some(42));
        assert!(!without.contains("$AlterID &gt; 42") && !without.contains("$AlterID > 42"));
        assert!(with.contains("<SYSTEM TYPE=\"Formulae\" NAME=\"Fltr02\">$AlterID > 42</SYSTEM>"));
        // The declared filter keeps slot one.
        assert!(with.contains("<SYSTEM TYPE=\"Formulae\" NAME=\"Fltr01\">NOT $IsDeleted</SYSTEM>"));
        assert!(with.contains("<FILTER>Fltr01,Fltr02</FILTER>"));
    }

    #[test]
    fn company_name_is_escaped() {
        let mapping = ledger_mapping();
        let xml = build_export_request(&mapping, "A & B <Pvt>", Period::open(), None);
        assert!(xml.contains("<SVCURRENTCOMPANY>A &amp; B &lt;Pvt&gt;</SVCURRENTCOMPANY>"));
    }

    #[test]
    fn dotted_collection_generates_nested_parts() {
        let doc = r#"{"transaction": [{
            "name": "trn_accounting", "collection": "Voucher.AllLedgerEntries",
            "fields": [{"name": "ledger", "field": "LedgerName"}]
        }]}"#;
        let mapping = MappingSet::from_json(doc).unwrap().transaction[0].clone();
        let xml = build_export_request(&mapping, "", Period::open(), None);
        assert!(xml.contains("<REPEAT>MyLine01 : MyCollection</REPEAT>"));
        assert!(xml.contains("<REPEAT>MyLine02 : AllLedgerEntries</REPEAT>"));
        assert!(xml.contains("<EXPLODE>MyPart02</EXPLODE>"));
        assert!(xml.contains("<TYPE>Voucher</TYPE>"));
    }

    #[test]
    fn kind_specific_formulas() {
        let mapping = ledger_mapping();
        let xml = build_export_request(&mapping, "", Period::open(), None);
        assert!(xml.contains("<SET>$Guid</SET>"));
        assert!(xml.contains("<SET>if $$IsEmpty:$AlterId then \"0\" else $$String:$AlterId</SET>"));
        assert!(xml.contains("$$IsDebit:$OpeningBalance"));
    }

    #[test]
    fn numbered_identifiers_pad_to_template_width() {
        assert_eq!(numbered("Fld00", 3), "Fld03");
        assert_eq!(numbered("Fld00", 12), "Fld12");
        assert_eq!(numbered("MyPart00", 1), "MyPart01");
    }
}
