//! HTTP gateway to a running Tally instance.
//!
//! Tally's XML server speaks UTF-16LE over plain HTTP POST, answers probe
//! reports as flat `<FLD..>` tags, and signals request-level errors with a
//! `<LINEERROR>` element inside an otherwise successful response.

use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, warn};
use reqwest::Client;
use std::time::Duration;

use super::remote_errors::{RemoteError, Result};
use super::remote_traits::{AlterIds, CompanyProfile, RemoteSource};
use super::retry::{CircuitBreaker, RetryPolicy};
use crate::constants::{DEFAULT_TALLY_HOST, DEFAULT_TALLY_PORT, REQUEST_TIMEOUT_SECS};
use crate::mapping::TableMapping;
use crate::protocol::{
    alter_ids_request, build_export_request, company_info_request, open_companies_request,
    parse_rows, ParsedRow, Period,
};

pub struct TallyClient {
    http: Client,
    endpoint: String,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl TallyClient {
    pub fn new(host: &str, port: u16) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: format!("http://{}:{}", host, port),
            breaker: CircuitBreaker::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_policies(mut self, breaker: CircuitBreaker, retry: RetryPolicy) -> Self {
        self.breaker = breaker;
        self.retry = retry;
        self
    }

    /// POST one envelope and return the decoded response body.
    ///
    /// Transport failures are retried with backoff and feed the circuit
    /// breaker; a rejection from Tally fails immediately.
    pub async fn post_envelope(&self, xml: &str) -> Result<String> {
        self.breaker.check()?;
        let mut attempt = 0;
        loop {
            match self.post_once(xml).await {
                Ok(body) => {
                    self.breaker.record_success();
                    return Ok(body);
                }
                Err(err @ RemoteError::Unreachable(_)) => {
                    self.breaker.record_failure();
                    if attempt + 1 >= self.retry.max_attempts {
                        return Err(err);
                    }
                    warn!(
                        "Tally request failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.retry.max_attempts,
                        err
                    );
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn post_once(&self, xml: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "text/xml;charset=utf-16")
            .body(encode_utf16le(xml))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Rejected(format!("HTTP {}", status)));
        }

        let body = decode_response(&response.bytes().await?);
        if let Some(message) = extract_tag(&body, "LINEERROR") {
            return Err(RemoteError::Rejected(message.trim().to_string()));
        }
        debug!("Tally response: {} bytes", body.len());
        Ok(body)
    }

    /// Cheap liveness probe: can we reach the XML server at all?
    pub async fn check_connection(&self) -> Result<()> {
        self.post_envelope(&open_companies_request()).await?;
        Ok(())
    }

    /// Identities of the companies currently open in Tally.
    pub async fn open_companies(&self) -> Result<Vec<CompanyProfile>> {
        let body = self.post_envelope(&open_companies_request()).await?;
        Ok(parse_company_list(&body))
    }
}

/// The company-list probe answers with flat repeated tags, one set per
/// company; positions line them up.
fn parse_company_list(body: &str) -> Vec<CompanyProfile> {
    let guids = extract_all(body, "FLDGUID");
    let books_from = extract_all(body, "FLDBOOKSFROM");
    let books_to = extract_all(body, "FLDBOOKSTO");
    extract_all(body, "FLDNAME")
        .into_iter()
        .enumerate()
        .map(|(i, name)| CompanyProfile {
            name,
            guid: guids.get(i).cloned().unwrap_or_default(),
            books_from: parse_probe_date(books_from.get(i).cloned()),
            last_voucher_date: parse_probe_date(books_to.get(i).cloned()),
        })
        .collect()
}

fn encode_utf16le(xml: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(xml.len() * 2 + 2);
    body.extend_from_slice(&[0xFF, 0xFE]);
    for unit in xml.encode_utf16() {
        body.extend_from_slice(&unit.to_le_bytes());
    }
    body
}

/// Decode a response body, honoring a UTF-16LE BOM when present and
/// falling back to lossy UTF-8 otherwise.
fn decode_response(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xFE {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        let text = String::from_utf8_lossy(bytes);
        text.strip_prefix('\u{feff}').unwrap_or(&text).to_string()
    }
}

fn extract_tag(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = body.find(&open)? + open.len();
    let end = start + body[start..].find(&close)?;
    Some(body[start..end].to_string())
}

fn extract_all(body: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        match after.find(&close) {
            Some(end) => {
                out.push(after[..end].trim().to_string());
                rest = &after[end + close.len()..];
            }
            None => break,
        }
    }
    out
}

fn parse_counter(body: &str, tag: &str) -> i64 {
    extract_tag(body, tag)
        .map(|v| {
            let digits: String = v
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '-')
                .collect();
            digits.parse().unwrap_or(0)
        })
        .unwrap_or(0)
}

fn parse_probe_date(value: Option<String>) -> Option<NaiveDate> {
    let value = value?;
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .ok()
}

#[async_trait]
impl RemoteSource for TallyClient {
    async fn fetch_rows(
        &self,
        mapping: &TableMapping,
        company: &str,
        period: Period,
        alter_id_threshold: Option<i64>,
    ) -> Result<Vec<ParsedRow>> {
        let request = build_export_request(mapping, company, period, alter_id_threshold);
        let body = self.post_envelope(&request).await?;
        Ok(parse_rows(mapping, &body).collect())
    }

    async fn company_profile(&self, company: &str) -> Result<CompanyProfile> {
        let body = self.post_envelope(&company_info_request(company)).await?;
        let name = extract_tag(&body, "FLDNAME")
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                RemoteError::Parse(format!("company '{}' not found in response", company))
            })?;
        Ok(CompanyProfile {
            name,
            guid: extract_tag(&body, "FLDGUID").unwrap_or_default().trim().to_string(),
            books_from: parse_probe_date(extract_tag(&body, "FLDBOOKSFROM")),
            last_voucher_date: parse_probe_date(extract_tag(&body, "FLDBOOKSTO")),
        })
    }

    async fn alter_ids(&self, company: &str) -> Result<AlterIds> {
        let body = self.post_envelope(&alter_ids_request(company)).await?;
        Ok(AlterIds {
            master: parse_counter(&body, "FLDALTERMASTER"),
            transaction: parse_counter(&body, "FLDALTERTRANSACTION"),
        })
    }
}

impl Default for TallyClient {
    fn default() -> Self {
        Self::new(DEFAULT_TALLY_HOST, DEFAULT_TALLY_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_round_trip() {
        let xml = "<ENVELOPE>Caf\u{e9} &amp; Co</ENVELOPE>";
        let encoded = encode_utf16le(xml);
        assert_eq!(&encoded[..2], &[0xFF, 0xFE]);
        assert_eq!(decode_response(&encoded), xml);
    }

    #[test]
    fn decodes_utf8_without_bom() {
        assert_eq!(decode_response(b"<A>x</A>"), "<A>x</A>");
    }

    #[test]
    fn extracts_repeated_tags() {
        let body = "<FLDNAME>Alpha Ltd</FLDNAME><FLDNAME>Beta Ltd</FLDNAME>";
        assert_eq!(extract_all(body, "FLDNAME"), vec!["Alpha Ltd", "Beta Ltd"]);
    }

    #[test]
    fn company_list_zips_the_repeated_tags() {
        let body = "<FLDNAME>Alpha Ltd</FLDNAME><FLDGUID>g-alpha</FLDGUID>\
                    <FLDBOOKSFROM>20230401</FLDBOOKSFROM><FLDBOOKSTO>20240331</FLDBOOKSTO>\
                    <FLDNAME>Beta Ltd</FLDNAME><FLDGUID>g-beta</FLDGUID>\
                    <FLDBOOKSFROM>\u{f1}</FLDBOOKSFROM><FLDBOOKSTO>\u{f1}</FLDBOOKSTO>";
        let companies = parse_company_list(body);
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[0].name, "Alpha Ltd");
        assert_eq!(companies[0].guid, "g-alpha");
        assert_eq!(
            companies[0].books_from,
            NaiveDate::from_ymd_opt(2023, 4, 1)
        );
        assert_eq!(
            companies[0].last_voucher_date,
            NaiveDate::from_ymd_opt(2024, 3, 31)
        );
        assert_eq!(companies[1].guid, "g-beta");
        assert_eq!(companies[1].books_from, None);
    }

    #[test]
    fn parses_alter_id_counters() {
        let body = "<FLDALTERMASTER> 1234</FLDALTERMASTER><FLDALTERTRANSACTION>567</FLDALTERTRANSACTION>";
        assert_eq!(parse_counter(body, "FLDALTERMASTER"), 1234);
        assert_eq!(parse_counter(body, "FLDALTERTRANSACTION"), 567);
        assert_eq!(parse_counter(body, "MISSING"), 0);
    }

    #[test]
    fn probe_dates() {
        assert_eq!(
            parse_probe_date(Some("20230401".to_string())),
            NaiveDate::from_ymd_opt(2023, 4, 1)
        );
        assert_eq!(parse_probe_date(Some("\u{f1}".to_string())), None);
        assert_eq!(parse_probe_date(None), None);
    }
}
