use serde::de::{Deserializer as _, IgnoredAny, SeqAccess, Visitor};
use serde::Deserialize;
use std::io::BufRead;
use std::ops::ControlFlow;
use tracing::warn;

use crate::errors::HarvestError;
use crate::models::VulnerabilityRecord;
use super::year_from_id;

/// Wire shape of one feed record; `year` may be omitted for ids that carry it.
#[derive(Debug, Deserialize)]
struct FeedRecord {
    id: String,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    references: Vec<String>,
}

impl FeedRecord {
    fn into_record(self) -> Result<VulnerabilityRecord, String> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err("empty id".into());
        }
        let year = self
            .year
            .or_else(|| year_from_id(id))
            .ok_or_else(|| format!("{}: no year given and none in the id", id))?;
        Ok(VulnerabilityRecord::new(id, year, self.references))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub records: u64,
    pub invalid: u64,
    /// The consumer stopped reading before the end of the feed.
    pub stopped: bool,
}

/// Stream records from a JSON-lines or JSON-array feed into `on_record`.
///
/// The format is picked from the first non-whitespace byte. Malformed
/// individual records are logged and counted; a malformed array is an error.
/// Returning `ControlFlow::Break` from the callback stops delivery.
pub fn for_each_record<R, F>(mut reader: R, mut on_record: F) -> Result<FeedStats, HarvestError>
where
    R: BufRead,
    F: FnMut(VulnerabilityRecord) -> ControlFlow<()>,
{
    match first_significant_byte(&mut reader)? {
        None => Ok(FeedStats::default()),
        Some(b'[') => read_array(reader, &mut on_record),
        Some(_) => read_lines(reader, &mut on_record),
    }
}

fn first_significant_byte<R: BufRead>(reader: &mut R) -> Result<Option<u8>, HarvestError> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(None);
        }
        let skip = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
        if skip < buf.len() {
            let first = buf[skip];
            reader.consume(skip);
            return Ok(Some(first));
        }
        let len = buf.len();
        reader.consume(len);
    }
}

/// Lines are handled as raw bytes so one undecodable line is just another
/// invalid record.
fn read_lines<R, F>(mut reader: R, on_record: &mut F) -> Result<FeedStats, HarvestError>
where
    R: BufRead,
    F: FnMut(VulnerabilityRecord) -> ControlFlow<()>,
{
    let mut stats = FeedStats::default();
    let mut buf = Vec::new();
    let mut index = 0usize;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        index += 1;
        let line = buf.trim_ascii();
        if line.is_empty() {
            continue;
        }
        let parsed = serde_json::from_slice::<FeedRecord>(line)
            .map_err(|e| e.to_string())
            .and_then(FeedRecord::into_record);
        match parsed {
            Ok(record) => {
                stats.records += 1;
                if on_record(record).is_break() {
                    stats.stopped = true;
                    break;
                }
            }
            Err(e) => {
                stats.invalid += 1;
                warn!(line = index, error = %e, "Skipping malformed feed line");
            }
        }
    }
    Ok(stats)
}

fn read_array<R, F>(reader: R, on_record: &mut F) -> Result<FeedStats, HarvestError>
where
    R: BufRead,
    F: FnMut(VulnerabilityRecord) -> ControlFlow<()>,
{
    let mut de = serde_json::Deserializer::from_reader(reader);
    let stats = de
        .deserialize_seq(ArrayVisitor { on_record })
        .map_err(|e| HarvestError::Feed(format!("Malformed feed array: {}", e)))?;
    de.end().map_err(|e| HarvestError::Feed(format!("Trailing data after feed array: {}", e)))?;
    Ok(stats)
}

struct ArrayVisitor<'f, F> {
    on_record: &'f mut F,
}

impl<'de, F> Visitor<'de> for ArrayVisitor<'_, F>
where
    F: FnMut(VulnerabilityRecord) -> ControlFlow<()>,
{
    type Value = FeedStats;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("an array of vulnerability records")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<FeedStats, A::Error> {
        let mut stats = FeedStats::default();
        let mut index = 0usize;
        while let Some(value) = seq.next_element::<serde_json::Value>()? {
            index += 1;
            let parsed = serde_json::from_value::<FeedRecord>(value)
                .map_err(|e| e.to_string())
                .and_then(FeedRecord::into_record);
            match parsed {
                Ok(record) => {
                    stats.records += 1;
                    if (self.on_record)(record).is_break() {
                        stats.stopped = true;
                        break;
                    }
                }
                Err(e) => {
                    stats.invalid += 1;
                    warn!(element = index, error = %e, "Skipping malformed feed element");
                }
            }
        }
        // The deserializer insists on reaching the closing bracket.
        if stats.stopped {
            while seq.next_element::<IgnoredAny>()?.is_some() {}
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(input: &str) -> (Vec<VulnerabilityRecord>, FeedStats) {
        let mut out = Vec::new();
        let stats = for_each_record(input.as_bytes(), |r| {
            out.push(r);
            ControlFlow::Continue(())
        })
        .unwrap();
        (out, stats)
    }

    #[test]
    fn test_json_lines() {
        let input = r#"{"id": "CVE-2099-0001", "year": 2099, "references": ["https://github.com/o/r/commit/abcdef1"]}

{"id": "CVE-2098-0002", "references": []}
"#;
        let (records, stats) = collect(input);
        assert_eq!(stats.records, 2);
        assert_eq!(records[0].reference_urls.len(), 1);
        assert_eq!(records[1].disclosure_year, 2098);
    }

    #[test]
    fn test_json_array() {
        let input = r#"  [
            {"id": "CVE-2099-0001", "year": 2099, "references": []},
            {"id": "CVE-2099-0002", "year": 2099}
        ]"#;
        let (records, stats) = collect(input);
        assert_eq!(records.len(), 2);
        assert_eq!(stats.invalid, 0);
    }

    #[test]
    fn test_bad_lines_skipped() {
        let input = "{not json}\n{\"id\": \"GHSA-xxxx\"}\n{\"id\": \"CVE-2099-0003\"}\n";
        let (records, stats) = collect(input);
        assert_eq!(records.len(), 1);
        assert_eq!(stats.invalid, 2);
    }

    #[test]
    fn test_undecodable_line_skipped() {
        let mut input = b"{\"id\": \"CVE-2099-0001\"}\n".to_vec();
        input.extend_from_slice(b"{\"id\":\"CVE-2099-\xff\"}\n");
        input.extend_from_slice(b"{\"id\": \"CVE-2099-0003\"}\n");

        let mut ids = Vec::new();
        let stats = for_each_record(&input[..], |r| {
            ids.push(r.id);
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(ids, vec!["CVE-2099-0001", "CVE-2099-0003"]);
        assert_eq!(stats.invalid, 1);
    }

    #[test]
    fn test_truncated_array_is_error() {
        let result = for_each_record(r#"[{"id": "CVE-2099-0001"}, "#.as_bytes(), |_| ControlFlow::Continue(()));
        assert!(matches!(result, Err(HarvestError::Feed(_))));
    }

    #[test]
    fn test_consumer_can_stop_early() {
        let input = r#"[{"id": "CVE-2099-0001"}, {"id": "CVE-2099-0002"}, {"id": "CVE-2099-0003"}]"#;
        let mut seen = 0;
        let stats = for_each_record(input.as_bytes(), |_| {
            seen += 1;
            ControlFlow::Break(())
        })
        .unwrap();
        assert_eq!(seen, 1);
        assert!(stats.stopped);
    }

    #[test]
    fn test_empty_feed() {
        let (records, _) = collect("   \n");
        assert!(records.is_empty());
    }
}
