//! Vulnerability feed input: streaming record reader and cvelist conversion.

pub mod cvelist;
pub mod reader;

use regex::Regex;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::HarvestError;

pub use cvelist::{convert_cvelist, ConvertOptions, ConvertStats};
pub use reader::{for_each_record, FeedStats};

/// Disclosure year embedded in ids such as `CVE-2019-11071`.
pub fn year_from_id(id: &str) -> Option<i32> {
    static YEAR: OnceLock<Option<Regex>> = OnceLock::new();
    let re = YEAR.get_or_init(|| Regex::new(r"^(?i:CVE)-(\d{4})-\d+$").ok()).as_ref()?;
    re.captures(id.trim())?.get(1)?.as_str().parse().ok()
}

/// Open a feed file for streaming. Failure here is fatal to a run.
pub fn open_feed(path: &Path) -> Result<BufReader<File>, HarvestError> {
    let file = File::open(path)
        .map_err(|e| HarvestError::Feed(format!("Cannot read feed {}: {}", path.display(), e)))?;
    Ok(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_from_id() {
        assert_eq!(year_from_id("CVE-2019-11071"), Some(2019));
        assert_eq!(year_from_id("cve-2099-0001"), Some(2099));
        assert_eq!(year_from_id("GHSA-abcd-efgh-ijkl"), None);
    }

    #[test]
    fn test_open_missing_feed() {
        assert!(matches!(open_feed(Path::new("/nonexistent/feed.jsonl")), Err(HarvestError::Feed(_))));
    }
}
