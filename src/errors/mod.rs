pub mod types;
pub mod classification;
pub mod retry;

pub use types::{AttemptError, ExtractError, FetchError, HarvestError, ResolveError, WriteError};
pub use classification::{Classify, ErrorClassification};
pub use retry::{RetryPolicy, with_retry};
