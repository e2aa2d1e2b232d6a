pub mod api;
pub mod bucket;
pub mod clock;
pub mod fetcher;
pub mod github;
pub mod gitlab;
pub mod http;
pub mod memory;

pub use api::{CodeHostApi, CommitPage, FetchRequest, FetchResponse};
pub use bucket::{BucketConfig, BucketState, TokenBucket};
pub use clock::{Clock, SimulatedClock, SystemClock};
pub use fetcher::{ApiCallStats, RateLimitedFetcher};
pub use http::{HostEndpoint, HttpCodeHost, HttpSettings};
pub use memory::InMemoryCodeHost;
