pub mod candidate;
pub mod diff;
pub mod record;

pub use candidate::*;
pub use diff::*;
pub use record::*;
