//! On-disk corpus: `data/<year>/<id>/<file>` plus a manifest, a patch and
//! pre-fix images under `pre/` per entry.

pub mod manifest;
pub mod naming;
pub mod patch;
pub mod writer;

pub use manifest::{Manifest, ManifestFile, MANIFEST_FILE, PRE_IMAGE_DIR};
pub use naming::{assign_filenames, disambiguated_name, sha256_hex};
pub use patch::{render_patch, PATCH_FILE};
pub use writer::{atomic_write, CorpusEntry, CorpusSink, CorpusWriter, FileOutcome, WriteReport};
