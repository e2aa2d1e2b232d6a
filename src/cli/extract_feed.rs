use std::io::{BufWriter, Write};
use tracing::info;

use crate::cli::commands::ExtractFeedArgs;
use crate::errors::HarvestError;
use crate::feed::{convert_cvelist, ConvertOptions};

pub async fn handle_extract_feed(args: ExtractFeedArgs) -> Result<i32, HarvestError> {
    let options = ConvertOptions {
        hosts: args.hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
        require_references: args.require_references,
    };
    let output = args.output.clone();
    let cvelist = args.cvelist.clone();

    let stats = tokio::task::spawn_blocking(move || -> Result<_, HarvestError> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = output.with_extension("jsonl.tmp");
        let mut writer = BufWriter::new(std::fs::File::create(&tmp)?);
        let stats = convert_cvelist(&cvelist, &mut writer, &options)?;
        writer.flush()?;
        drop(writer);
        std::fs::rename(&tmp, &output)?;
        Ok(stats)
    })
    .await
    .map_err(|e| HarvestError::Internal(format!("Feed conversion panicked: {}", e)))??;

    info!(output = %args.output.display(), written = stats.written, "Feed written");
    println!(
        "Wrote {} records to {} ({} files scanned, {} skipped)",
        stats.written,
        args.output.display(),
        stats.files,
        stats.skipped
    );
    Ok(0)
}
