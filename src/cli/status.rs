use crate::cli::commands::StatusArgs;
use crate::errors::HarvestError;
use crate::models::RecordStatus;
use crate::state::{SqliteStateStore, StateEntry, StateStore};

pub async fn handle_status(args: StatusArgs) -> Result<i32, HarvestError> {
    if !args.state.exists() {
        return Err(HarvestError::Store(format!("No state database at {}", args.state.display())));
    }
    let store = SqliteStateStore::new(&args.state)?;

    if let Some(id) = &args.id {
        let Some(entry) = store.get(id)? else {
            eprintln!("No state recorded for {}", id);
            return Ok(1);
        };
        if args.json {
            println!("{}", serde_json::to_string_pretty(&entry)?);
        } else {
            print_entry(&entry);
        }
        return Ok(0);
    }

    if let Some(raw) = &args.status {
        let status = RecordStatus::parse(&raw.to_ascii_lowercase())
            .ok_or_else(|| HarvestError::Config(format!("Unknown status '{}'", raw)))?;
        let entries = store.list(Some(status))?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        } else {
            for entry in &entries {
                println!("{}\t{}", entry.id, summary_of(entry));
            }
        }
        return Ok(0);
    }

    let counts = store.counts()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&counts)?);
    } else {
        let total: u64 = counts.values().sum();
        println!("Records: {}", total);
        for (status, n) in &counts {
            println!("  {:<11} {}", format!("{}:", status), n);
        }
    }
    Ok(0)
}

fn summary_of(entry: &StateEntry) -> String {
    match (&entry.resolved_commit, &entry.error_kind) {
        (Some(commit), _) => format!("{} {}", entry.repository.as_deref().unwrap_or("-"), commit),
        (None, Some(kind)) => format!("{}: {}", kind, entry.error_detail.as_deref().unwrap_or("")),
        (None, None) => entry.status.to_string(),
    }
}

fn print_entry(entry: &StateEntry) {
    println!("Id:           {}", entry.id);
    println!("Status:       {}", entry.status);
    println!("Last attempt: {}", entry.last_attempt.to_rfc3339());
    if let Some(repo) = &entry.repository {
        println!("Repository:   {}", repo);
    }
    if let Some(commit) = &entry.resolved_commit {
        println!("Commit:       {}", commit);
    }
    if let Some(kind) = &entry.error_kind {
        println!("Error:        {} {}", kind, entry.error_detail.as_deref().unwrap_or(""));
    }
}
