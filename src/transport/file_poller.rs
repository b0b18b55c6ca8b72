//! File-drop transport (C9): polls an inbox directory, moves each picked-up
//! file through processing/archive/error, and drops outbound payloads into
//! a subscriber's directory. spec.md §4.9 describes this as independent per
//! endpoint, polling every `poll_interval_seconds`; grounded in shape on the
//! same move-then-process pattern `examples/original_source`'s file-based
//! ingestion uses (rename into a working directory before parsing, so a
//! crash mid-poll never reprocesses a half-read file).

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::config::FileEndpoint;
use crate::domain::model::TransportKind;
use crate::emission::SendOutcome;
use crate::transport::GatewayState;

/// Runs one endpoint's poll loop forever. Spawned once per entry in
/// `config.pam.file_endpoints`, each with its own tokio task — an error on
/// one endpoint never stalls another.
pub async fn run_poller(state: std::sync::Arc<GatewayState>, endpoint: FileEndpoint) {
    let interval = std::time::Duration::from_secs(state.config.pam.poll_interval_seconds);
    for dir in [&endpoint.inbox_dir, &endpoint.processing_dir, &endpoint.archive_dir, &endpoint.error_dir] {
        if let Err(e) = fs::create_dir_all(dir).await {
            log::error!("failed to create directory {dir} for file endpoint {}: {e}", endpoint.name);
        }
    }

    loop {
        if let Err(e) = poll_once(&state, &endpoint).await {
            log::error!("poll cycle failed for file endpoint {}: {e}", endpoint.name);
        }
        tokio::time::sleep(interval).await;
    }
}

async fn poll_once(state: &GatewayState, endpoint: &FileEndpoint) -> std::io::Result<()> {
    let mut entries = fs::read_dir(&endpoint.inbox_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !has_matching_extension(&path, &endpoint.extensions) {
            continue;
        }
        let Some(file_name) = path.file_name() else { continue };
        let processing_path = Path::new(&endpoint.processing_dir).join(file_name);
        if fs::rename(&path, &processing_path).await.is_err() {
            // another poller cycle, or another process, already claimed it
            continue;
        }
        process_file(state, endpoint, &processing_path).await;
    }
    Ok(())
}

fn has_matching_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext))
}

async fn process_file(state: &GatewayState, endpoint: &FileEndpoint, processing_path: &Path) {
    let file_name = processing_path.file_name().map(|n| n.to_owned());
    let content = match fs::read_to_string(processing_path).await {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to read {}: {e}", processing_path.display());
            move_to(processing_path, &endpoint.error_dir, file_name.as_deref()).await;
            return;
        }
    };

    let mut all_ok = true;
    for message in split_messages(&content) {
        let outcome = state.process_inbound(message, TransportKind::File).await;
        if matches!(
            outcome.status,
            crate::domain::model::LogStatus::ParseError | crate::domain::model::LogStatus::GeneratorError
        ) {
            all_ok = false;
        }
    }

    let target_dir = if all_ok { &endpoint.archive_dir } else { &endpoint.error_dir };
    move_to(processing_path, target_dir, file_name.as_deref()).await;
}

/// A file may carry several HL7 messages separated by blank lines, per
/// spec.md §4.9's "multi-message files split on blank lines".
fn split_messages(content: &str) -> Vec<&str> {
    content
        .split("\n\n")
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

async fn move_to(from: &Path, target_dir: &str, file_name: Option<&std::ffi::OsStr>) {
    let Some(file_name) = file_name else { return };
    let target = Path::new(target_dir).join(file_name);
    if let Err(e) = fs::rename(from, &target).await {
        log::error!("failed to move {} into {target_dir}: {e}", from.display());
    }
}

/// Drops one outbound payload into a file subscriber's directory, used by
/// `GatewaySink` for both `File` and `Fhir` transports.
pub async fn drop_outbound_file(dir: &str, payload: &str) -> SendOutcome {
    if let Err(e) = fs::create_dir_all(dir).await {
        return SendOutcome::TransportFailure(e.to_string());
    }
    let file_name = format!("{}.hl7", unique_suffix());
    let path: PathBuf = Path::new(dir).join(file_name);
    match fs::write(&path, payload).await {
        Ok(()) => SendOutcome::AckOk,
        Err(e) => {
            log::error!("failed to write outbound file to {}: {e}", path.display());
            SendOutcome::TransportFailure(e.to_string())
        }
    }
}

fn unique_suffix() -> String {
    use rand::distr::{Alphanumeric, SampleString};
    Alphanumeric.sample_string(&mut rand::rng(), 12)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_blank_lines() {
        let content = "MSH|one\rEVN|...\n\nMSH|two\rEVN|...";
        let messages = split_messages(content);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("MSH|one"));
        assert!(messages[1].starts_with("MSH|two"));
    }

    #[test]
    fn single_message_file_yields_one_chunk() {
        let content = "MSH|one\rEVN|...";
        assert_eq!(split_messages(content).len(), 1);
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        let extensions = vec!["hl7".to_string(), "txt".to_string()];
        assert!(has_matching_extension(Path::new("a.HL7"), &extensions));
        assert!(has_matching_extension(Path::new("a.txt"), &extensions));
        assert!(!has_matching_extension(Path::new("a.dat"), &extensions));
    }
}
