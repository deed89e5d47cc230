use std::io;
use std::path::Path;

pub const NO_ENTRIES: &str = "No missing entries logged.";
pub const READ_FAILED: &str = "Failed to read log.";

pub async fn read_missing_log(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => NO_ENTRIES.to_string(),
        Err(err) => {
            tracing::error!("Failed to read missing log {}: {err}", path.display());
            READ_FAILED.to_string()
        }
    }
}
