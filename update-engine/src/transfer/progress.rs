//! Byte-level progress of an update download session.

/// Progress snapshot reported on every transport tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes received in this session, excluding files whose verification failed
    pub total_bytes_received: u64,

    /// Bytes the session has to download in total
    pub total_bytes_to_download: u64,

    /// Bytes received for the file currently being transferred
    pub file_bytes_received: u64,

    /// Download size of the current file
    pub current_file_size: u64,

    /// Relative path of the current file
    pub current_file: String,
}

impl DownloadProgress {
    /// Percentage of the whole session (0-100)
    pub fn total_percent(&self) -> u8 {
        percent(self.total_bytes_received, self.total_bytes_to_download)
    }

    /// Percentage of the current file (0-100)
    pub fn file_percent(&self) -> u8 {
        percent(self.file_bytes_received, self.current_file_size)
    }
}

fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as f64 / total as f64) * 100.0) as u8
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
