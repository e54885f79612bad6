//! Mirror transfers and progress reporting.

pub mod progress;
pub mod progress_stream;
pub mod transport;

pub use progress::{format_bytes, DownloadProgress};
pub use progress_stream::{ProgressCallback, ProgressStream};
pub use transport::{HttpTransport, Transport};
