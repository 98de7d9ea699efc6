//! FTP crawling
//!
//! A [`CrawlSession`] walks one server's directory tree depth-first over a
//! single control connection, normalizes listing text, and records every
//! accepted entry into a pending generation. Connection and listing faults
//! are retried under separate budgets; parse faults only skip the line.

mod encoding;
pub mod ftp;
pub mod listing;
mod retry;
mod session;

pub use encoding::{decode_line, encode_path};
pub use ftp::{FtpClient, FtpConnector, FtpError, TcpFtpClient, TcpFtpConnector};
pub use listing::{parse_line, ListingEntry, ListingError};
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use session::{CrawlOutcome, CrawlSession, CrawlState};
