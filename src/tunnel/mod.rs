pub mod extract;
pub mod monitor;

pub use extract::UrlExtractor;
pub use monitor::TunnelMonitor;
