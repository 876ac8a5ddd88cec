pub mod archive;
pub mod cli;
pub mod commands;
pub mod events;
pub mod paths;
pub mod server;
pub mod tunnel;

// Re-export the event type for convenience
pub use events::DownloadEvent;
