//! URL extraction state machine for the tunnel subprocess output.

use anyhow::{Context, Result};
use regex::Regex;

/// Matches the public URL the relay assigns on its well-known subdomain.
pub const URL_PATTERN: &str = r"https://[a-zA-Z0-9-]+\.trycloudflare\.com";

/// Log phrases indicating the tunnel registered a live connection. These are
/// relay wording, so the extractor takes them as data rather than hard-coding
/// a single literal.
pub const READY_PATTERNS: &[&str] = &[
    "Registered tunnel connection",
    "Connection [0-9a-f-]+ registered",
    "Connected to Cloudflare",
];

#[derive(Debug)]
enum TunnelState {
    /// No URL seen yet.
    Starting,
    /// A candidate URL has been seen; later URL lines overwrite it.
    UrlObserved(String),
    /// The URL has been published. Terminal; further lines are no-ops.
    Ready,
}

/// Feeds subprocess output lines through the
/// `Starting -> UrlObserved -> Ready` state machine. `observe` returns the
/// URL exactly once, on the first readiness line seen after a URL line.
pub struct UrlExtractor {
    url_pattern: Regex,
    ready_patterns: Vec<Regex>,
    state: TunnelState,
}

impl UrlExtractor {
    pub fn new() -> Result<Self> {
        Self::with_ready_patterns(READY_PATTERNS)
    }

    /// Build an extractor with custom readiness patterns, for callers that
    /// need to track changed relay log wording.
    pub fn with_ready_patterns(patterns: &[&str]) -> Result<Self> {
        let url_pattern = Regex::new(URL_PATTERN).context("compiling URL pattern")?;
        let ready_patterns = patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("compiling readiness pattern {p:?}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            url_pattern,
            ready_patterns,
            state: TunnelState::Starting,
        })
    }

    /// Scan one output line. Returns the public URL the first time a
    /// readiness line is seen after a URL line, and never again.
    pub fn observe(&mut self, line: &str) -> Option<String> {
        if matches!(self.state, TunnelState::Ready) {
            return None;
        }

        if let Some(m) = self.url_pattern.find(line) {
            // Later diagnostic lines are authoritative, so the last URL wins.
            self.state = TunnelState::UrlObserved(m.as_str().to_string());
        }

        if self.ready_patterns.iter().any(|p| p.is_match(line)) {
            if let TunnelState::UrlObserved(url) = &self.state {
                let url = url.clone();
                self.state = TunnelState::Ready;
                return Some(url);
            }
            // Readiness before any URL line does not transition state.
        }

        None
    }
}
