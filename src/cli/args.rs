use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "dropgate",
    version,
    about = "Share a file securely over a temporary Cloudflare tunnel"
)]
pub struct Cli {
    /// File or directory to share (multiple paths are bundled into one archive)
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Port to listen on
    #[arg(long, short, default_value_t = 8080)]
    pub port: u16,

    /// Maximum number of downloads before shutting down (0 means no limit)
    #[arg(long, short, default_value_t = 0)]
    pub limit: u32,

    /// Serve once and exit (shorthand for --limit 1)
    #[arg(long, short)]
    pub once: bool,
}

impl Cli {
    /// Effective download limit. `--once` only applies when `--limit` was
    /// left at its default of 0.
    pub fn effective_limit(&self) -> u32 {
        if self.limit == 0 && self.once {
            1
        } else {
            self.limit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["dropgate", "file.txt"]);
        assert_eq!(cli.port, 8080);
        assert_eq!(cli.effective_limit(), 0);
    }

    #[test]
    fn test_once_is_limit_one() {
        let cli = parse(&["dropgate", "--once", "file.txt"]);
        assert_eq!(cli.effective_limit(), 1);
    }

    #[test]
    fn test_explicit_limit_wins_over_once() {
        let cli = parse(&["dropgate", "-o", "--limit", "3", "file.txt"]);
        assert_eq!(cli.effective_limit(), 3);
    }

    #[test]
    fn test_missing_path_is_rejected() {
        assert!(Cli::try_parse_from(["dropgate"]).is_err());
    }

    #[test]
    fn test_multiple_paths() {
        let cli = parse(&["dropgate", "a.txt", "b.txt", "-p", "9090"]);
        assert_eq!(cli.paths, vec!["a.txt", "b.txt"]);
        assert_eq!(cli.port, 9090);
    }
}
