//! Path expansion for user-supplied CLI arguments.

use anyhow::{Context, Result};
use directories::BaseDirs;
use std::path::PathBuf;

/// Expand a user-supplied path: a leading `~` becomes the home directory,
/// `$VAR` / `${VAR}` environment references are substituted, and the result
/// is made absolute.
pub fn expand(path: &str) -> Result<PathBuf> {
    let mut expanded = path.to_string();

    if let Some(rest) = expanded.strip_prefix('~') {
        let base = BaseDirs::new().context("resolving home directory")?;
        let home = base
            .home_dir()
            .to_str()
            .context("home directory is not valid UTF-8")?;
        expanded = format!("{home}{rest}");
    }

    let expanded = expand_env(&expanded);

    let absolute = std::path::absolute(&expanded)
        .with_context(|| format!("resolving {expanded:?}"))?;
    Ok(absolute)
}

/// Substitute `$VAR` and `${VAR}` references. Unset variables expand to the
/// empty string; a `$` followed by neither a name nor a brace is literal.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('{') => {
                chars.next();
                let mut name = String::new();
                while let Some(&inner) = chars.peek() {
                    chars.next();
                    if inner == '}' {
                        break;
                    }
                    name.push(inner);
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            Some(&first) if first.is_ascii_alphabetic() || first == '_' => {
                let mut name = String::new();
                while let Some(&inner) = chars.peek() {
                    if inner.is_ascii_alphanumeric() || inner == '_' {
                        name.push(inner);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }

    out
}
