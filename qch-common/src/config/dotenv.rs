//! Minimal `.env` reader for development setups.
//!
//! Values are returned as a map and consulted by [`EnvParser`](super::EnvParser)
//! after the process environment; the process environment is never modified.

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DotenvError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: expected KEY=VALUE")]
    Syntax { path: String, line: usize },
}

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped, an
/// optional `export ` prefix is accepted and matching quotes are removed.
pub fn parse_dotenv(text: &str, origin: &str) -> Result<HashMap<String, String>, DotenvError> {
    let mut vars = HashMap::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            return Err(DotenvError::Syntax {
                path: origin.to_string(),
                line: idx + 1,
            });
        };
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(DotenvError::Syntax {
                path: origin.to_string(),
                line: idx + 1,
            });
        }
        vars.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    Ok(vars)
}

/// Load `path` if it exists. A missing file yields an empty map.
pub fn load_dotenv(path: &Path) -> Result<HashMap<String, String>, DotenvError> {
    let origin = path.display().to_string();
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let vars = parse_dotenv(&text, &origin)?;
            debug!(path = %origin, count = vars.len(), "Loaded .env file");
            Ok(vars)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(source) => Err(DotenvError::Io {
            path: origin,
            source,
        }),
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_pairs() {
        let text = "# comment\nGOOGLE_API_KEY=abc123\n\n\
                    export QCH_SEED = 42\nQUOTED=\"a b\"\nSINGLE='x'\n";
        let vars = parse_dotenv(text, ".env").unwrap();
        assert_eq!(vars["GOOGLE_API_KEY"], "abc123");
        assert_eq!(vars["QCH_SEED"], "42");
        assert_eq!(vars["QUOTED"], "a b");
        assert_eq!(vars["SINGLE"], "x");
    }

    #[test]
    fn test_parse_rejects_missing_equals() {
        let err = parse_dotenv("OK=1\nBROKEN\n", ".env").unwrap_err();
        assert!(matches!(err, DotenvError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = load_dotenv(&dir.path().join(".env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "QCH_MAX_ATTEMPTS=5\n").unwrap();
        assert_eq!(load_dotenv(&path).unwrap()["QCH_MAX_ATTEMPTS"], "5");
    }
}
