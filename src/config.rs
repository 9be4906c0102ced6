//! Runtime configuration from the environment, optionally seeded by a `.env` file.
//! Defaults match a local run next to the Onecta token set.

use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_PROMETHEUS_PORT: u16 = 3001;
pub const DEFAULT_TOKEN_FILE: &str = "./.daikin-controller-cloud-tokenset";
/// Onecta allows this many API calls per account and day.
pub const DAILY_REQUEST_QUOTA: u64 = 200;

#[derive(Debug, Clone)]
pub struct Config {
    pub oidc_client_id: String,
    pub oidc_client_secret: String,
    /// Poll cadence, and TTL of the cached device snapshot.
    pub update_interval: Duration,
    pub prometheus_port: u16,
    pub cache_file_path: PathBuf,
    /// OIDC token set written by the Onecta authorization flow.
    pub token_file_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let oidc_client_id = non_empty("OIDC_CLIENT_ID")
            .or_else(|| non_empty("oidc_client_id"))
            .ok_or_else(|| "Missing OIDC client id: set OIDC_CLIENT_ID".to_string())?;
        let oidc_client_secret = non_empty("OIDC_CLIENT_SECRET")
            .or_else(|| non_empty("oidc_client_secret"))
            .ok_or_else(|| "Missing OIDC client secret: set OIDC_CLIENT_SECRET".to_string())?;

        let update_interval_secs = match non_empty("UPDATE_INTERVAL") {
            Some(s) => s
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| format!("UPDATE_INTERVAL must be a positive number of seconds, got {:?}", s))?,
            None => DEFAULT_UPDATE_INTERVAL_SECS,
        };

        let prometheus_port = match non_empty("PROMETHEUS_PORT") {
            Some(s) => s
                .parse::<u16>()
                .map_err(|_| format!("PROMETHEUS_PORT must be a port number, got {:?}", s))?,
            None => DEFAULT_PROMETHEUS_PORT,
        };

        let cache_file_path =
            PathBuf::from(non_empty("CACHE_FILE_PATH").unwrap_or_else(|| crate::cache::DEFAULT_CACHE_FILE.to_string()));
        let token_file_path = PathBuf::from(non_empty("TOKEN_FILE_PATH").unwrap_or_else(|| DEFAULT_TOKEN_FILE.to_string()));

        Ok(Config {
            oidc_client_id,
            oidc_client_secret,
            update_interval: Duration::from_secs(update_interval_secs),
            prometheus_port,
            cache_file_path,
            token_file_path,
        })
    }

    /// Upstream calls per day if every cycle misses the cache.
    pub fn requests_per_day(&self) -> u64 {
        86_400u64.div_ceil(self.update_interval.as_secs().max(1))
    }

    pub fn warn_if_over_quota(&self) {
        let per_day = self.requests_per_day();
        if per_day > DAILY_REQUEST_QUOTA {
            warn!(
                "UPDATE_INTERVAL={}s means up to {} requests/day, above the Daikin Cloud quota of {}",
                self.update_interval.as_secs(),
                per_day,
                DAILY_REQUEST_QUOTA
            );
        }
    }
}

/// Merge `KEY=value` lines from `path` into the process environment.
/// Variables that are already set win over the file.
pub fn load_env_file(path: &Path) -> Result<usize, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let mut applied = 0;
    for (index, line) in content.lines().enumerate() {
        let Some((key, value)) =
            parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        if std::env::var_os(&key).is_none() {
            // Single-threaded at this point: logging and workers start later.
            unsafe {
                std::env::set_var(&key, value);
            }
            applied += 1;
        }
    }
    Ok(applied)
}

/// One `.env` line: blank lines and `#` comments yield `None`; an optional
/// `export ` prefix is accepted; values may be single- or double-quoted.
pub fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

    let (key, raw) = line.split_once('=').ok_or("missing '=' in assignment")?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(format!("invalid variable name {:?}", key));
    }

    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(quote @ ('"' | '\'')) => unquote(&raw[1..], quote)?,
        _ => raw.split(" #").next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}

fn unquote(body: &str, quote: char) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, ch)) = chars.next() {
        if ch == quote {
            let rest = body[i + 1..].trim();
            if rest.is_empty() || rest.starts_with('#') {
                return Ok(out);
            }
            return Err(format!("unexpected text after closing {}", quote));
        }
        if ch == '\\' && quote == '"' {
            match chars.next().map(|(_, c)| c) {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => break,
            }
        } else {
            out.push(ch);
        }
    }
    Err(format!("unterminated {}-quoted value", quote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let cfg = Config::from_lookup(lookup(&[("OIDC_CLIENT_ID", "id"), ("OIDC_CLIENT_SECRET", "secret")])).unwrap();
        assert_eq!(cfg.update_interval, Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS));
        assert_eq!(cfg.prometheus_port, DEFAULT_PROMETHEUS_PORT);
        assert_eq!(cfg.cache_file_path, PathBuf::from("./daikin-cache.json"));
        assert_eq!(cfg.token_file_path, PathBuf::from(DEFAULT_TOKEN_FILE));
    }

    #[test]
    fn accepts_lowercase_credentials_and_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("oidc_client_id", "id"),
            ("oidc_client_secret", "secret"),
            ("UPDATE_INTERVAL", "600"),
            ("PROMETHEUS_PORT", "9101"),
            ("CACHE_FILE_PATH", "/var/lib/daikin/cache.json"),
        ]))
        .unwrap();
        assert_eq!(cfg.oidc_client_id, "id");
        assert_eq!(cfg.update_interval, Duration::from_secs(600));
        assert_eq!(cfg.prometheus_port, 9101);
        assert_eq!(cfg.cache_file_path, PathBuf::from("/var/lib/daikin/cache.json"));
        assert_eq!(cfg.requests_per_day(), 144);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[("OIDC_CLIENT_SECRET", "s")])).is_err());
        let base = [("OIDC_CLIENT_ID", "id"), ("OIDC_CLIENT_SECRET", "s")];
        assert!(Config::from_lookup(lookup(&[base[0], base[1], ("UPDATE_INTERVAL", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[base[0], base[1], ("UPDATE_INTERVAL", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[base[0], base[1], ("PROMETHEUS_PORT", "70000")])).is_err());
    }

    #[test]
    fn default_interval_exceeds_quota() {
        let cfg = Config::from_lookup(lookup(&[("OIDC_CLIENT_ID", "id"), ("OIDC_CLIENT_SECRET", "s")])).unwrap();
        assert_eq!(cfg.requests_per_day(), 2880);
        assert!(cfg.requests_per_day() > DAILY_REQUEST_QUOTA);
    }

    #[test]
    fn parses_env_lines() {
        assert_eq!(parse_env_line("  # comment").unwrap(), None);
        assert_eq!(parse_env_line("").unwrap(), None);
        assert_eq!(
            parse_env_line("export UPDATE_INTERVAL=600 # ten minutes").unwrap(),
            Some(("UPDATE_INTERVAL".into(), "600".into()))
        );
        assert_eq!(
            parse_env_line(r#"OIDC_CLIENT_SECRET="a\"b#c" # trailing"#).unwrap(),
            Some(("OIDC_CLIENT_SECRET".into(), "a\"b#c".into()))
        );
        assert_eq!(
            parse_env_line("CACHE_FILE_PATH='/tmp/x y.json'").unwrap(),
            Some(("CACHE_FILE_PATH".into(), "/tmp/x y.json".into()))
        );
        assert!(parse_env_line("NO_EQUALS").is_err());
        assert!(parse_env_line("BAD KEY=1").is_err());
        assert!(parse_env_line("X=\"open").is_err());
        assert!(parse_env_line("X='a' b").is_err());
    }

    #[test]
    fn env_file_does_not_override_existing_vars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "DAIKIN_EXPORTER_TEST_FRESH=from-file\nPATH=from-file\n").unwrap();

        let applied = load_env_file(&path).unwrap();
        assert_eq!(applied, 1);
        assert_eq!(std::env::var("DAIKIN_EXPORTER_TEST_FRESH").unwrap(), "from-file");
        assert_ne!(std::env::var("PATH").unwrap(), "from-file");
    }
}
