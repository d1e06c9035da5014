//! Configuration loading and auto-detection.
//!
//! An explicit `--config` path is honored first. Otherwise `./.env` is
//! tried, then the YAML candidates (`./ask4me.yaml` and named variants).
//! `.yaml`/`.yml` files parse as YAML, `.env`-style files as key=value
//! lines; unknown extensions try YAML then dotenv.
//!
//! Env-file keys (and the process environment as a fallback) are read as
//! `ASK4ME_<KEY>` first, bare `<KEY>` second.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{Config, ConfigError};

/// YAML candidates probed when no `./.env` exists, in priority order.
fn yaml_candidates() -> Vec<PathBuf> {
    [
        "./ask4me.yaml",
        "./ask4me.yml",
        "./ask for me.yml",
        "./ask-for-me.yml",
        "./ask_for_me.yml",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

/// Loads configuration, auto-detecting the file when no explicit path is
/// given. Returns the normalized config and the path it came from.
pub fn load_auto(explicit: Option<&Path>) -> Result<(Config, PathBuf), ConfigError> {
    if let Some(path) = explicit {
        let cfg = load_any(path)?;
        return Ok((cfg, path.to_path_buf()));
    }

    let dotenv = PathBuf::from("./.env");
    if dotenv.is_file() {
        let cfg = load_dotenv(&dotenv)?;
        return Ok((cfg, dotenv));
    }

    let candidates = yaml_candidates();
    for path in &candidates {
        if path.is_file() {
            let cfg = load_yaml(path)?;
            return Ok((cfg, path.clone()));
        }
    }

    let mut searched = vec![dotenv];
    searched.extend(candidates);
    Err(ConfigError::NotFound { searched })
}

/// Loads a config file, dispatching on its extension.
pub fn load_any(path: &Path) -> Result<Config, ConfigError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    let base = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    match ext.as_deref() {
        Some("yaml") | Some("yml") => load_yaml(path),
        Some("env") => load_dotenv(path),
        _ if base.starts_with(".env") => load_dotenv(path),
        _ => {
            let yaml_err = match load_yaml(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => e,
            };
            let dotenv_err = match load_dotenv(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => e,
            };
            Err(ConfigError::Unrecognized {
                path: path.to_path_buf(),
                yaml: yaml_err.to_string(),
                dotenv: dotenv_err.to_string(),
            })
        }
    }
}

/// Loads and normalizes a YAML config file.
pub fn load_yaml(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&contents)?;
    cfg.normalize()?;
    Ok(cfg)
}

/// Loads and normalizes a key=value env file.
pub fn load_dotenv(path: &Path) -> Result<Config, ConfigError> {
    let mut vars = HashMap::new();
    for item in dotenvy::from_path_iter(path)? {
        let (key, value) = item?;
        vars.insert(key, value);
    }
    config_from_vars(&vars)
}

/// Builds a config from an env-style map, falling back to the process
/// environment for keys the map does not carry.
pub fn config_from_vars(vars: &HashMap<String, String>) -> Result<Config, ConfigError> {
    // The prefixed name wins over the bare name across the merged file and
    // process environment, wherever each happens to be set.
    let get = |key: &str| -> String {
        let prefixed = format!("ASK4ME_{key}");
        vars.get(&prefixed)
            .cloned()
            .or_else(|| std::env::var(&prefixed).ok())
            .or_else(|| vars.get(key).cloned())
            .or_else(|| std::env::var(key).ok())
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let mut cfg = Config {
        base_url: get("BASE_URL"),
        api_key: get("API_KEY"),
        serverchan_sendkey: get("SERVERCHAN_SENDKEY"),
        apprise_urls: split_list(&get("APPRISE_URLS")),
        apprise_bin: get("APPRISE_BIN"),
        sqlite_path: get("SQLITE_PATH"),
        default_expires_in_seconds: parse_int(&get("DEFAULT_EXPIRES_IN_SECONDS")),
        sse_heartbeat_interval_seconds: parse_int(&get("SSE_HEARTBEAT_INTERVAL_SECONDS")).max(0)
            as u64,
        listen_addr: get("LISTEN_ADDR"),
        terminal_cache_seconds: parse_int(&get("TERMINAL_CACHE_SECONDS")).max(0) as u64,
    };
    cfg.normalize()?;
    Ok(cfg)
}

/// Comma- or newline-separated list, blanks dropped.
fn split_list(raw: &str) -> Vec<String> {
    raw.replace('\n', ",")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lenient integer parse: blank or malformed reads as 0.
fn parse_int(raw: &str) -> i64 {
    raw.trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn yaml_file_loads_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "ask4me.yaml",
            "base_url: https://ask.example.com\napi_key: k\napprise_urls:\n  - ntfy://topic\n",
        );
        let cfg = load_yaml(&path).unwrap();
        assert_eq!(cfg.base_url, "https://ask.example.com");
        assert_eq!(cfg.apprise_urls, vec!["ntfy://topic"]);
        assert_eq!(cfg.default_expires_in_seconds, 3600);
    }

    #[test]
    fn dotenv_file_loads_with_prefix_preference() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "service.env",
            "ASK4ME_BASE_URL=https://a.example.com\nBASE_URL=https://ignored.example.com\n\
             API_KEY=k\nAPPRISE_URLS=ntfy://a, ntfy://b\nDEFAULT_EXPIRES_IN_SECONDS=120\n",
        );
        let cfg = load_dotenv(&path).unwrap();
        assert_eq!(cfg.base_url, "https://a.example.com");
        assert_eq!(cfg.apprise_urls, vec!["ntfy://a", "ntfy://b"]);
        assert_eq!(cfg.default_expires_in_seconds, 120);
    }

    #[test]
    fn dotenv_missing_required_key_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "bad.env", "ASK4ME_BASE_URL=https://a.example.com\n");
        // No API key anywhere (the test environment does not set ASK4ME_API_KEY).
        let err = load_dotenv(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { key: "api_key" }));
    }

    #[test]
    fn unknown_extension_tries_yaml_then_dotenv() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "config.conf",
            "base_url: https://a.example.com\napi_key: k\n",
        );
        let cfg = load_any(&path).unwrap();
        assert_eq!(cfg.api_key, "k");
    }

    #[test]
    fn split_list_handles_commas_and_newlines() {
        assert_eq!(split_list("a, b\nc,,"), vec!["a", "b", "c"]);
        assert!(split_list("  ").is_empty());
    }

    #[test]
    fn parse_int_is_lenient() {
        assert_eq!(parse_int("42"), 42);
        assert_eq!(parse_int(""), 0);
        assert_eq!(parse_int("nope"), 0);
    }
}
