use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::client::ClientConfig;

/// Values read from a `.cdsapirc` file.
#[derive(Debug, Default, PartialEq, Eq)]
struct RcConfig {
    url: Option<String>,
    key: Option<String>,
    verify: Option<bool>,
}

pub(crate) fn load_config(
    url: Option<String>,
    key: Option<String>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    let url = url.or_else(|| std::env::var("CDSAPI_URL").ok());
    let key = key.or_else(|| std::env::var("CDSAPI_KEY").ok());
    resolve_config(url, key, verify, &rc_candidates())
}

/// Fills whatever is still missing from the first existing rc file.
fn resolve_config(
    mut url: Option<String>,
    mut key: Option<String>,
    verify: Option<bool>,
    rc_candidates: &[PathBuf],
) -> Result<ClientConfig> {
    let mut file_verify: Option<bool> = None;

    if url.is_none() || key.is_none() || verify.is_none() {
        if let Some(rc_path) = rc_candidates.iter().find(|p| p.exists()) {
            log::debug!("reading {}", rc_path.display());
            let cfg = read_rc(rc_path).with_context(|| {
                format!("failed to read configuration file {}", rc_path.display())
            })?;
            url = url.or(cfg.url);
            key = key.or(cfg.key);
            file_verify = cfg.verify;
        }
    }

    let Some(url) = url else {
        bail!("{}", missing("url", "CDSAPI_URL", rc_candidates));
    };
    let Some(key) = key else {
        bail!("{}", missing("key", "CDSAPI_KEY", rc_candidates));
    };
    let verify = verify.or(file_verify).unwrap_or(true);

    Ok(ClientConfig { url, key, verify })
}

fn missing(field: &str, env: &str, rc_candidates: &[PathBuf]) -> String {
    if rc_candidates.is_empty() {
        return format!("Missing configuration: {field} (set {env} or create .cdsapirc)");
    }
    let paths = rc_candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("Missing configuration: {field} (set {env} or put `{field}:` in one of: {paths})")
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

/// Parses `key: value` lines. A key with an empty value takes its value from
/// the next line when that line has no colon.
fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !line.contains(':') {
                set_field(&mut cfg, pk, strip_quotes(line));
                continue;
            }
        }

        let Some((k, v)) = line.split_once(':') else {
            continue;
        };
        let k = k.trim();
        let v = strip_quotes(v);
        match k {
            "url" | "key" if v.is_empty() => pending_key = Some(k),
            "url" | "key" => set_field(&mut cfg, k, v),
            "verify" if !v.is_empty() => cfg.verify = Some(v != "0"),
            _ => {}
        }
    }

    cfg
}

fn set_field(cfg: &mut RcConfig, field: &str, value: &str) {
    match field {
        "url" => cfg.url = Some(value.to_string()),
        "key" => cfg.key = Some(value.to_string()),
        _ => {}
    }
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// `CDSAPI_RC` alone if set, else `./.cdsapirc` then `~/.cdsapirc`.
fn rc_candidates() -> Vec<PathBuf> {
    if let Ok(p) = std::env::var("CDSAPI_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".cdsapirc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".cdsapirc"));
    }
    v
}
