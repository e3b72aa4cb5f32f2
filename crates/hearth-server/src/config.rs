//! Server configuration.
//!
//! Startup settings come from the CLI and an optional `key value`
//! config file (`#` comments). Runtime-tunable knobs live in
//! [`RuntimeConfig`] where CONFIG GET/SET can reach them.

use std::path::{Path, PathBuf};

/// Settings fixed at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub maxclients: usize,
    pub dir: PathBuf,
    pub dbfilename: String,
    pub appendonly: bool,
    pub appendfilename: String,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 6379,
            maxclients: 10_000,
            dir: PathBuf::from("."),
            dbfilename: "dump.rdb".into(),
            appendonly: false,
            appendfilename: "appendonly.aof".into(),
            log_level: "info".into(),
        }
    }
}

impl ServerConfig {
    pub fn rdb_path(&self) -> PathBuf {
        self.dir.join(&self.dbfilename)
    }

    pub fn aof_path(&self) -> PathBuf {
        self.dir.join(&self.appendfilename)
    }

    /// Overlays `key value` lines from a config file. Unknown keys are
    /// reported as errors so typos don't silently vanish.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read config file {}: {e}", path.display()))?;
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(char::is_whitespace) else {
                return Err(format!("line {}: missing value", lineno + 1));
            };
            let value = value.trim();
            match key.to_ascii_lowercase().as_str() {
                "bind" => self.bind = value.into(),
                "port" => {
                    self.port = value
                        .parse()
                        .map_err(|_| format!("line {}: bad port", lineno + 1))?
                }
                "maxclients" => {
                    self.maxclients = value
                        .parse()
                        .map_err(|_| format!("line {}: bad maxclients", lineno + 1))?
                }
                "dir" => self.dir = PathBuf::from(value),
                "dbfilename" => self.dbfilename = value.into(),
                "appendonly" => self.appendonly = parse_bool(value, lineno)?,
                "appendfilename" => self.appendfilename = value.into(),
                "loglevel" => self.log_level = value.into(),
                other => return Err(format!("line {}: unknown key '{other}'", lineno + 1)),
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str, lineno: usize) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "yes" => Ok(true),
        "no" => Ok(false),
        _ => Err(format!("line {}: expected yes/no", lineno + 1)),
    }
}

/// Knobs CONFIG SET can change while the server runs.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Memory ceiling in bytes; 0 = unlimited. Writes are rejected
    /// with -OOM once the used-memory estimate exceeds it.
    pub maxmemory: usize,
    pub maxmemory_policy: String,
    pub maxclients: usize,
    pub min_replicas_to_write: usize,
    pub replica_serve_stale_data: bool,
    /// Soft script runtime limit in ms before the server goes BUSY.
    pub lua_time_limit: u64,
    pub zset_max_listpack_entries: i64,
    pub appendonly: bool,
    pub dir: String,
    pub dbfilename: String,
    pub save: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            maxmemory: 0,
            maxmemory_policy: "noeviction".into(),
            maxclients: 10_000,
            min_replicas_to_write: 0,
            replica_serve_stale_data: true,
            lua_time_limit: 5_000,
            zset_max_listpack_entries: 128,
            appendonly: false,
            dir: ".".into(),
            dbfilename: "dump.rdb".into(),
            save: "3600 1 300 100 60 10000".into(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_startup(cfg: &ServerConfig) -> Self {
        Self {
            maxclients: cfg.maxclients,
            appendonly: cfg.appendonly,
            dir: cfg.dir.display().to_string(),
            dbfilename: cfg.dbfilename.clone(),
            ..Default::default()
        }
    }

    /// CONFIG GET view: every (name, value) pair this build exposes.
    pub fn entries(&self) -> Vec<(String, String)> {
        vec![
            ("maxmemory".into(), self.maxmemory.to_string()),
            ("maxmemory-policy".into(), self.maxmemory_policy.clone()),
            ("maxclients".into(), self.maxclients.to_string()),
            (
                "min-replicas-to-write".into(),
                self.min_replicas_to_write.to_string(),
            ),
            (
                "replica-serve-stale-data".into(),
                if self.replica_serve_stale_data {
                    "yes".into()
                } else {
                    "no".into()
                },
            ),
            ("lua-time-limit".into(), self.lua_time_limit.to_string()),
            (
                "zset-max-ziplist-entries".into(),
                self.zset_max_listpack_entries.to_string(),
            ),
            (
                "zset-max-listpack-entries".into(),
                self.zset_max_listpack_entries.to_string(),
            ),
            (
                "appendonly".into(),
                if self.appendonly { "yes".into() } else { "no".into() },
            ),
            ("dir".into(), self.dir.clone()),
            ("dbfilename".into(), self.dbfilename.clone()),
            ("save".into(), self.save.clone()),
        ]
    }

    /// CONFIG SET: applies one parameter. Returns an error message in
    /// wire form when the name or value is unacceptable.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), String> {
        match name.to_ascii_lowercase().as_str() {
            "maxmemory" => {
                self.maxmemory = parse_memory(value)
                    .ok_or_else(|| format!("ERR Invalid argument '{value}' for CONFIG SET 'maxmemory'"))?;
            }
            "maxmemory-policy" => self.maxmemory_policy = value.into(),
            "maxclients" => {
                self.maxclients = value
                    .parse()
                    .map_err(|_| "ERR Invalid maxclients".to_string())?;
            }
            "min-replicas-to-write" => {
                self.min_replicas_to_write = value
                    .parse()
                    .map_err(|_| "ERR Invalid min-replicas-to-write".to_string())?;
            }
            "replica-serve-stale-data" => {
                self.replica_serve_stale_data = match value {
                    "yes" => true,
                    "no" => false,
                    _ => return Err("ERR argument must be 'yes' or 'no'".into()),
                };
            }
            "lua-time-limit" => {
                self.lua_time_limit = value
                    .parse()
                    .map_err(|_| "ERR Invalid lua-time-limit".to_string())?;
            }
            "zset-max-ziplist-entries" | "zset-max-listpack-entries" => {
                self.zset_max_listpack_entries = value
                    .parse()
                    .map_err(|_| "ERR Invalid zset-max-listpack-entries".to_string())?;
            }
            "appendonly" => {
                self.appendonly = value == "yes";
            }
            "save" => self.save = value.into(),
            "dir" => self.dir = value.into(),
            other => {
                return Err(format!(
                    "ERR Unknown option or number of arguments for CONFIG SET - '{other}'"
                ))
            }
        }
        Ok(())
    }
}

/// Accepts plain byte counts plus the `kb/mb/gb` (1024-based) and
/// `k/m/g` (1000-based) suffixes redis.conf uses.
fn parse_memory(value: &str) -> Option<usize> {
    let lower = value.to_ascii_lowercase();
    let (digits, mult) = if let Some(d) = lower.strip_suffix("kb") {
        (d, 1024)
    } else if let Some(d) = lower.strip_suffix("mb") {
        (d, 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix("gb") {
        (d, 1024 * 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix('k') {
        (d, 1000)
    } else if let Some(d) = lower.strip_suffix('m') {
        (d, 1_000_000)
    } else if let Some(d) = lower.strip_suffix('g') {
        (d, 1_000_000_000)
    } else {
        (lower.as_str(), 1)
    };
    digits.parse::<usize>().ok().map(|n| n * mult)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hearth.conf");
        std::fs::write(
            &path,
            "# comment\nport 7000\nmaxclients 50\nappendonly yes\ndbfilename other.rdb\n",
        )
        .unwrap();
        let mut cfg = ServerConfig::default();
        cfg.apply_file(&path).unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.maxclients, 50);
        assert!(cfg.appendonly);
        assert_eq!(cfg.dbfilename, "other.rdb");
    }

    #[test]
    fn unknown_config_key_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.conf");
        std::fs::write(&path, "nonsense 1\n").unwrap();
        let mut cfg = ServerConfig::default();
        assert!(cfg.apply_file(&path).is_err());
    }

    #[test]
    fn memory_suffixes() {
        assert_eq!(parse_memory("100"), Some(100));
        assert_eq!(parse_memory("1kb"), Some(1024));
        assert_eq!(parse_memory("2mb"), Some(2 * 1024 * 1024));
        assert_eq!(parse_memory("1k"), Some(1000));
        assert_eq!(parse_memory("junk"), None);
    }

    #[test]
    fn runtime_set_and_get() {
        let mut rc = RuntimeConfig::default();
        rc.set("maxmemory", "1mb").unwrap();
        assert_eq!(rc.maxmemory, 1024 * 1024);
        rc.set("min-replicas-to-write", "2").unwrap();
        assert_eq!(rc.min_replicas_to_write, 2);
        rc.set("zset-max-ziplist-entries", "64").unwrap();
        assert_eq!(rc.zset_max_listpack_entries, 64);
        assert!(rc.set("no-such-option", "1").is_err());
        let entries = rc.entries();
        assert!(entries.iter().any(|(k, v)| k == "maxmemory" && v == "1048576"));
    }
}
