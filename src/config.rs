//! Process-wide configuration: the mutable singleton described in
//! `spec.md` §3/§4.I, plus its JSON persistence.
//!
//! The teacher keeps process config behind a generic key/value store
//! (`mini-config`'s `Configure` derive, see `router-core::config`). That
//! fits a handful of independent scalars and blobs; our `Config` has one
//! field — `rules` — whose every edit must re-publish a fully-sorted
//! snapshot and fire a listener before the next `CONNECT` is dispatched
//! (`spec.md` §4.I/§5), which a generic KV store doesn't model well. We
//! use the teacher's other common shape instead: a single struct behind
//! `Arc<RwLock<_>>`, as `router-core::app::proxy` itself builds its
//! per-connection `host_rules`/`catch_all_rules` maps fresh from whatever
//! the config snapshot said at `ProxyApp` construction time.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::routing::{RouteTable, RoutingRule};

/// Raw vs path-based-routing dispatch mode (`spec.md` §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Raw,
    Routing,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Routing
    }
}

fn default_true() -> bool {
    true
}

fn default_signal_port() -> u16 {
    7000
}

fn default_data_port() -> u16 {
    7001
}

/// The persisted/mutable configuration singleton.
///
/// Field names match the JSON schema in `spec.md` §6 exactly so
/// `serde_json` gives a lossless round trip with no custom
/// (de)serialization code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default, rename = "rawTargetHost")]
    pub raw_target_host: String,
    #[serde(default, rename = "rawTargetPort")]
    pub raw_target_port: u16,
    #[serde(default)]
    pub signal_host: String,
    #[serde(default = "default_signal_port")]
    pub signal_port: u16,
    #[serde(default = "default_data_port")]
    pub data_port: u16,
    #[serde(default)]
    pub routes: Vec<RoutingRule>,
    #[serde(default = "default_true", rename = "autoReconnect")]
    pub auto_reconnect: bool,
    #[serde(default, rename = "forceConnectionClose")]
    pub force_connection_close: bool,
    #[serde(default, rename = "monitoringEnabled")]
    pub monitoring_enabled: bool,

    /// Ambient fields: not part of the round-trip-checked schema in
    /// `spec.md` §6, but needed to run the process.
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

fn default_admin_port() -> u16 {
    9876
}

fn default_max_concurrent() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Config {
            domain: String::new(),
            mode: Mode::Routing,
            raw_target_host: String::new(),
            raw_target_port: 0,
            signal_host: String::new(),
            signal_port: default_signal_port(),
            data_port: default_data_port(),
            routes: Vec::new(),
            auto_reconnect: true,
            force_connection_close: false,
            monitoring_enabled: false,
            admin_port: default_admin_port(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl Config {
    /// Loads config from `path`, falling back to defaults if the file
    /// doesn't exist yet (first run).
    ///
    /// Every persisted rule is re-validated (and its `pathPattern`
    /// re-normalized) the same way a fresh `RoutingRule::new()` would —
    /// `serde` only checks shape, not the `spec.md` §3 invariants, so a
    /// hand-edited config with e.g. `"pathPattern": "admin"` (no leading
    /// slash) or `"targetPort": 0` is rejected here rather than silently
    /// published into the route table.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let mut config: Config = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        for rule in &mut config.routes {
            rule.validate().map_err(|reason| ConfigError::InvalidRule {
                pattern: rule.path_pattern.clone(),
                reason,
            })?;
        }
        Ok(config)
    }

    /// Atomically writes `self` as JSON to `path`: write to a sibling temp
    /// file, then rename over the target, so a crash mid-write never
    /// leaves a truncated config file behind.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| ConfigError::Io {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    /// Default on-disk location: `<userHome>/.tunneller/tunneller-config.json`.
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".tunneller").join("tunneller-config.json")
    }
}

type RuleChangeListener = Box<dyn Fn() + Send + Sync>;

/// The process-wide config store: thread-safe reads of every field, a
/// single listener slot fired synchronously on rule add/remove so the
/// control-channel client rebuilds its working table before the next
/// `CONNECT` is dispatched.
pub struct ConfigStore {
    config: RwLock<Config>,
    table: Mutex<Arc<RouteTable>>,
    listener: Mutex<Option<RuleChangeListener>>,
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(config: Config, path: PathBuf) -> Arc<ConfigStore> {
        let table = Arc::new(RouteTable::new(config.routes.clone()));
        Arc::new(ConfigStore {
            config: RwLock::new(config),
            table: Mutex::new(table),
            listener: Mutex::new(None),
            path,
        })
    }

    /// A consistent clone of the whole config (cheap: used by readers that
    /// need several fields at once, e.g. the admin status endpoint).
    pub fn snapshot(&self) -> Config {
        self.config.read().unwrap().clone()
    }

    /// An atomic, fully-sorted snapshot of the route table. Never
    /// partially sorted — it's either the table from before an edit, or
    /// the table from after one.
    pub fn route_table(&self) -> Arc<RouteTable> {
        self.table.lock().unwrap().clone()
    }

    /// Installs the single rule-change listener, replacing any previous
    /// one.
    pub fn set_listener(&self, listener: RuleChangeListener) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    /// Rebuilds the published route table from the current `routes` and
    /// fires the listener — called after every rule mutation. The
    /// listener runs without holding the config lock so it may safely read
    /// config itself.
    fn publish_routes(&self) {
        let rules = self.config.read().unwrap().routes.clone();
        let table = Arc::new(RouteTable::new(rules));
        *self.table.lock().unwrap() = table;

        if let Some(listener) = self.listener.lock().unwrap().as_ref() {
            listener();
        }
    }

    /// Validates `rule` (same check `Config::load` runs on every persisted
    /// route) before publishing it — an admin `POST /routes` with a bad
    /// `pathPattern`/`targetHost`/`targetPort` is rejected, not silently
    /// added to a table it can never match against.
    pub fn add_rule(&self, mut rule: RoutingRule) -> Result<(), ConfigError> {
        rule.validate().map_err(|reason| ConfigError::InvalidRule {
            pattern: rule.path_pattern.clone(),
            reason,
        })?;
        self.config.write().unwrap().routes.push(rule);
        self.publish_routes();
        Ok(())
    }

    /// Removes the rule at `index` in the *unsorted* `routes` vector
    /// (matching the admin surface's `DELETE /routes/{i}`, which indexes
    /// the stored order, not the published sorted order).
    pub fn remove_rule(&self, index: usize) -> Result<RoutingRule, ConfigError> {
        let mut config = self.config.write().unwrap();
        if index >= config.routes.len() {
            return Err(ConfigError::InvalidRule {
                pattern: format!("index {index}"),
                reason: "out of range".to_string(),
            });
        }
        let removed = config.routes.remove(index);
        drop(config);
        self.publish_routes();
        Ok(removed)
    }

    /// Index bound is checked first (a distinct "not found" condition from
    /// an admin caller's point of view) before the replacement rule's
    /// content is validated.
    pub fn replace_rule(&self, index: usize, mut rule: RoutingRule) -> Result<(), ConfigError> {
        {
            let config = self.config.read().unwrap();
            if index >= config.routes.len() {
                return Err(ConfigError::InvalidRule {
                    pattern: format!("index {index}"),
                    reason: "out of range".to_string(),
                });
            }
        }
        rule.validate().map_err(|reason| ConfigError::InvalidRule {
            pattern: rule.path_pattern.clone(),
            reason,
        })?;
        let mut config = self.config.write().unwrap();
        if index >= config.routes.len() {
            return Err(ConfigError::InvalidRule {
                pattern: format!("index {index}"),
                reason: "out of range".to_string(),
            });
        }
        config.routes[index] = rule;
        drop(config);
        self.publish_routes();
        Ok(())
    }

    pub fn set_mode(&self, mode: Mode) {
        self.config.write().unwrap().mode = mode;
    }

    pub fn set_domain(&self, domain: String) {
        self.config.write().unwrap().domain = domain;
    }

    pub fn set_signal(&self, host: String, port: u16) {
        let mut config = self.config.write().unwrap();
        config.signal_host = host;
        config.signal_port = port;
    }

    pub fn persist(&self) -> Result<(), ConfigError> {
        self.snapshot().save(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trips_structurally() {
        let mut config = Config::default();
        config.domain = "agent1".to_string();
        config.routes.push(RoutingRule::new("/api/*", "h1", 8081).unwrap());

        let json = serde_json::to_string(&config).unwrap();
        let restored: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.domain, config.domain);
        assert_eq!(restored.routes, config.routes);
        assert_eq!(restored.mode, config.mode);
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_missing() {
        let config = Config::load(Path::new("/nonexistent/tunneller-config.json")).unwrap();
        assert_eq!(config.mode, Mode::Routing);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        let mut config = Config::default();
        config.domain = "agent1".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.domain, "agent1");
    }

    #[test]
    fn rule_mutation_fires_listener_and_rebuilds_table() {
        let store = ConfigStore::new(Config::default(), PathBuf::from("/tmp/unused.json"));
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let f = fired.clone();
        store.set_listener(Box::new(move || {
            f.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));

        store.add_rule(RoutingRule::new("/api/*", "h1", 8081).unwrap()).unwrap();

        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(store.route_table().len(), 1);
    }

    #[test]
    fn remove_rule_rejects_out_of_range_index() {
        let store = ConfigStore::new(Config::default(), PathBuf::from("/tmp/unused.json"));
        assert!(store.remove_rule(0).is_err());
    }

    #[test]
    fn add_rule_rejects_invalid_rule_without_publishing() {
        let store = ConfigStore::new(Config::default(), PathBuf::from("/tmp/unused.json"));
        let bad = RoutingRule {
            path_pattern: "/x".to_string(),
            target_host: String::new(),
            target_port: 8081,
            description: String::new(),
            strip_prefix: false,
            priority: 100,
            forward_host: false,
            use_ssl: false,
        };
        assert!(store.add_rule(bad).is_err());
        assert_eq!(store.route_table().len(), 0);
    }

    #[test]
    fn load_rejects_persisted_rule_with_bad_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(
            &path,
            r#"{"routes":[{"pathPattern":"/x","targetHost":"h","targetPort":0}]}"#,
        )
        .unwrap();
        assert!(Config::load(&path).is_err());
    }
}
