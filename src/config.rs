use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

use crate::database::{DatabaseError, Dialect};

/// Connection settings for one database
///
/// A flat string mapping with a `driver` discriminator plus per-driver keys:
///
/// | driver     | required                                   | optional                          |
/// |------------|--------------------------------------------|-----------------------------------|
/// | `sqlite`   | `filename`                                 |                                   |
/// | `mysql`    | `hostname`, `username`, `password`, `database` | `port`, `charset`, `schema_table` |
/// | `postgres` | `hostname`, `username`, `password`, `database` | `port`, `schema_table`            |
///
/// Every driver also honours `log_queries` and `stopwatch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Settings for the given driver name
    pub fn new(driver: &str) -> Self {
        Self::default().with("driver", driver)
    }

    /// SQLite settings for a file path (or `:memory:`)
    pub fn sqlite(filename: &str) -> Self {
        Self::new("sqlite").with("filename", filename)
    }

    pub fn from_map(map: HashMap<String, String>) -> Self {
        Self {
            values: map.into_iter().collect(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Selected dialect; missing or unknown drivers are configuration errors
    pub fn dialect(&self) -> Result<Dialect, DatabaseError> {
        let driver = self
            .get("driver")
            .ok_or_else(|| DatabaseError::Config("you must define a database driver".to_string()))?;
        driver.parse()
    }

    /// Fail on the first absent key
    pub fn require(&self, keys: &[&str]) -> Result<(), DatabaseError> {
        match keys.iter().find(|key| !self.contains(key)) {
            Some(missing) => Err(DatabaseError::missing_setting(missing)),
            None => Ok(()),
        }
    }

    pub fn require_str(&self, key: &str) -> Result<&str, DatabaseError> {
        self.get(key)
            .ok_or_else(|| DatabaseError::missing_setting(key))
    }

    /// Optional typed value; present but unparsable is an error
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, DatabaseError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                DatabaseError::Config(format!("invalid value for '{}': {}", key, raw))
            }),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, DatabaseError> {
        match self.get(key).map(|v| v.trim().to_lowercase()) {
            None => Ok(false),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" | "" => Ok(false),
                _ => Err(DatabaseError::Config(format!(
                    "invalid boolean for '{}': {}",
                    key, v
                ))),
            },
        }
    }

    /// Copy safe to print: passwords are masked
    pub fn masked(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| {
                let shown = if k == "password" {
                    "********".to_string()
                } else {
                    v.clone()
                };
                (k.clone(), shown)
            })
            .collect()
    }
}

pub struct PolyConfig {
    /// Path to the directory holding polydb's files
    pub data_dir: String,

    /// Connection settings of the default database
    pub settings: Settings,
}

const EMPTY_CONFIG: &str = r#"### polydb configuration file

### database driver: sqlite, mysql or postgres
driver = "sqlite"

### sqlite: database file (defaults to <data_dir>/polydb.sqlite3)
# filename = "~/.polydb/polydb.sqlite3"

### mysql / postgres
# hostname = "localhost"
# port = 5432
# username = "polydb"
# password = ""
# database = "polydb"
# schema_table = "schema_version"

### diagnostics
# log_queries = false
# stopwatch = false
"#;

impl Default for PolyConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());
        let data_dir = format!("{}/.polydb", home_dir);
        let settings = Settings::sqlite(&format!("{}/polydb.sqlite3", data_dir));

        Self { data_dir, settings }
    }
}

impl PolyConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<PolyConfig> {
        let mut builder = Config::builder();

        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();
        let polydb_dir = format!("{}/.polydb", home_dir.as_str());

        // Add in toml configuration file
        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                }
            }
            None => {
                std::fs::create_dir_all(polydb_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create polydb directory: {}", e))?;
                let p = format!("{}/polydb.toml", polydb_dir.as_str());
                if !Path::new(p.as_str()).exists() {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
                builder = builder.add_source(config::File::with_name(p.as_str()));
            }
        }

        // Add in settings from the environment (with a prefix of POLYDB)
        // E.g., `POLYDB_DRIVER=postgres POLYDB_HOSTNAME=db ./polydb info`
        builder = builder.add_source(config::Environment::with_prefix("POLYDB"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let mut map = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        let data_dir = map
            .remove("data_dir")
            .unwrap_or_else(|| polydb_dir.clone());

        let mut settings = Settings::from_map(map);
        if settings.get("driver") == Some("sqlite") && !settings.contains("filename") {
            std::fs::create_dir_all(data_dir.as_str())
                .map_err(|e| anyhow!("Unable to create data directory: {}", e))?;
            settings.set("filename", Self::sqlite_path_in(&data_dir));
        }

        Ok(PolyConfig { data_dir, settings })
    }

    fn sqlite_path_in(data_dir: &str) -> String {
        format!("{}/polydb.sqlite3", data_dir.trim_end_matches('/'))
    }

    /// Get the path of the default SQLite database file
    pub fn sqlite_path(&self) -> String {
        Self::sqlite_path_in(&self.data_dir)
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Data Directory:     {}", self.data_dir)];
        for (key, value) in self.settings.masked() {
            lines.push(format!("{:<20}{}", format!("{}:", key), value));
        }
        lines.join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.polydb/polydb.toml", home_dir)
    }
}
