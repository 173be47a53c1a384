use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("'{0}' must be a list")]
    NotAList(&'static str),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Key,
    #[default]
    Password,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Password => "password",
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

/// One remote server entry. `name` is the lookup key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerProfile {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    /// Plain-text password. When absent the OS keyring is consulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Verify the server's host key against `~/.ssh/known_hosts`.
    #[serde(default)]
    pub secure: bool,
    /// Directory the browser starts in; also the fallback upload base.
    #[serde(default, alias = "remote_base_path", skip_serializing_if = "Option::is_none")]
    pub remote_base_path: Option<String>,
    #[serde(default)]
    pub auth: AuthMethod,
    #[serde(default, alias = "key_path", skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
}

impl ServerProfile {
    /// Remote base with `\` normalized, `/` when unset or empty.
    pub fn base_path(&self) -> String {
        match self.remote_base_path.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => p.replace('\\', "/"),
            _ => "/".to_string(),
        }
    }

    /// Human-friendly identifier: name, else host, else `server`.
    pub fn identifier(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else if !self.host.is_empty() {
            &self.host
        } else {
            "server"
        }
    }
}

/// Maps a local directory onto a remote one for a given server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathMapping {
    #[serde(default, alias = "server_name")]
    pub server_name: String,
    #[serde(default, alias = "local_base_path")]
    pub local_base_path: String,
    #[serde(default, alias = "remote_base_path")]
    pub remote_base_path: String,
}

/// Top-level flags of the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, alias = "default_server", alias = "defaultServerName")]
    pub default_server: Option<String>,
    #[serde(default = "default_true", alias = "auto_upload_on_save")]
    pub auto_upload_on_save: bool,
    #[serde(default = "default_true", alias = "show_notifications")]
    pub show_notifications: bool,
    #[serde(default, alias = "temp_root")]
    pub temp_root: Option<PathBuf>,
    #[serde(default, alias = "project_roots")]
    pub project_roots: Vec<PathBuf>,
    /// Reject entry names containing separators or `.`/`..`.
    #[serde(default, alias = "strict_names")]
    pub strict_names: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_server: None,
            auto_upload_on_save: true,
            show_notifications: true,
            temp_root: None,
            project_roots: Vec::new(),
            strict_names: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

enum Document {
    Toml(toml::Table),
    Json(serde_json::Value),
}

/// Read-through view of the config file. Every accessor re-reads the file,
/// so edits take effect on the next call without a reload step.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
}

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.config/velasync/config.toml` (platform config dir).
    pub fn default_location() -> Self {
        Self::new(config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn servers(&self) -> Result<Vec<ServerProfile>, ConfigError> {
        self.list_section("server", &["server", "servers"])
    }

    pub fn mappings(&self) -> Result<Vec<PathMapping>, ConfigError> {
        self.list_section("mapping", &["mapping", "mappings", "pathMappings"])
    }

    pub fn settings(&self) -> Result<Settings, ConfigError> {
        match self.read()? {
            None => Ok(Settings::default()),
            Some(Document::Toml(table)) => Ok(toml::Value::Table(table).try_into()?),
            Some(Document::Json(value)) => Ok(serde_json::from_value(value)?),
        }
    }

    fn format(&self) -> Format {
        match self.path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Toml,
        }
    }

    fn read(&self) -> Result<Option<Document>, ConfigError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        let doc = match self.format() {
            Format::Toml => Document::Toml(toml::from_str(&content)?),
            Format::Json => Document::Json(serde_json::from_str(&content)?),
        };
        Ok(Some(doc))
    }

    /// The first key found among `keys` wins.
    fn list_section<T: DeserializeOwned>(
        &self,
        label: &'static str,
        keys: &[&str],
    ) -> Result<Vec<T>, ConfigError> {
        match self.read()? {
            None => Ok(Vec::new()),
            Some(Document::Toml(table)) => {
                let Some(value) = keys.iter().find_map(|k| table.get(*k)) else {
                    return Ok(Vec::new());
                };
                if !value.is_array() {
                    return Err(ConfigError::NotAList(label));
                }
                Ok(value.clone().try_into()?)
            }
            Some(Document::Json(doc)) => {
                let Some(value) = keys.iter().find_map(|k| doc.get(*k)) else {
                    return Ok(Vec::new());
                };
                if !value.is_array() {
                    return Err(ConfigError::NotAList(label));
                }
                Ok(serde_json::from_value(value.clone())?)
            }
        }
    }
}

fn config_path() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("velasync").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> ConfigSource {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        ConfigSource::new(path)
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let source = ConfigSource::new(dir.path().join("absent.toml"));
        assert!(source.servers().unwrap().is_empty());
        assert!(source.mappings().unwrap().is_empty());
        let settings = source.settings().unwrap();
        assert!(settings.auto_upload_on_save);
        assert!(settings.show_notifications);
        assert_eq!(settings.default_server, None);
    }

    #[test]
    fn test_toml_sections() {
        let dir = tempfile::tempdir().unwrap();
        let source = write(
            &dir,
            "config.toml",
            r#"
default_server = "web"
auto_upload_on_save = false

[[server]]
name = "web"
host = "example.com"
user = "deploy"
password = "pw"
remoteBasePath = "/var/www"

[[mapping]]
serverName = "web"
localBasePath = "/home/u/site"
remoteBasePath = "/var/www"
"#,
        );
        let servers = source.servers().unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].port, 22);
        assert_eq!(servers[0].auth, AuthMethod::Password);
        assert_eq!(servers[0].base_path(), "/var/www");
        assert_eq!(source.mappings().unwrap()[0].local_base_path, "/home/u/site");
        let settings = source.settings().unwrap();
        assert_eq!(settings.default_server.as_deref(), Some("web"));
        assert!(!settings.auto_upload_on_save);
    }

    #[test]
    fn test_json_sections_and_reread() {
        let dir = tempfile::tempdir().unwrap();
        let source = write(
            &dir,
            "config.json",
            r#"{"servers":[{"name":"S","host":"h","port":2222,"user":"u"}]}"#,
        );
        assert_eq!(source.servers().unwrap()[0].port, 2222);

        fs::write(source.path(), r#"{"servers":[]}"#).unwrap();
        assert!(source.servers().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_and_non_list() {
        let dir = tempfile::tempdir().unwrap();
        let broken = write(&dir, "broken.json", "{ not json");
        assert!(matches!(broken.servers(), Err(ConfigError::JsonParse(_))));

        let scalar = write(&dir, "scalar.toml", "server = 3\n");
        assert!(matches!(scalar.servers(), Err(ConfigError::NotAList("server"))));
    }

    #[test]
    fn test_identifier_fallbacks() {
        let mut profile = ServerProfile {
            name: String::new(),
            host: "h.example".into(),
            port: 22,
            user: "u".into(),
            password: None,
            secure: false,
            remote_base_path: Some("  ".into()),
            auth: AuthMethod::Password,
            key_path: None,
        };
        assert_eq!(profile.identifier(), "h.example");
        assert_eq!(profile.base_path(), "/");
        profile.host.clear();
        assert_eq!(profile.identifier(), "server");
    }
}
