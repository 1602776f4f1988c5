use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

pub const CONFIG_ENV: &str = "CRONFLEET_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "app.toml";

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    pub database: Option<Database>,
    pub master: Option<MasterConfig>,
    pub node: Option<NodeConfig>,
    pub client: Option<ClientConfig>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Database {
    pub username: String,
    pub password: String,
    pub cluster_url: String,
    #[serde(default = "default_database_name")]
    pub name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct MasterConfig {
    #[serde(default = "default_master_listen")]
    pub listen: String,
    #[serde(default = "default_master_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    #[serde(default = "default_notify_workers")]
    pub notify_workers: usize,
    #[serde(default = "default_notify_queue")]
    pub notify_queue: usize,
    #[serde(default = "default_true")]
    pub resync_on_start: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen: default_master_listen(),
            upload_dir: default_master_upload_dir(),
            dispatch_timeout_secs: default_timeout_secs(),
            notify_workers: default_notify_workers(),
            notify_queue: default_notify_queue(),
            resync_on_start: true,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct NodeConfig {
    /// Id under which the master knows this node.
    pub id: i64,
    #[serde(default = "default_node_listen")]
    pub listen: String,
    /// `host:port` of the master.
    pub master_address: String,
    #[serde(default = "default_node_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_retries")]
    pub retries: usize,
    #[serde(default = "default_timeout_secs")]
    pub callback_timeout_secs: u64,
    #[serde(default = "default_output_limit")]
    pub output_limit: usize,
    #[serde(default = "default_true")]
    pub sync_on_start: bool,
    /// Script extension (without the dot) to interpreter program.
    #[serde(default = "default_interpreters")]
    pub interpreters: HashMap<String, String>,
}

impl NodeConfig {
    pub fn new(id: i64, master_address: impl Into<String>) -> Self {
        Self {
            id,
            listen: default_node_listen(),
            master_address: master_address.into(),
            upload_dir: default_node_upload_dir(),
            retries: default_retries(),
            callback_timeout_secs: default_timeout_secs(),
            output_limit: default_output_limit(),
            sync_on_start: true,
            interpreters: default_interpreters(),
        }
    }
}

/// Defaults for `cronfleet-client`; flags override both fields.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct ClientConfig {
    pub master_address: Option<String>,
    pub user_id: Option<i64>,
}

impl Config {
    pub fn from_file(file: &str) -> anyhow::Result<Config> {
        let config = fs::read_to_string(file)
            .with_context(|| format!("reading configuration file {}", file))?;
        Self::from_toml(&config).with_context(|| format!("parsing configuration file {}", file))
    }

    /// Like [`Config::from_file`], but a file that does not exist yields `None`.
    /// Unreadable or malformed files are still errors.
    pub fn from_file_if_exists(file: &str) -> anyhow::Result<Option<Config>> {
        if !std::path::Path::new(file).exists() {
            return Ok(None);
        }
        Self::from_file(file).map(Some)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Config> {
        Ok(toml::from_str(content)?)
    }

    /// Path from `--config`, then `CRONFLEET_CONFIG`, then `app.toml`.
    pub fn resolve_path(flag: Option<&str>) -> String {
        match flag {
            Some(path) => path.to_string(),
            None => std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into()),
        }
    }
}

fn default_database_name() -> String {
    "cronfleet".into()
}

fn default_master_listen() -> String {
    "0.0.0.0:8080".into()
}

fn default_node_listen() -> String {
    "0.0.0.0:9090".into()
}

fn default_master_upload_dir() -> PathBuf {
    PathBuf::from("data/master/uploads")
}

fn default_node_upload_dir() -> PathBuf {
    PathBuf::from("data/node/uploads")
}

fn default_timeout_secs() -> u64 {
    3
}

fn default_notify_workers() -> usize {
    5
}

fn default_notify_queue() -> usize {
    1024
}

fn default_retries() -> usize {
    1
}

fn default_output_limit() -> usize {
    10 * 1024
}

fn default_true() -> bool {
    true
}

fn default_interpreters() -> HashMap<String, String> {
    HashMap::from([("py".to_string(), "python3".to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_section_defaults() {
        let config = Config::from_toml(
            r#"
            [node]
            id = 3
            master_address = "10.0.0.1:8080"
            "#,
        )
        .unwrap();
        let node = config.node.unwrap();
        assert_eq!(node.id, 3);
        assert_eq!(node.retries, 1);
        assert_eq!(node.output_limit, 10240);
        assert_eq!(node.callback_timeout_secs, 3);
        assert_eq!(node.interpreters.get("py").map(String::as_str), Some("python3"));
        assert!(config.master.is_none());
        assert!(config.database.is_none());
    }

    #[test]
    fn master_and_database_sections() {
        let config = Config::from_toml(
            r#"
            [database]
            username = "u"
            password = "p"
            cluster_url = "cluster.example.net"

            [master]
            listen = "127.0.0.1:8000"
            notify_workers = 2
            "#,
        )
        .unwrap();
        let master = config.master.unwrap();
        assert_eq!(master.listen, "127.0.0.1:8000");
        assert_eq!(master.notify_workers, 2);
        assert_eq!(master.notify_queue, 1024);
        assert_eq!(master.dispatch_timeout_secs, 3);
        assert_eq!(config.database.unwrap().name, "cronfleet");
    }

    #[test]
    fn interpreters_override() {
        let config = Config::from_toml(
            r#"
            [node]
            id = 1
            master_address = "m:1"
            [node.interpreters]
            sh = "bash"
            "#,
        )
        .unwrap();
        let node = config.node.unwrap();
        assert_eq!(node.interpreters.get("sh").map(String::as_str), Some("bash"));
        assert!(!node.interpreters.contains_key("py"));
    }

    #[test]
    fn client_section() {
        let config = Config::from_toml(
            r#"
            [client]
            master_address = "127.0.0.1:8080"
            user_id = 7
            "#,
        )
        .unwrap();
        let client = config.client.unwrap();
        assert_eq!(client.master_address.as_deref(), Some("127.0.0.1:8080"));
        assert_eq!(client.user_id, Some(7));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::from_file("/definitely/not/here.toml").is_err());
    }

    #[test]
    fn optional_file_tolerates_only_absence() {
        assert!(Config::from_file_if_exists("/definitely/not/here.toml").unwrap().is_none());

        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("app.toml");
        fs::write(&broken, "[client\nuser_id = ").unwrap();
        let err = Config::from_file_if_exists(broken.to_str().unwrap()).unwrap_err();
        assert!(format!("{:#}", err).contains("parsing configuration file"));

        let good = dir.path().join("good.toml");
        fs::write(&good, "[client]\nuser_id = 4\n").unwrap();
        let config = Config::from_file_if_exists(good.to_str().unwrap()).unwrap().unwrap();
        assert_eq!(config.client.unwrap().user_id, Some(4));
    }
}
