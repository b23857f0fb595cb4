use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::fs;

use super::{KeyValueStore, StateError, StateResult};

/// Flat YAML document of `key: value` pairs on local disk.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> StateResult<BTreeMap<String, serde_yaml::Value>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(source) => {
                return Err(StateError::Io {
                    source,
                    path: self.path.clone(),
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_yaml::from_str(&content)?)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> StateResult<Option<String>> {
        let document = self.read_document().await?;
        match document.get(key) {
            None | Some(serde_yaml::Value::Null) => Ok(None),
            Some(serde_yaml::Value::String(value)) => Ok(Some(value.clone())),
            Some(serde_yaml::Value::Number(value)) => Ok(Some(value.to_string())),
            Some(other) => Err(StateError::Malformed(format!(
                "value for {key} must be a string or number, found {other:?}"
            ))),
        }
    }

    async fn put(&self, key: &str, value: &str) -> StateResult<()> {
        let mut document = self.read_document().await?;
        document.insert(key.to_string(), serde_yaml::Value::String(value.to_string()));
        let rendered = serde_yaml::to_string(&document)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|source| StateError::Io {
                        source,
                        path: parent.to_path_buf(),
                    })?;
            }
        }
        let staging = self.path.with_extension("yaml.tmp");
        fs::write(&staging, rendered)
            .await
            .map_err(|source| StateError::Io {
                source,
                path: staging.clone(),
            })?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(|source| StateError::Io {
                source,
                path: self.path.clone(),
            })
    }
}

/// Remote key-value namespace addressed as `<base>/<key>`, read with `GET`
/// and written with `PUT`.
#[derive(Debug, Clone)]
pub struct HttpStore {
    base: String,
    token: Option<String>,
    client: Client,
}

impl HttpStore {
    pub fn new(base: impl Into<String>, token: Option<String>) -> StateResult<Self> {
        let client = Client::builder()
            .user_agent("feedcast-state/1.0")
            .build()?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/{}", self.base, key)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl KeyValueStore for HttpStore {
    async fn get(&self, key: &str) -> StateResult<Option<String>> {
        let response = self
            .authorize(self.client.get(self.key_url(key)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(response.text().await?))
    }

    async fn put(&self, key: &str, value: &str) -> StateResult<()> {
        self.authorize(self.client.put(self.key_url(key)))
            .body(value.to_string())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = values
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self {
            values: Mutex::new(values),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StateResult<Option<String>> {
        let guard = self.values.lock().map_err(|_| StateError::Poisoned)?;
        Ok(guard.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> StateResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.values.lock().map_err(|_| StateError::Poisoned)?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
