//! レジストリ認証
//!
//! 認証情報は base64url でエンコードした JSON として、`X-Registry-Config`
//! （レジストリごとのマップ）と `X-Registry-Auth`（単一レジストリ）ヘッダーで
//! デーモンに渡します。Docker CLI の `config.json` と credential helper から読み込めます。

use crate::config::{ApiVersion, ClientConfig};
use crate::error::{BuildError, BuildResult};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use bollard::auth::DockerCredentials;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// `config.json` で Docker Hub を表すキー
const DOCKER_HUB_INDEX: &str = "https://index.docker.io/v1/";

/// 単一レジストリの認証情報
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfiguration {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub serveraddress: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub identitytoken: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registrytoken: String,
}

impl AuthConfiguration {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        email: impl Into<String>,
        serveraddress: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            email: email.into(),
            serveraddress: serveraddress.into(),
            ..Default::default()
        }
    }

    /// `X-Registry-Auth` ヘッダーの値
    pub fn header_value(&self) -> BuildResult<String> {
        Ok(URL_SAFE.encode(serde_json::to_vec(self)?))
    }
}

impl From<&AuthConfiguration> for DockerCredentials {
    fn from(auth: &AuthConfiguration) -> Self {
        let non_empty = |s: &String| (!s.is_empty()).then(|| s.clone());
        DockerCredentials {
            username: non_empty(&auth.username),
            password: non_empty(&auth.password),
            email: non_empty(&auth.email),
            serveraddress: non_empty(&auth.serveraddress),
            identitytoken: non_empty(&auth.identitytoken),
            registrytoken: non_empty(&auth.registrytoken),
            ..Default::default()
        }
    }
}

/// レジストリホストごとの認証情報
///
/// `{"configs": {...}}` としてシリアライズします。`BTreeMap` なので
/// 同じレジストリの組み合わせなら常に同じエンコード結果になります。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfigurations {
    #[serde(default)]
    pub configs: BTreeMap<String, AuthConfiguration>,
}

impl AuthConfigurations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, registry: impl Into<String>, auth: AuthConfiguration) {
        self.configs.insert(registry.into(), auth);
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// `X-Registry-Config` ヘッダーの値
    ///
    /// API 1.19 以降はマップそのまま、それより前か不明なら `configs` で包みます。
    pub fn registry_config_header(&self, api_version: Option<ApiVersion>) -> BuildResult<String> {
        let json = match api_version {
            Some(v) if v >= ApiVersion::V1_19 => serde_json::to_vec(&self.configs)?,
            _ => serde_json::to_vec(self)?,
        };
        Ok(URL_SAFE.encode(json))
    }

    /// `X-Registry-Config` ヘッダーの値をデコード（どちらの形式でも可）
    pub fn from_registry_config_header(value: &str) -> BuildResult<Self> {
        let json = URL_SAFE
            .decode(value.trim())
            .map_err(|e| BuildError::InvalidConfig(format!("Invalid X-Registry-Config: {}", e)))?;

        let raw: serde_json::Value = serde_json::from_slice(&json)?;
        if raw.get("configs").is_some() {
            Ok(serde_json::from_value(raw)?)
        } else {
            Ok(Self {
                configs: serde_json::from_value(raw)?,
            })
        }
    }

    /// bollard クライアントに渡す形の認証情報
    pub fn to_docker_credentials(&self) -> HashMap<String, DockerCredentials> {
        self.configs
            .iter()
            .map(|(registry, auth)| (registry.clone(), DockerCredentials::from(auth)))
            .collect()
    }
}

/// Docker config.json の構造
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    /// 全レジストリ共通のcredential helper（例: "osxkeychain", "desktop"）
    #[serde(default)]
    creds_store: Option<String>,
    /// レジストリ別のcredential helper
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64エンコードされた "username:password"
    auth: Option<String>,
    email: Option<String>,
    identitytoken: Option<String>,
}

/// credential helperのレスポンス
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

/// Docker CLI の設定からレジストリ認証情報を読み込む
#[derive(Debug)]
pub struct RegistryAuth {
    config_path: PathBuf,
}

impl Default for RegistryAuth {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl RegistryAuth {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            config_path: config.config_json_path(),
        }
    }

    pub fn with_config_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// `auths` セクションに直接書かれた認証情報すべて
    ///
    /// helper が保持する認証情報は列挙しません。
    /// そちらは [`RegistryAuth::get_credentials`] を使ってください。
    pub fn load_all(&self) -> BuildResult<AuthConfigurations> {
        let mut configs = AuthConfigurations::new();
        if !self.config_path.exists() {
            tracing::debug!("Docker config.json not found at {:?}", self.config_path);
            return Ok(configs);
        }

        let config = self.load_docker_config()?;
        for (registry, entry) in &config.auths {
            if let Some(auth) = self.decode_entry(entry, registry)? {
                configs.insert(registry.clone(), auth);
            }
        }
        Ok(configs)
    }

    /// イメージのレジストリに対する認証情報を取得
    ///
    /// # Returns
    /// * `Ok(Some(credentials))` - 認証情報が見つかった場合
    /// * `Ok(None)` - 認証情報が設定されていない場合
    /// * `Err(e)` - config.json の読み込みや解析に失敗した場合
    pub fn get_credentials(&self, image: &str) -> BuildResult<Option<AuthConfiguration>> {
        let registry = self.extract_registry(image);

        if !self.config_path.exists() {
            tracing::debug!("Docker config.json not found at {:?}", self.config_path);
            return Ok(None);
        }

        let config = self.load_docker_config()?;

        if let Some(helper) = config.cred_helpers.get(&registry) {
            tracing::debug!("Trying credential helper {} for {}", helper, registry);
            if let Ok(Some(creds)) = self.get_from_helper(helper, &registry) {
                return Ok(Some(creds));
            }
        }

        let mut keys = vec![registry.as_str()];
        if registry == "docker.io" {
            keys.push(DOCKER_HUB_INDEX);
        }
        for key in keys {
            if let Some(entry) = config.auths.get(key)
                && let Some(creds) = self.decode_entry(entry, &registry)?
            {
                tracing::debug!("Found credentials in auths for {}", registry);
                return Ok(Some(creds));
            }
        }

        if let Some(helper) = &config.creds_store {
            tracing::debug!("Trying credential helper: {}", helper);
            if let Ok(Some(creds)) = self.get_from_helper(helper, &registry) {
                return Ok(Some(creds));
            }
        }

        tracing::debug!("No credentials found for {}", registry);
        Ok(None)
    }

    /// イメージ名からレジストリを抽出
    ///
    /// # Examples
    /// - `ghcr.io/org/app:tag` -> `ghcr.io`
    /// - `myuser/app:tag` -> `docker.io`
    /// - `localhost:5000/app` -> `localhost:5000`
    pub fn extract_registry(&self, image: &str) -> String {
        if let Some((first, _)) = image.split_once('/') {
            // 最初の要素がホスト名（ドットかポートを含む、または localhost）ならレジストリ
            if first.contains('.') || first.contains(':') || first == "localhost" {
                return first.to_string();
            }
        }

        "docker.io".to_string()
    }

    fn load_docker_config(&self) -> BuildResult<DockerConfig> {
        let content =
            std::fs::read_to_string(&self.config_path).map_err(|e| BuildError::AuthFailed {
                registry: self.config_path.display().to_string(),
                message: format!("Failed to read config.json: {}", e),
            })?;

        serde_json::from_str(&content).map_err(|e| BuildError::AuthFailed {
            registry: self.config_path.display().to_string(),
            message: format!("Failed to parse config.json: {}", e),
        })
    }

    fn decode_entry(&self, entry: &AuthEntry, registry: &str) -> BuildResult<Option<AuthConfiguration>> {
        let Some(auth_b64) = &entry.auth else {
            return Ok(None);
        };

        let decoded = STANDARD.decode(auth_b64).map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to decode auth: {}", e),
        })?;

        let auth_str = String::from_utf8(decoded).map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Invalid UTF-8 in auth: {}", e),
        })?;

        let Some((username, password)) = auth_str.split_once(':') else {
            return Ok(None);
        };

        Ok(Some(AuthConfiguration {
            username: username.to_string(),
            password: password.to_string(),
            email: entry.email.clone().unwrap_or_default(),
            serveraddress: registry.to_string(),
            identitytoken: entry.identitytoken.clone().unwrap_or_default(),
            ..Default::default()
        }))
    }

    fn get_from_helper(&self, helper: &str, registry: &str) -> BuildResult<Option<AuthConfiguration>> {
        let helper_cmd = format!("docker-credential-{}", helper);

        let mut child = Command::new(&helper_cmd)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BuildError::AuthFailed {
                registry: registry.to_string(),
                message: format!("Failed to run {}: {}", helper_cmd, e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(registry.as_bytes()).ok();
        }

        let output = child
            .wait_with_output()
            .map_err(|e| BuildError::AuthFailed {
                registry: registry.to_string(),
                message: format!("Credential helper failed: {}", e),
            })?;

        if !output.status.success() {
            tracing::debug!(
                "Credential helper returned error for {}: {}",
                registry,
                String::from_utf8_lossy(&output.stderr)
            );
            return Ok(None);
        }

        let response: CredentialResponse =
            serde_json::from_slice(&output.stdout).map_err(|e| BuildError::AuthFailed {
                registry: registry.to_string(),
                message: format!("Failed to parse credential helper response: {}", e),
            })?;

        // helper は identity token を username "<token>" で返す
        let auth = if response.username == "<token>" {
            AuthConfiguration {
                identitytoken: response.secret,
                serveraddress: registry.to_string(),
                ..Default::default()
            }
        } else {
            AuthConfiguration {
                username: response.username,
                password: response.secret,
                serveraddress: registry.to_string(),
                ..Default::default()
            }
        };
        Ok(Some(auth))
    }
}
