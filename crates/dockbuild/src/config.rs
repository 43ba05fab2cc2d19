//! 環境変数から解決するクライアント設定

use crate::error::{BuildError, BuildResult};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// リクエストのデフォルトタイムアウト（秒）
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Docker Engine API のバージョン（例: `1.41`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    /// `X-Registry-Config` をレジストリのマップそのままで受け取る最初のバージョン
    pub const V1_19: ApiVersion = ApiVersion::new(1, 19);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl FromStr for ApiVersion {
    type Err = BuildError;

    fn from_str(s: &str) -> BuildResult<Self> {
        let invalid = || BuildError::InvalidConfig(format!("Invalid API version: {}", s));

        let trimmed = s.trim().trim_start_matches('v');
        let (major, minor) = trimmed.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// ビルドクライアントの接続・認証設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// デーモンのエンドポイント（`unix://...`、`tcp://...`）。`None` はプラットフォームのデフォルト
    pub host: Option<String>,
    /// 認証情報のエンコードに使う API バージョン。`None` は不明
    pub api_version: Option<ApiVersion>,
    /// Docker CLI の `config.json` があるディレクトリ
    pub docker_config_dir: PathBuf,
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            api_version: None,
            docker_config_dir: default_docker_config_dir(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// 環境変数から設定を解決
    ///
    /// - `DOCKER_HOST`: デーモンのエンドポイント
    /// - `DOCKER_API_VERSION`: API バージョン
    /// - `DOCKER_CONFIG`: `config.json` のディレクトリ（デフォルト `~/.docker`）
    pub fn from_env() -> BuildResult<Self> {
        let host = std::env::var("DOCKER_HOST")
            .ok()
            .filter(|h| !h.trim().is_empty());

        let api_version = match std::env::var("DOCKER_API_VERSION") {
            Ok(v) if !v.trim().is_empty() => Some(v.parse()?),
            _ => None,
        };

        let docker_config_dir = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_docker_config_dir());

        tracing::debug!(
            "Client config: host={:?} api_version={:?} docker_config={}",
            host,
            api_version,
            docker_config_dir.display()
        );

        Ok(Self {
            host,
            api_version,
            docker_config_dir,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        })
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_api_version(mut self, api_version: ApiVersion) -> Self {
        self.api_version = Some(api_version);
        self
    }

    /// Docker CLI の `config.json` のパス
    pub fn config_json_path(&self) -> PathBuf {
        self.docker_config_dir.join("config.json")
    }
}

fn default_docker_config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".docker"))
        .unwrap_or_else(|| PathBuf::from(".docker"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_api_version() {
        assert_eq!("1.41".parse::<ApiVersion>().unwrap(), ApiVersion::new(1, 41));
        assert_eq!("v1.24".parse::<ApiVersion>().unwrap(), ApiVersion::new(1, 24));
        assert!("141".parse::<ApiVersion>().is_err());
        assert!("1.x".parse::<ApiVersion>().is_err());
    }

    #[test]
    fn test_api_version_ordering() {
        assert!(ApiVersion::new(1, 18) < ApiVersion::V1_19);
        assert!(ApiVersion::new(1, 41) > ApiVersion::V1_19);
        assert!(ApiVersion::new(2, 0) > ApiVersion::new(1, 99));
        assert_eq!(ApiVersion::new(1, 41).to_string(), "1.41");
    }

    #[test]
    fn test_from_env() {
        temp_env::with_vars(
            [
                ("DOCKER_HOST", Some("tcp://10.0.0.5:2375")),
                ("DOCKER_API_VERSION", Some("1.43")),
                ("DOCKER_CONFIG", Some("/etc/docker-client")),
            ],
            || {
                let config = ClientConfig::from_env().unwrap();
                assert_eq!(config.host.as_deref(), Some("tcp://10.0.0.5:2375"));
                assert_eq!(config.api_version, Some(ApiVersion::new(1, 43)));
                assert_eq!(
                    config.config_json_path(),
                    PathBuf::from("/etc/docker-client/config.json")
                );
            },
        );
    }

    #[test]
    fn test_from_env_defaults() {
        temp_env::with_vars(
            [
                ("DOCKER_HOST", None::<&str>),
                ("DOCKER_API_VERSION", None),
                ("DOCKER_CONFIG", None),
            ],
            || {
                let config = ClientConfig::from_env().unwrap();
                assert_eq!(config.host, None);
                assert_eq!(config.api_version, None);
                assert!(config.config_json_path().ends_with(".docker/config.json"));
                assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
            },
        );
    }

    #[test]
    fn test_from_env_invalid_api_version() {
        temp_env::with_var("DOCKER_API_VERSION", Some("latest"), || {
            assert!(matches!(
                ClientConfig::from_env(),
                Err(BuildError::InvalidConfig(_))
            ));
        });
    }
}
