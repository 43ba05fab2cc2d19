//! リクエスト組み立てと Docker Engine の間のトランスポート

use crate::config::{ApiVersion, ClientConfig};
use crate::error::{BuildError, BuildResult};
use crate::request::{BuildQuery, BuildRequest};
use bollard::auth::DockerCredentials;
use bollard::models::BuildInfo;
use bollard::{API_DEFAULT_VERSION, ClientVersion, Docker};
use futures_util::stream::{BoxStream, StreamExt};
use http_body_util::{Either, Full};
use std::collections::HashMap;

/// デコード済みのビルドレスポンスのストリーム
pub type BuildStream<'a> = BoxStream<'a, BuildResult<BuildInfo>>;

/// 組み立て済みのビルドリクエストを送り、レスポンスを返す
pub trait BuildTransport: Send + Sync {
    fn build(&self, request: BuildRequest) -> BuildStream<'_>;
}

#[cfg(unix)]
const DEFAULT_UNIX_SOCKET: &str = "unix:///var/run/docker.sock";

/// bollard クライアントを使うトランスポート
///
/// bollard は `X-Registry-Config` を認証情報のマップからそのまま組み立てる
/// （`configs` で包まない形）。そのため API 1.19 未満は扱わない。
#[derive(Debug, Clone)]
pub struct DockerTransport {
    docker: Docker,
    api_version: ApiVersion,
}

impl DockerTransport {
    /// 既存の bollard クライアントから作成
    pub fn new(docker: Docker) -> BuildResult<Self> {
        let version = docker.client_version();
        let api_version = ApiVersion::new(version.major_version as u32, version.minor_version as u32);
        if api_version < ApiVersion::V1_19 {
            return Err(unsupported_api(api_version));
        }
        Ok(Self {
            docker,
            api_version,
        })
    }

    /// `config.host` のデーモン（未指定ならプラットフォームのデフォルト）に接続
    pub fn connect(config: &ClientConfig) -> BuildResult<Self> {
        let client_version = match config.api_version {
            Some(v) if v < ApiVersion::V1_19 => return Err(unsupported_api(v)),
            Some(v) => ClientVersion {
                major_version: v.major as usize,
                minor_version: v.minor as usize,
            },
            None => API_DEFAULT_VERSION.clone(),
        };

        let docker = match config.host.as_deref() {
            #[cfg(unix)]
            None => Docker::connect_with_unix(DEFAULT_UNIX_SOCKET, config.timeout_secs, &client_version)?,
            #[cfg(not(unix))]
            None => Docker::connect_with_local_defaults()?,
            #[cfg(unix)]
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_unix(host, config.timeout_secs, &client_version)?
            }
            Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
                Docker::connect_with_http(host, config.timeout_secs, &client_version)?
            }
            Some(host) => {
                return Err(BuildError::InvalidConfig(format!(
                    "Unsupported DOCKER_HOST: {}",
                    host
                )));
            }
        };
        tracing::debug!("Connected Docker client ({:?})", config.host);

        Self::new(docker)
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// クライアントが話す API バージョン（`X-Registry-Config` の形式を決める）
    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }
}

fn unsupported_api(version: ApiVersion) -> BuildError {
    BuildError::InvalidConfig(format!(
        "Docker API {} is not supported; 1.19 or later is required",
        version
    ))
}

/// bollard に渡す認証情報
///
/// `X-Registry-Auth` 相当の単一認証は、サーバーアドレスがある場合だけマップに加える。
fn docker_credentials(request: &BuildRequest) -> Option<HashMap<String, DockerCredentials>> {
    let mut credentials: HashMap<_, _> = request
        .auth_configs
        .as_ref()
        .map(|configs| configs.to_docker_credentials())
        .unwrap_or_default();

    if let Some(auth) = &request.auth {
        if auth.serveraddress.is_empty() {
            tracing::debug!("Ignoring registry auth without a server address");
        } else {
            credentials
                .entry(auth.serveraddress.clone())
                .or_insert_with(|| auth.into());
        }
    }

    (!credentials.is_empty()).then_some(credentials)
}

impl BuildTransport for DockerTransport {
    fn build(&self, request: BuildRequest) -> BuildStream<'_> {
        let credentials = docker_credentials(&request);
        let options = bollard_options(&request.query);
        let body = request.body.map(|bytes| Either::Left(Full::new(bytes)));

        self.docker
            .build_image(options, credentials, body)
            .map(|msg| msg.map_err(BuildError::from))
            .boxed()
    }
}

#[allow(deprecated)]
fn bollard_options(query: &BuildQuery) -> bollard::image::BuildImageOptions<String> {
    bollard::image::BuildImageOptions {
        dockerfile: query.dockerfile.clone(),
        t: query.t.clone(),
        extrahosts: query.extrahosts.clone(),
        remote: query.remote.clone().unwrap_or_default(),
        q: query.q,
        nocache: query.nocache,
        cachefrom: query.cachefrom.clone(),
        pull: query.pull,
        rm: query.rm,
        forcerm: query.forcerm,
        memory: query.memory,
        memswap: query.memswap,
        cpushares: query.cpushares,
        cpusetcpus: query.cpusetcpus.clone().unwrap_or_default(),
        cpuperiod: query.cpuperiod,
        cpuquota: query.cpuquota,
        buildargs: query.buildargs.clone().into_iter().collect(),
        shmsize: query.shmsize,
        labels: query.labels.clone().into_iter().collect(),
        networkmode: query.networkmode.clone().unwrap_or_default(),
        platform: query.platform.clone().unwrap_or_default(),
        target: query.target.clone().unwrap_or_default(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfiguration, AuthConfigurations};

    #[test]
    #[allow(deprecated)]
    fn test_bollard_options_mapping() {
        let query = BuildQuery {
            t: "app:1.0".to_string(),
            dockerfile: "docker/Dockerfile".to_string(),
            nocache: true,
            rm: true,
            cachefrom: vec!["app:cache".to_string()],
            target: Some("runtime".to_string()),
            ..Default::default()
        };

        let options = bollard_options(&query);
        assert_eq!(options.t, "app:1.0");
        assert_eq!(options.dockerfile, "docker/Dockerfile");
        assert!(options.nocache);
        assert!(options.rm);
        assert!(!options.forcerm);
        assert_eq!(options.cachefrom, vec!["app:cache".to_string()]);
        assert_eq!(options.target, "runtime");
        assert_eq!(options.remote, "");
    }

    #[test]
    fn test_credentials_merge_single_auth() {
        let mut configs = AuthConfigurations::new();
        configs.insert("quay.io", AuthConfiguration::new("foo", "bar", "baz", "quay.io"));
        let request = BuildRequest {
            auth_configs: Some(configs),
            auth: Some(AuthConfiguration::new("me", "secret", "", "ghcr.io")),
            ..Default::default()
        };

        let credentials = docker_credentials(&request).unwrap();
        assert_eq!(credentials.len(), 2);
        assert_eq!(credentials["quay.io"].username.as_deref(), Some("foo"));
        assert_eq!(credentials["quay.io"].serveraddress.as_deref(), Some("quay.io"));
        assert_eq!(credentials["ghcr.io"].password.as_deref(), Some("secret"));
        assert_eq!(credentials["ghcr.io"].email, None);
    }

    #[test]
    fn test_credentials_keep_registry_config_entry() {
        let mut configs = AuthConfigurations::new();
        configs.insert("quay.io", AuthConfiguration::new("foo", "bar", "baz", "quay.io"));
        let request = BuildRequest {
            auth_configs: Some(configs),
            auth: Some(AuthConfiguration::new("other", "pw", "", "quay.io")),
            ..Default::default()
        };

        let credentials = docker_credentials(&request).unwrap();
        assert_eq!(credentials.len(), 1);
        assert_eq!(credentials["quay.io"].username.as_deref(), Some("foo"));
    }

    #[test]
    fn test_credentials_skip_auth_without_server_address() {
        let request = BuildRequest {
            auth: Some(AuthConfiguration::new("me", "secret", "", "")),
            ..Default::default()
        };
        assert!(docker_credentials(&request).is_none());
        assert!(docker_credentials(&BuildRequest::default()).is_none());
    }

    #[test]
    fn test_connect_rejects_unknown_scheme() {
        let config = ClientConfig::default().with_host("ssh://builder@example.com");
        assert!(matches!(
            DockerTransport::connect(&config),
            Err(BuildError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_connect_rejects_api_before_1_19() {
        let config = ClientConfig::default()
            .with_host("tcp://127.0.0.1:2375")
            .with_api_version(ApiVersion::new(1, 18));
        match DockerTransport::connect(&config) {
            Err(BuildError::InvalidConfig(msg)) => assert!(msg.contains("1.18")),
            other => panic!("unexpected result: {:?}", other.map(|t| t.api_version())),
        }
    }

    #[tokio::test]
    async fn test_connect_pins_requested_api_version() {
        let config = ClientConfig::default()
            .with_host("tcp://127.0.0.1:2375")
            .with_api_version(ApiVersion::new(1, 41));
        let transport = DockerTransport::connect(&config).unwrap();
        assert_eq!(transport.api_version(), ApiVersion::new(1, 41));
    }

    #[tokio::test]
    async fn test_connect_http_is_lazy() {
        let config = ClientConfig::default().with_host("tcp://127.0.0.1:2375");
        let transport = DockerTransport::connect(&config).unwrap();
        assert!(transport.api_version() >= ApiVersion::V1_19);
    }
}
