//! `POST /build` リクエストの組み立て

use crate::auth::{AuthConfiguration, AuthConfigurations};
use crate::config::ApiVersion;
use crate::error::BuildResult;
use crate::options::{BuildOptions, BuildSource};
use bytes::Bytes;
use dockbuild_context::{ContextBuilder, DEFAULT_DOCKERFILE};
use std::collections::BTreeMap;
use std::io::Read;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_TYPE_TAR: &str = "application/x-tar";
pub const REGISTRY_CONFIG_HEADER: &str = "X-Registry-Config";
pub const REGISTRY_AUTH_HEADER: &str = "X-Registry-Auth";

/// ビルドエンドポイントのクエリパラメータ
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildQuery {
    pub t: String,
    pub dockerfile: String,
    pub remote: Option<String>,
    pub q: bool,
    pub nocache: bool,
    pub rm: bool,
    pub forcerm: bool,
    pub pull: bool,
    pub cachefrom: Vec<String>,
    pub buildargs: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub target: Option<String>,
    pub platform: Option<String>,
    pub networkmode: Option<String>,
    pub extrahosts: Option<String>,
    pub memory: Option<u64>,
    pub memswap: Option<i64>,
    pub shmsize: Option<u64>,
    pub cpushares: Option<u64>,
    pub cpuquota: Option<u64>,
    pub cpuperiod: Option<u64>,
    pub cpusetcpus: Option<String>,
}

impl BuildQuery {
    fn from_options(options: &BuildOptions, dockerfile: String) -> Self {
        Self {
            t: options.name.clone(),
            dockerfile,
            remote: match &options.source {
                BuildSource::Remote(url) => Some(url.clone()),
                _ => None,
            },
            q: options.suppress_output,
            nocache: options.no_cache,
            rm: options.rm_tmp_container,
            forcerm: options.force_rm_tmp_container,
            pull: options.pull,
            cachefrom: options.cache_from.clone(),
            buildargs: options.build_args.clone(),
            labels: options.labels.clone(),
            target: options.target.clone(),
            platform: options.platform.clone(),
            networkmode: options.network_mode.clone(),
            extrahosts: options.extra_hosts.clone(),
            memory: options.memory,
            memswap: options.memswap,
            shmsize: options.shm_size,
            cpushares: options.cpu_shares,
            cpuquota: options.cpu_quota,
            cpuperiod: options.cpu_period,
            cpusetcpus: options.cpuset_cpus.clone(),
        }
    }

    /// 固定順のクエリ文字列ペア
    ///
    /// 未設定の値は省略し、`cachefrom`・`buildargs`・`labels` は JSON でエンコードします。
    pub fn to_pairs(&self) -> BuildResult<Vec<(&'static str, String)>> {
        let mut pairs = Vec::new();

        let mut push_str = |key: &'static str, value: Option<&str>| {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                pairs.push((key, v.to_string()));
            }
        };
        push_str("t", Some(self.t.as_str()));
        push_str("dockerfile", Some(self.dockerfile.as_str()));
        push_str("remote", self.remote.as_deref());
        push_str("target", self.target.as_deref());
        push_str("platform", self.platform.as_deref());
        push_str("networkmode", self.networkmode.as_deref());
        push_str("extrahosts", self.extrahosts.as_deref());
        push_str("cpusetcpus", self.cpusetcpus.as_deref());

        for (key, set) in [
            ("q", self.q),
            ("nocache", self.nocache),
            ("forcerm", self.forcerm),
            ("pull", self.pull),
        ] {
            if set {
                pairs.push((key, "1".to_string()));
            }
        }
        // デーモン側の rm のデフォルトは true なので常に送る
        pairs.push(("rm", if self.rm { "1" } else { "0" }.to_string()));

        for (key, value) in [
            ("memory", self.memory),
            ("shmsize", self.shmsize),
            ("cpushares", self.cpushares),
            ("cpuquota", self.cpuquota),
            ("cpuperiod", self.cpuperiod),
        ] {
            if let Some(v) = value {
                pairs.push((key, v.to_string()));
            }
        }
        if let Some(v) = self.memswap {
            pairs.push(("memswap", v.to_string()));
        }

        if !self.cachefrom.is_empty() {
            pairs.push(("cachefrom", serde_json::to_string(&self.cachefrom)?));
        }
        if !self.buildargs.is_empty() {
            pairs.push(("buildargs", serde_json::to_string(&self.buildargs)?));
        }
        if !self.labels.is_empty() {
            pairs.push(("labels", serde_json::to_string(&self.labels)?));
        }

        Ok(pairs)
    }
}

/// トランスポートに渡す、組み立て済みのビルドリクエスト
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub query: BuildQuery,
    pub headers: BTreeMap<String, String>,
    /// 自前でエンコードするトランスポート向けの、レジストリごとの認証情報
    /// （`X-Registry-Config` ヘッダーと同じ内容）
    pub auth_configs: Option<AuthConfigurations>,
    pub auth: Option<AuthConfiguration>,
    /// ビルドコンテキストの tar。リモートコンテキストでは `None`
    pub body: Option<Bytes>,
}

impl BuildRequest {
    /// ビルドオプションからリクエストを組み立てる
    ///
    /// 先にヘッダーを作り、次にコンテキストを tar にまとめる（入力ストリームなら
    /// 最後まで読む）。ここで失敗した場合、トランスポートには何も送りません。
    ///
    /// ファイルシステムを読むブロッキング処理です。
    pub fn assemble(options: &mut BuildOptions, api_version: Option<ApiVersion>) -> BuildResult<Self> {
        let mut headers = BTreeMap::new();
        if let Some(auth) = &options.auth {
            headers.insert(REGISTRY_AUTH_HEADER.to_string(), auth.header_value()?);
        }
        if let Some(configs) = options.auth_configs.as_ref().filter(|c| !c.is_empty()) {
            headers.insert(
                REGISTRY_CONFIG_HEADER.to_string(),
                configs.registry_config_header(api_version)?,
            );
        }

        let (body, dockerfile) = match &mut options.source {
            BuildSource::Stream(stream) => {
                let mut data = Vec::new();
                stream.read_to_end(&mut data)?;
                tracing::debug!("Read {} bytes of build context from input stream", data.len());
                (Some(data), options.dockerfile.clone().unwrap_or_default())
            }
            BuildSource::ContextDir(dir) => {
                let context = ContextBuilder::new(dir.clone())
                    .dockerfile(options.dockerfile.as_deref().unwrap_or(DEFAULT_DOCKERFILE))
                    .compression(options.compression);
                let dockerfile = context.dockerfile_name()?;
                (Some(context.create_context()?), dockerfile)
            }
            BuildSource::Remote(_) => (None, options.dockerfile.clone().unwrap_or_default()),
        };

        if body.is_some() {
            headers.insert(CONTENT_TYPE.to_string(), CONTENT_TYPE_TAR.to_string());
        }

        Ok(Self {
            query: BuildQuery::from_options(options, dockerfile),
            headers,
            auth_configs: options.auth_configs.clone(),
            auth: options.auth.clone(),
            body: body.map(Bytes::from),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
