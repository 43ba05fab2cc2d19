//! イメージビルドのオプション

use crate::auth::{AuthConfiguration, AuthConfigurations};
use crate::error::{BuildError, BuildResult};
use crate::progress::BuildProgress;
use dockbuild_context::ContextCompression;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

/// ビルドコンテキストの供給元
pub enum BuildSource {
    /// 呼び出し側が用意した tar アーカイブ
    Stream(Box<dyn Read + Send>),
    /// tar にまとめるローカルディレクトリ
    ContextDir(PathBuf),
    /// デーモンが取得する URL（Git リポジトリ、tarball、Dockerfile）
    Remote(String),
}

impl fmt::Debug for BuildSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildSource::Stream(_) => f.write_str("Stream(..)"),
            BuildSource::ContextDir(dir) => f.debug_tuple("ContextDir").field(dir).finish(),
            BuildSource::Remote(url) => f.debug_tuple("Remote").field(url).finish(),
        }
    }
}

/// 1回のイメージビルドのオプション
///
/// [`BuildOptions::builder`] で作成します。コンテキストの指定が衝突する場合は
/// 何も読み込む前にエラーになります。
pub struct BuildOptions {
    /// イメージ名とタグ（クエリの `t`）
    pub name: String,
    /// Dockerfile のパス。コンテキストディレクトリでは省略時 `Dockerfile`
    pub dockerfile: Option<String>,
    pub source: BuildSource,
    /// ビルド出力の書き込み先
    pub output: Box<dyn Write + Send>,
    pub no_cache: bool,
    pub suppress_output: bool,
    pub rm_tmp_container: bool,
    pub force_rm_tmp_container: bool,
    pub pull: bool,
    /// レスポンスを整形せず、1メッセージ1行の JSON で書き出す
    pub raw_json_stream: bool,
    pub cache_from: Vec<String>,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub target: Option<String>,
    pub platform: Option<String>,
    pub network_mode: Option<String>,
    pub extra_hosts: Option<String>,
    pub memory: Option<u64>,
    pub memswap: Option<i64>,
    pub shm_size: Option<u64>,
    pub cpu_shares: Option<u64>,
    pub cpu_quota: Option<u64>,
    pub cpu_period: Option<u64>,
    pub cpuset_cpus: Option<String>,
    pub auth: Option<AuthConfiguration>,
    pub auth_configs: Option<AuthConfigurations>,
    pub compression: ContextCompression,
    /// デーモンからの出力がこの時間途切れたら中断
    pub inactivity_timeout: Option<Duration>,
    /// このビルドだけのスピナー
    pub progress: Option<BuildProgress>,
}

impl BuildOptions {
    pub fn builder(name: impl Into<String>) -> BuildOptionsBuilder {
        BuildOptionsBuilder::new(name)
    }
}

impl fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOptions")
            .field("name", &self.name)
            .field("dockerfile", &self.dockerfile)
            .field("source", &self.source)
            .field("no_cache", &self.no_cache)
            .field("suppress_output", &self.suppress_output)
            .field("rm_tmp_container", &self.rm_tmp_container)
            .field("force_rm_tmp_container", &self.force_rm_tmp_container)
            .field("pull", &self.pull)
            .field("cache_from", &self.cache_from)
            .field("build_args", &self.build_args)
            .field("target", &self.target)
            .field("platform", &self.platform)
            .field(
                "auth_configs",
                &self
                    .auth_configs
                    .as_ref()
                    .map(|a| a.configs.keys().collect::<Vec<_>>()),
            )
            .finish_non_exhaustive()
    }
}

/// [`BuildOptions`] のビルダー
pub struct BuildOptionsBuilder {
    name: String,
    dockerfile: Option<String>,
    input_stream: Option<Box<dyn Read + Send>>,
    context_dir: Option<PathBuf>,
    remote: Option<String>,
    output: Option<Box<dyn Write + Send>>,
    no_cache: bool,
    suppress_output: bool,
    rm_tmp_container: bool,
    force_rm_tmp_container: bool,
    pull: bool,
    raw_json_stream: bool,
    cache_from: Vec<String>,
    build_args: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    target: Option<String>,
    platform: Option<String>,
    network_mode: Option<String>,
    extra_hosts: Option<String>,
    memory: Option<u64>,
    memswap: Option<i64>,
    shm_size: Option<u64>,
    cpu_shares: Option<u64>,
    cpu_quota: Option<u64>,
    cpu_period: Option<u64>,
    cpuset_cpus: Option<String>,
    auth: Option<AuthConfiguration>,
    auth_configs: Option<AuthConfigurations>,
    compression: ContextCompression,
    inactivity_timeout: Option<Duration>,
    progress: Option<BuildProgress>,
}

impl BuildOptionsBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dockerfile: None,
            input_stream: None,
            context_dir: None,
            remote: None,
            output: None,
            no_cache: false,
            suppress_output: false,
            rm_tmp_container: true,
            force_rm_tmp_container: false,
            pull: false,
            raw_json_stream: false,
            cache_from: Vec::new(),
            build_args: BTreeMap::new(),
            labels: BTreeMap::new(),
            target: None,
            platform: None,
            network_mode: None,
            extra_hosts: None,
            memory: None,
            memswap: None,
            shm_size: None,
            cpu_shares: None,
            cpu_quota: None,
            cpu_period: None,
            cpuset_cpus: None,
            auth: None,
            auth_configs: None,
            compression: ContextCompression::None,
            inactivity_timeout: None,
            progress: None,
        }
    }

    pub fn dockerfile(mut self, dockerfile: impl Into<String>) -> Self {
        self.dockerfile = Some(dockerfile.into());
        self
    }

    /// 用意済みの tar アーカイブをコンテキストにする
    pub fn input_stream(mut self, stream: impl Read + Send + 'static) -> Self {
        self.input_stream = Some(Box::new(stream));
        self
    }

    /// ローカルディレクトリをコンテキストにする
    pub fn context_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context_dir = Some(dir.into());
        self
    }

    /// デーモンに URL からコンテキストを取得させる
    pub fn remote(mut self, url: impl Into<String>) -> Self {
        self.remote = Some(url.into());
        self
    }

    pub fn output(mut self, output: impl Write + Send + 'static) -> Self {
        self.output = Some(Box::new(output));
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn suppress_output(mut self, suppress_output: bool) -> Self {
        self.suppress_output = suppress_output;
        self
    }

    pub fn rm_tmp_container(mut self, rm: bool) -> Self {
        self.rm_tmp_container = rm;
        self
    }

    pub fn force_rm_tmp_container(mut self, force_rm: bool) -> Self {
        self.force_rm_tmp_container = force_rm;
        self
    }

    pub fn pull(mut self, pull: bool) -> Self {
        self.pull = pull;
        self
    }

    pub fn raw_json_stream(mut self, raw: bool) -> Self {
        self.raw_json_stream = raw;
        self
    }

    pub fn cache_from<I, S>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_from = images.into_iter().map(Into::into).collect();
        self
    }

    pub fn build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.insert(key.into(), value.into());
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = Some(mode.into());
        self
    }

    pub fn extra_hosts(mut self, hosts: impl Into<String>) -> Self {
        self.extra_hosts = Some(hosts.into());
        self
    }

    pub fn memory(mut self, bytes: u64) -> Self {
        self.memory = Some(bytes);
        self
    }

    pub fn memswap(mut self, bytes: i64) -> Self {
        self.memswap = Some(bytes);
        self
    }

    pub fn shm_size(mut self, bytes: u64) -> Self {
        self.shm_size = Some(bytes);
        self
    }

    pub fn cpu_shares(mut self, shares: u64) -> Self {
        self.cpu_shares = Some(shares);
        self
    }

    pub fn cpu_quota(mut self, quota: u64) -> Self {
        self.cpu_quota = Some(quota);
        self
    }

    pub fn cpu_period(mut self, period: u64) -> Self {
        self.cpu_period = Some(period);
        self
    }

    pub fn cpuset_cpus(mut self, cpus: impl Into<String>) -> Self {
        self.cpuset_cpus = Some(cpus.into());
        self
    }

    /// `X-Registry-Auth` で送る認証情報
    pub fn auth(mut self, auth: AuthConfiguration) -> Self {
        self.auth = Some(auth);
        self
    }

    /// `X-Registry-Config` で送るレジストリごとの認証情報
    pub fn auth_configs(mut self, configs: AuthConfigurations) -> Self {
        self.auth_configs = Some(configs);
        self
    }

    pub fn compression(mut self, compression: ContextCompression) -> Self {
        self.compression = compression;
        self
    }

    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    /// ビルドの進捗を表示するスピナー。ビルドごとに新しいものを渡す
    pub fn progress(mut self, progress: BuildProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// 検証してオプションを作成
    ///
    /// ここではファイルシステムも入力ストリームも読みません。
    pub fn build(self) -> BuildResult<BuildOptions> {
        let output = self.output.ok_or(BuildError::MissingOutputStream)?;

        let source = match (self.input_stream, self.context_dir, self.remote) {
            (Some(stream), None, None) => BuildSource::Stream(stream),
            (None, Some(dir), None) => BuildSource::ContextDir(dir),
            (None, None, Some(url)) => BuildSource::Remote(url),
            (None, None, None) => return Err(BuildError::MissingContext),
            _ => return Err(BuildError::MultipleContexts),
        };

        let name = match (&source, self.name.is_empty()) {
            (BuildSource::Remote(url), true) => url.clone(),
            _ => self.name,
        };

        Ok(BuildOptions {
            name,
            dockerfile: self.dockerfile,
            source,
            output,
            no_cache: self.no_cache,
            suppress_output: self.suppress_output,
            rm_tmp_container: self.rm_tmp_container,
            force_rm_tmp_container: self.force_rm_tmp_container,
            pull: self.pull,
            raw_json_stream: self.raw_json_stream,
            cache_from: self.cache_from,
            build_args: self.build_args,
            labels: self.labels,
            target: self.target,
            platform: self.platform,
            network_mode: self.network_mode,
            extra_hosts: self.extra_hosts,
            memory: self.memory,
            memswap: self.memswap,
            shm_size: self.shm_size,
            cpu_shares: self.cpu_shares,
            cpu_quota: self.cpu_quota,
            cpu_period: self.cpu_period,
            cpuset_cpus: self.cpuset_cpus,
            auth: self.auth,
            auth_configs: self.auth_configs,
            compression: self.compression,
            inactivity_timeout: self.inactivity_timeout,
            progress: self.progress,
        })
    }
}
