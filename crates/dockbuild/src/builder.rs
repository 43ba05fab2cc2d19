use crate::config::{ApiVersion, ClientConfig};
use crate::error::{BuildError, BuildResult};
use crate::options::BuildOptions;
use crate::progress::BuildProgress;
use crate::request::BuildRequest;
use crate::transport::{BuildTransport, DockerTransport};
use bollard::models::BuildInfo;
use futures_util::stream::StreamExt;
use std::io::Write;

/// イメージビルドのクライアント
///
/// トランスポートを所有し、プロセス全体の状態は持ちません。
pub struct ImageBuilder<T = DockerTransport> {
    transport: T,
    api_version: Option<ApiVersion>,
}

impl ImageBuilder<DockerTransport> {
    /// `config` のデーモンに接続
    pub fn connect(config: &ClientConfig) -> BuildResult<Self> {
        let transport = DockerTransport::connect(config)?;
        let api_version = transport.api_version();
        Ok(Self::new(transport).with_api_version(api_version))
    }
}

impl<T: BuildTransport> ImageBuilder<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            api_version: None,
        }
    }

    /// デーモンの API バージョン（`X-Registry-Config` の形式を決める）
    pub fn with_api_version(mut self, api_version: ApiVersion) -> Self {
        self.api_version = Some(api_version);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// イメージをビルド
    ///
    /// コンテキストはリクエスト送信前にすべて作成します。
    /// レスポンスは届いた順に `options.output` へ書き出します。
    pub async fn build_image(&self, options: BuildOptions) -> BuildResult<()> {
        let name = options.name.clone();
        let progress = options.progress.clone();
        tracing::info!("Building image: {}", name);
        tracing::debug!("Build options: {:?}", options);

        let result = self.run(options).await;

        if let Some(progress) = &progress {
            match &result {
                Ok(()) => progress.finish_success(),
                Err(e) => progress.finish_error(&e.to_string()),
            }
        }
        if result.is_ok() {
            tracing::info!("Successfully built: {}", name);
        }
        result
    }

    async fn run(&self, options: BuildOptions) -> BuildResult<()> {
        // コンテキストの走査と圧縮はブロッキング I/O
        let api_version = self.api_version;
        let (mut options, request) = tokio::task::spawn_blocking(move || {
            let mut options = options;
            let request = BuildRequest::assemble(&mut options, api_version);
            (options, request)
        })
        .await?;
        let request = request?;

        tracing::debug!(
            "Sending build request: {} byte context, headers {:?}",
            request.body.as_ref().map_or(0, |b| b.len()),
            request.headers.keys().collect::<Vec<_>>()
        );

        let mut stream = self.transport.build(request);

        // ビルド進捗の表示
        loop {
            let next = match options.inactivity_timeout {
                Some(limit) => tokio::time::timeout(limit, stream.next())
                    .await
                    .map_err(|_| BuildError::InactivityTimeout(limit))?,
                None => stream.next().await,
            };
            let Some(msg) = next else {
                break;
            };

            handle_build_output(
                &mut options.output,
                options.raw_json_stream,
                options.progress.as_ref(),
                msg?,
            )?;
        }

        options.output.flush()?;
        Ok(())
    }
}

/// ビルド出力の処理
fn handle_build_output(
    out: &mut dyn Write,
    raw_json: bool,
    progress: Option<&BuildProgress>,
    output: BuildInfo,
) -> BuildResult<()> {
    if raw_json {
        serde_json::to_writer(&mut *out, &output)?;
        writeln!(out)?;
    }

    if let Some(stream) = &output.stream {
        if !raw_json {
            write!(out, "{}", stream)?;
        }
        if let Some(progress) = progress
            && stream.starts_with("Step ")
        {
            progress.set_message(stream.trim_end());
        }
    }

    // エラーメッセージの処理
    if let Some(error) = output.error {
        return Err(BuildError::BuildFailed(error));
    }

    if let Some(error_detail) = output.error_detail {
        let error_msg = error_detail
            .message
            .unwrap_or_else(|| "Unknown build error".to_string());
        return Err(BuildError::BuildFailed(error_msg));
    }

    // ステータスメッセージ（pullの進捗など）
    if let Some(status) = output.status
        && !raw_json
    {
        match output.progress {
            Some(p) if !p.is_empty() => writeln!(out, "{} {}", status, p)?,
            _ => writeln!(out, "{}", status)?,
        }
    }

    Ok(())
}
