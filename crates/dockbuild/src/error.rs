use dockbuild_context::ContextError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Both an input stream and a build context were provided; only one may be set")]
    MultipleContexts,

    #[error("No output stream was provided for build output")]
    MissingOutputStream,

    #[error("No build context was provided (input stream, context directory or remote URL)")]
    MissingContext,

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("No build output received for {0:?}")]
    InactivityTimeout(Duration),

    #[error("Authentication failed for {registry}: {message}")]
    AuthFailed { registry: String, message: String },

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("Build task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::MultipleContexts => format!(
                "{}\n\
                 \n\
                 入力ストリーム（用意済みの tar）かコンテキストディレクトリのどちらか一方を指定してください。",
                self
            ),
            BuildError::Context(ContextError::ContextNotFound(path)) => format!(
                "ビルドコンテキストが見つかりません: {}\n\
                 \n\
                 コンテキストディレクトリのパスを確認してください。",
                path.display()
            ),
            BuildError::Context(ContextError::InvalidPattern { pattern, .. }) => format!(
                "{}\n\
                 \n\
                 .dockerignore のパターン '{}' を修正するか削除してください。",
                self, pattern
            ),
            BuildError::DockerConnection(e) => format!(
                "Dockerデーモンに接続できません: {}\n\
                 \n\
                 解決方法:\n\
                 1. Dockerが起動しているか確認してください\n\
                 2. DOCKER_HOST の値を確認してください",
                e
            ),
            BuildError::BuildFailed(msg) => format!(
                "ビルドに失敗しました: {}\n\
                 \n\
                 Dockerfileの内容を確認してください。",
                msg
            ),
            _ => format!("{}", self),
        }
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
