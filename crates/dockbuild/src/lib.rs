//! dockbuild: Docker Engine のイメージビルドクライアント
//!
//! ビルドオプションを `POST /build` リクエストに変換します。
//! コンテキストを `dockbuild-context` で tar にまとめ、レジストリ認証を
//! `X-Registry-Config` / `X-Registry-Auth` ヘッダーに載せ、[`BuildTransport`] 経由で
//! 送信して、ストリームで返るビルド出力を中継します。

pub mod auth;
pub mod builder;
pub mod config;
pub mod error;
pub mod options;
pub mod progress;
pub mod request;
pub mod transport;

pub use auth::{AuthConfiguration, AuthConfigurations, RegistryAuth};
pub use builder::ImageBuilder;
pub use config::{ApiVersion, ClientConfig};
pub use error::{BuildError, BuildResult};
pub use options::{BuildOptions, BuildOptionsBuilder, BuildSource};
pub use progress::BuildProgress;
pub use request::{BuildQuery, BuildRequest};
pub use transport::{BuildStream, BuildTransport, DockerTransport};

pub use dockbuild_context::{ContextBuilder, ContextCompression, ContextError};
