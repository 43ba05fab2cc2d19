//! dockbuild のビルドコンテキスト作成
//!
//! コンテキストディレクトリを決まった順序で走査し、`.dockerignore` で
//! 絞り込んだ結果を Docker Engine の `/build` 用 tar アーカイブとして書き出します。

pub mod context;
pub mod error;
pub mod ignore;
pub mod walker;

pub use context::{ContextBuilder, ContextCompression, DEFAULT_DOCKERFILE};
pub use error::{ContextError, Result};
pub use ignore::{IGNORE_FILE, IgnoreRules};
pub use walker::{ContextEntry, ContextWalker, EntryKind};
