//! podforge のコアデータモデル
//!
//! コンテナイメージのビルドを宣言的に記述する。ビルドの元になるプラットフォーム定義、
//! 実行するビルダーを表すタスク、reconcile エンジンがフェーズを進める `Build` を定義する。

pub mod error;
pub mod model;

pub use error::{ModelError, Result};
pub use model::*;
