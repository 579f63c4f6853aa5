//! モデル定義
//!
//! プラットフォーム定義、タスク、ビルドをそれぞれのモジュールで定義する。

mod build;
mod platform;
mod task;

// Re-exports
pub use build::*;
pub use platform::*;
pub use task::*;
