//! sigtimer 共通ライブラリ
//!
//! `sigtimer` ライブラリと `sigtimer-probe` ツールで共有される機能を提供します。

/// エラーハンドリング
pub mod error;

/// Ports & Adapters のポート定義
pub mod ports;

/// ポートの標準実装
pub mod adapter;
