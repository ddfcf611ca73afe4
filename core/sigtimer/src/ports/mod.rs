//! Ports & Adapters のポート定義
//!
//! - inbound: なし（ライブラリの入り口は `Timer` そのもの）
//! - outbound: タイマーが OS に依頼するための trait

pub mod outbound;
