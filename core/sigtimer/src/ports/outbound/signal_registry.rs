//! シグナル登録 Outbound ポート
//!
//! プロセス全体のシグナル処理（ハンドラの登録・復元）と、シグナル番号ごとの
//! 「現在有効な関連付け」の表を抽象化する。Linux 実装は `adapter::PosixSignalRegistry`。

use crate::bridge::Association;
use std::io;
use std::ptr::NonNull;

/// シグナル登録表の抽象（Outbound ポート）
///
/// install / restore は参照カウント付き。最初の install でシグナルブリッジを登録して
/// 以前の処理を保存し、最後の restore でそれを戻す。
/// bind / unbind はシグナル配送コンテキストから読まれる表を書き換える。
/// 1 つのシグナル番号に有効な関連付けは高々 1 つで、後から bind したものが前のものを黙って押し出す。
pub trait SignalRegistry: Send + Sync {
    fn install(&self, signal: i32) -> io::Result<()>;

    fn restore(&self, signal: i32) -> io::Result<()>;

    fn bind(&self, signal: i32, association: NonNull<Association>);

    /// `association` が現在有効な場合だけ外す
    ///
    /// 戻った時点で、この番号の関連付けを読んだハンドラはすべて抜けている。
    /// 以降 `association` を解放してよい。
    fn unbind(&self, signal: i32, association: NonNull<Association>);
}
