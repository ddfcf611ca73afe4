//! 実際の POSIX タイマーとシグナルを使う統合テスト
