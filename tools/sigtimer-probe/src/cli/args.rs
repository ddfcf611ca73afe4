use clap::builder::ArgAction;
use clap::value_parser;
use clap_complete::Shell;
use common::error::Error;
use sigtimer::{ClockKind, TimerOptions};
use std::path::PathBuf;
use std::time::Duration;

/// 何も指定されなかったときの実行時間
const DEFAULT_RUN_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub help: bool,
    /// -v / --verbose: ライフサイクルを含むデバッグログを stderr に出す
    pub verbose: bool,
    /// --config: TimerOptions の JSON。フラグはこの上に重ねる
    pub config_path: Option<PathBuf>,
    pub seconds: Option<u64>,
    pub nanos: Option<u64>,
    pub single_shot: bool,
    pub signal: Option<i32>,
    pub clock: Option<ClockKind>,
    /// --run-ms: 実行時間の上限
    pub run_ms: Option<u64>,
    /// --ticks: この回数コールバックが呼ばれたら終了
    pub ticks: Option<u64>,
    /// --suspend-ms: 最初の満了後に一時停止しておく時間
    pub suspend_ms: Option<u64>,
    /// --reset: 最初の満了後に 1 回 reset する
    pub reset: bool,
    /// --log: JSONL ログの出力先
    pub log_path: Option<PathBuf>,
}

/// 解析結果: 通常の Config / 補完スクリプト生成
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Config(Config),
    GenerateCompletion(Shell),
}

/// 実行計画（タイマー設定以外の部分）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// None なら Ctrl+C か tick 数まで走り続ける
    pub run_for: Option<Duration>,
    pub ticks: Option<u64>,
    pub suspend_for: Option<Duration>,
    pub reset: bool,
}

pub(crate) fn build_clap_command() -> clap::Command {
    clap::Command::new("sigtimer-probe")
        .about("Run a signal-driven POSIX interval timer and report how it behaved")
        .disable_help_flag(true)
        .arg(
            clap::Arg::new("help")
                .short('h')
                .long("help")
                .help("Show this help message")
                .action(ArgAction::SetTrue),
        )
        .arg(
            clap::Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Emit timer lifecycle logs to stderr")
                .action(ArgAction::SetTrue),
        )
        .arg(
            clap::Arg::new("config")
                .short('c')
                .long("config")
                .value_name("path")
                .help("Read timer options from a JSON file (flags override it)")
                .value_parser(value_parser!(PathBuf))
                .num_args(1),
        )
        .arg(
            clap::Arg::new("seconds")
                .short('s')
                .long("seconds")
                .value_name("secs")
                .help("Period, whole seconds")
                .value_parser(value_parser!(u64))
                .num_args(1),
        )
        .arg(
            clap::Arg::new("nanos")
                .short('n')
                .long("nanos")
                .value_name("nanos")
                .help("Period, additional nanoseconds")
                .value_parser(value_parser!(u64))
                .num_args(1),
        )
        .arg(
            clap::Arg::new("single-shot")
                .short('1')
                .long("single-shot")
                .help("Fire once instead of repeating")
                .action(ArgAction::SetTrue),
        )
        .arg(
            clap::Arg::new("signal")
                .long("signal")
                .value_name("signo")
                .help("Notification signal number (default: SIGRTMAX)")
                .value_parser(value_parser!(i32))
                .num_args(1),
        )
        .arg(
            clap::Arg::new("clock")
                .long("clock")
                .value_name("clock")
                .help("Clock source: monotonic or realtime")
                .num_args(1),
        )
        .arg(
            clap::Arg::new("run-ms")
                .short('r')
                .long("run-ms")
                .value_name("ms")
                .help("Stop after this many milliseconds")
                .value_parser(value_parser!(u64))
                .num_args(1),
        )
        .arg(
            clap::Arg::new("ticks")
                .short('t')
                .long("ticks")
                .value_name("count")
                .help("Stop after this many callback invocations")
                .value_parser(value_parser!(u64))
                .num_args(1),
        )
        .arg(
            clap::Arg::new("suspend-ms")
                .long("suspend-ms")
                .value_name("ms")
                .help("After the first expiry, suspend for this long and resume")
                .value_parser(value_parser!(u64))
                .num_args(1),
        )
        .arg(
            clap::Arg::new("reset")
                .long("reset")
                .help("After the first expiry, reset the countdown once")
                .action(ArgAction::SetTrue),
        )
        .arg(
            clap::Arg::new("log")
                .long("log")
                .value_name("path")
                .help("Append JSONL logs to this file")
                .value_parser(value_parser!(PathBuf))
                .num_args(1),
        )
        .arg(
            clap::Arg::new("generate")
                .long("generate")
                .value_name("shell")
                .help("Generate shell completion script")
                .value_parser(value_parser!(Shell))
                .num_args(1),
        )
}

fn matches_to_config(matches: &clap::ArgMatches) -> Result<Config, Error> {
    let clock = matches
        .get_one::<String>("clock")
        .map(|s| s.parse::<ClockKind>())
        .transpose()
        .map_err(|e| Error::invalid_argument(e.to_string()))?;

    Ok(Config {
        help: matches.get_flag("help"),
        verbose: matches.get_flag("verbose"),
        config_path: matches.get_one::<PathBuf>("config").cloned(),
        seconds: matches.get_one::<u64>("seconds").copied(),
        nanos: matches.get_one::<u64>("nanos").copied(),
        single_shot: matches.get_flag("single-shot"),
        signal: matches.get_one::<i32>("signal").copied(),
        clock,
        run_ms: matches.get_one::<u64>("run-ms").copied(),
        ticks: matches.get_one::<u64>("ticks").copied(),
        suspend_ms: matches.get_one::<u64>("suspend-ms").copied(),
        reset: matches.get_flag("reset"),
        log_path: matches.get_one::<PathBuf>("log").cloned(),
    })
}

/// コマンドラインを解析する。補完生成が要求された場合は ParseOutcome::GenerateCompletion を返す。
pub fn parse_args() -> Result<ParseOutcome, Error> {
    let matches = build_clap_command()
        .try_get_matches()
        .map_err(|e| Error::invalid_argument(e.to_string()))?;

    if let Some(&shell) = matches.get_one::<Shell>("generate") {
        return Ok(ParseOutcome::GenerateCompletion(shell));
    }
    Ok(ParseOutcome::Config(matches_to_config(&matches)?))
}

/// テスト用: 引数スライスから解析する
#[allow(dead_code)]
pub fn parse_args_from(args: &[&str]) -> Result<Config, Error> {
    let matches = build_clap_command()
        .try_get_matches_from(args)
        .map_err(|e| Error::invalid_argument(e.to_string()))?;
    matches_to_config(&matches)
}

/// 補完スクリプトを標準出力に出力する。
pub fn print_completion(shell: Shell) {
    let mut cmd = build_clap_command();
    clap_complete::generate(shell, &mut cmd, "sigtimer-probe", &mut std::io::stdout());
}

/// --config の JSON に、コマンドラインで指定された値を重ねる
pub fn timer_options(config: &Config) -> Result<TimerOptions, Error> {
    let mut options = match &config.config_path {
        Some(path) => TimerOptions::from_file(path)
            .map_err(|e| Error::invalid_argument(e.to_string()))?,
        None => TimerOptions::new(0),
    };
    if config.config_path.is_none() && config.seconds.is_none() && config.nanos.is_none() {
        return Err(Error::invalid_argument(
            "no period given (use --seconds/--nanos or --config)",
        ));
    }
    if let Some(seconds) = config.seconds {
        options.period_seconds = seconds;
    }
    if let Some(nanos) = config.nanos {
        options.period_nanoseconds = nanos;
    }
    if config.single_shot {
        options.single_shot = true;
    }
    if let Some(signal) = config.signal {
        options.signal_number = Some(signal);
    }
    if let Some(clock) = config.clock {
        options.clock = clock;
    }
    Ok(options)
}

/// 実行計画を作る。終了条件が 1 つもなければ既定の実行時間で止める。
pub fn plan(config: &Config) -> Plan {
    let run_for = match (config.run_ms, config.ticks) {
        (Some(ms), _) => Some(Duration::from_millis(ms)),
        (None, Some(_)) => None,
        (None, None) => Some(Duration::from_millis(DEFAULT_RUN_MS)),
    };
    Plan {
        run_for,
        ticks: config.ticks,
        suspend_for: config.suspend_ms.map(Duration::from_millis),
        reset: config.reset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args_no_args() {
        let config = parse_args_from(&["sigtimer-probe"]).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_args_help() {
        assert!(parse_args_from(&["sigtimer-probe", "-h"]).unwrap().help);
        assert!(parse_args_from(&["sigtimer-probe", "--help"]).unwrap().help);
    }

    #[test]
    fn test_parse_args_timer_flags() {
        let config = parse_args_from(&[
            "sigtimer-probe",
            "-s",
            "2",
            "--nanos",
            "500",
            "--single-shot",
            "--signal",
            "40",
            "--clock",
            "realtime",
            "--ticks",
            "3",
            "--suspend-ms",
            "20",
            "--reset",
            "-v",
        ])
        .unwrap();
        assert_eq!(config.seconds, Some(2));
        assert_eq!(config.nanos, Some(500));
        assert!(config.single_shot);
        assert_eq!(config.signal, Some(40));
        assert_eq!(config.clock, Some(ClockKind::Realtime));
        assert_eq!(config.ticks, Some(3));
        assert_eq!(config.suspend_ms, Some(20));
        assert!(config.reset);
        assert!(config.verbose);
    }

    #[test]
    fn test_parse_args_rejects_bad_values() {
        for args in [
            vec!["sigtimer-probe", "--unknown"],
            vec!["sigtimer-probe", "--seconds", "abc"],
            vec!["sigtimer-probe", "--clock", "tai"],
        ] {
            let err = parse_args_from(&args).unwrap_err();
            assert_eq!(err.exit_code(), 64, "args: {:?}", args);
        }
    }

    #[test]
    fn test_timer_options_requires_period() {
        let err = timer_options(&Config::default()).unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_timer_options_from_flags() {
        let config = parse_args_from(&["sigtimer-probe", "-n", "1000000", "-1"]).unwrap();
        let options = timer_options(&config).unwrap();
        assert_eq!(options.period_seconds, 0);
        assert_eq!(options.period_nanoseconds, 1_000_000);
        assert!(options.single_shot);
        assert_eq!(options.signal_number, None);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timer.json");
        std::fs::write(
            &path,
            r#"{"period_seconds": 5, "period_nanoseconds": 7, "signal_number": 40}"#,
        )
        .unwrap();
        let path_arg = path.to_string_lossy().into_owned();
        let config =
            parse_args_from(&["sigtimer-probe", "--config", &path_arg, "-s", "1"]).unwrap();
        let options = timer_options(&config).unwrap();
        assert_eq!(options.period_seconds, 1);
        assert_eq!(options.period_nanoseconds, 7);
        assert_eq!(options.signal_number, Some(40));
    }

    #[test]
    fn test_bad_config_file_is_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timer.json");
        std::fs::write(&path, r#"{"period": 1}"#).unwrap();
        let config = Config {
            config_path: Some(path),
            ..Config::default()
        };
        assert_eq!(timer_options(&config).unwrap_err().exit_code(), 64);
    }

    #[test]
    fn test_plan_defaults() {
        let plan_default = plan(&Config::default());
        assert_eq!(plan_default.run_for, Some(Duration::from_millis(DEFAULT_RUN_MS)));
        assert_eq!(plan_default.ticks, None);

        let ticks_only = plan(&Config {
            ticks: Some(3),
            ..Config::default()
        });
        assert_eq!(ticks_only.run_for, None);
        assert_eq!(ticks_only.ticks, Some(3));
    }
}
