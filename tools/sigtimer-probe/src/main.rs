mod cli;
mod probe;

use cli::{parse_args, plan, print_completion, timer_options, Config, ParseOutcome};
use common::adapter::{FileJsonLog, StderrLog};
use common::error::Error;
use common::ports::outbound::{Log, LogLevel, LogRecord};
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

// コールバックからユーザーデータ経由で加算される
static TICKS: AtomicU64 = AtomicU64::new(0);

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(e) => {
            if e.is_usage() {
                print_usage();
            }
            eprintln!("sigtimer-probe: {}", e);
            e.exit_code()
        }
    };
    process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let config = match parse_args()? {
        ParseOutcome::Config(c) => c,
        ParseOutcome::GenerateCompletion(shell) => {
            print_completion(shell);
            return Ok(0);
        }
    };
    if config.help {
        print_help();
        return Ok(0);
    }

    let timer_config = timer_options(&config)?
        .validate()
        .map_err(|e| Error::invalid_argument(e.to_string()))?;
    let log = build_log(&config);

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
        // Ctrl+C で止められないだけなので続行する
        let _ = log.log(
            &LogRecord::new(LogLevel::Warn, format!("failed to install Ctrl+C handler: {}", e))
                .layer("cli")
                .kind("warning"),
        );
    }

    let result = probe::run(timer_config, plan(&config), &TICKS, &interrupted, Arc::clone(&log));
    if let Err(ref e) = result {
        let _ = log.log(
            &LogRecord::new(LogLevel::Error, e.to_string())
                .layer("cli")
                .kind("error"),
        );
    }
    let summary = result?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(0)
}

fn build_log(config: &Config) -> Arc<dyn Log> {
    match &config.log_path {
        Some(path) => Arc::new(FileJsonLog::new(path)),
        None if config.verbose => Arc::new(StderrLog::new(LogLevel::Debug)),
        None => Arc::new(StderrLog::new(LogLevel::Warn)),
    }
}

fn print_usage() {
    eprintln!("Usage: sigtimer-probe [options] (-s <secs> | -n <nanos> | -c <config.json>)");
}

fn print_help() {
    println!("Usage: sigtimer-probe [options] (-s <secs> | -n <nanos> | -c <config.json>)");
    println!("Options:");
    println!("  -h, --help               Show this help message");
    println!("  -v, --verbose            Emit timer lifecycle logs to stderr");
    println!("  -c, --config <path>      Read timer options from JSON (flags override it)");
    println!("  -s, --seconds <secs>     Period, whole seconds");
    println!("  -n, --nanos <nanos>      Period, additional nanoseconds");
    println!("  -1, --single-shot        Fire once instead of repeating");
    println!("      --signal <signo>     Notification signal (default: SIGRTMAX)");
    println!("      --clock <clock>      monotonic (default) or realtime");
    println!("  -r, --run-ms <ms>        Stop after this many milliseconds (default: 1000 unless --ticks)");
    println!("  -t, --ticks <count>      Stop after this many callback invocations");
    println!("      --suspend-ms <ms>    After the first expiry, suspend for <ms> and resume");
    println!("      --reset              After the first expiry, reset the countdown once");
    println!("      --log <path>         Append JSONL logs to <path> instead of stderr");
    println!("      --generate <shell>   Generate shell completion script (bash, zsh, fish)");
    println!();
    println!("Config file (JSON):");
    println!("  {{\"period_seconds\": 0, \"period_nanoseconds\": 5000000, \"single_shot\": false,");
    println!("   \"signal_number\": 40, \"clock\": \"monotonic\"}}");
    println!();
    println!("Output:");
    println!("  A JSON summary on stdout: final state, expirations, callback count, anomalies.");
    println!("  Exit codes: 0 ok, 64 invalid argument, 70 timer/system failure, 74 I/O error.");
    println!();
    println!("Examples:");
    println!("  sigtimer-probe -n 10000000 -t 5");
    println!("  sigtimer-probe -s 1 -1 --signal 40 -v");
    println!("  sigtimer-probe -c timer.json --suspend-ms 200 --log probe.jsonl");
}
