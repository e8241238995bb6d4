use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use glad_error::{GladError, Result};
use glad_record::{OverflowPolicy, RewriteOptions, inspect_backup, rewrite_session_ids};
use glad_telemetry::DecoderRegistry;
use glad_wait::{
    WaitCondition, WaitConfig, WaitEngine, WaitOptions, WaitOutcome, source_from_config,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "GLAD_LOG";
const DEFAULT_LOG_FILTER: &str = "info";

/// Exit code for malformed command lines.
const USAGE_EXIT_CODE: u8 = 2;

#[derive(Debug)]
enum Command {
    Rewrite {
        input: PathBuf,
        delta: i64,
        options: RewriteOptions,
    },
    Inspect {
        path: PathBuf,
        json: bool,
    },
    Wait(WaitArgs),
    Help,
}

#[derive(Debug, Default)]
struct WaitArgs {
    config: PathBuf,
    condition: PathBuf,
    timeout_secs: Option<u64>,
    lookback_secs: Option<u64>,
}

fn print_help(out: &mut dyn Write) -> io::Result<()> {
    let help = "\
glad - Global LAD backup and telemetry wait tool

USAGE:
    glad rewrite <INPUT> <DELTA> [--output <PATH>] [--in-place] [--reject-overflow]
    glad inspect <FILE> [--json]
    glad wait --config <FILE> --condition <FILE> [--timeout <SECS>] [--lookback <SECS>]

COMMANDS:
    rewrite     Add DELTA (may be negative) to every record's session id
    inspect     Summarize a backup log: record count, bytes, sessions
    wait        Poll telemetry until a JSON condition holds

ENVIRONMENT:
    GLAD_LOG    Log filter (default: info); logs go to stderr
";
    writeln!(out, "{help}")
}

fn take_value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> std::result::Result<&'a str, String> {
    *index += 1;
    args.get(*index)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_secs(raw: &str, flag: &str) -> std::result::Result<u64, String> {
    raw.parse::<u64>()
        .map_err(|_| format!("invalid {flag} value: {raw}"))
}

fn parse_args(args: &[String]) -> std::result::Result<Command, String> {
    let Some((subcommand, rest)) = args.split_first() else {
        return Err("missing command (expected rewrite, inspect or wait)".to_owned());
    };
    if rest.iter().any(|arg| arg == "-h" || arg == "--help") {
        return Ok(Command::Help);
    }
    match subcommand.as_str() {
        "rewrite" => parse_rewrite(rest),
        "inspect" => parse_inspect(rest),
        "wait" => parse_wait(rest),
        "help" | "-h" | "--help" => Ok(Command::Help),
        unknown => Err(format!("unknown command: {unknown}")),
    }
}

fn parse_rewrite(args: &[String]) -> std::result::Result<Command, String> {
    let mut options = RewriteOptions::default();
    let mut positional = Vec::new();

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--output" => {
                options.output = Some(PathBuf::from(take_value(args, &mut index, "--output")?));
            }
            "--in-place" => options.in_place = true,
            "--reject-overflow" => options.overflow = OverflowPolicy::Reject,
            flag if flag.starts_with("--") => return Err(format!("unknown option: {flag}")),
            value => positional.push(value),
        }
        index += 1;
    }

    let [input, delta] = positional.as_slice() else {
        return Err(format!(
            "rewrite takes <INPUT> <DELTA>, got {} positional arguments",
            positional.len()
        ));
    };
    let delta = delta
        .parse::<i64>()
        .map_err(|_| format!("invalid delta: {delta}"))?;
    Ok(Command::Rewrite {
        input: PathBuf::from(*input),
        delta,
        options,
    })
}

fn parse_inspect(args: &[String]) -> std::result::Result<Command, String> {
    let mut path = None;
    let mut json = false;
    for arg in args {
        match arg.as_str() {
            "--json" => json = true,
            flag if flag.starts_with("--") => return Err(format!("unknown option: {flag}")),
            value if path.is_none() => path = Some(PathBuf::from(value)),
            value => return Err(format!("unexpected argument: {value}")),
        }
    }
    let path = path.ok_or_else(|| "inspect requires <FILE>".to_owned())?;
    Ok(Command::Inspect { path, json })
}

fn parse_wait(args: &[String]) -> std::result::Result<Command, String> {
    let mut config = None;
    let mut condition = None;
    let mut wait = WaitArgs::default();

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--config" => config = Some(PathBuf::from(take_value(args, &mut index, "--config")?)),
            "--condition" => {
                condition = Some(PathBuf::from(take_value(args, &mut index, "--condition")?));
            }
            "--timeout" => {
                wait.timeout_secs = Some(parse_secs(take_value(args, &mut index, "--timeout")?, "--timeout")?);
            }
            "--lookback" => {
                wait.lookback_secs =
                    Some(parse_secs(take_value(args, &mut index, "--lookback")?, "--lookback")?);
            }
            unknown => return Err(format!("unknown option: {unknown}")),
        }
        index += 1;
    }

    wait.config = config.ok_or_else(|| "wait requires --config <FILE>".to_owned())?;
    wait.condition = condition.ok_or_else(|| "wait requires --condition <FILE>".to_owned())?;
    Ok(Command::Wait(wait))
}

fn run_command(command: Command, out: &mut dyn Write, err: &mut dyn Write) -> Result<()> {
    match command {
        Command::Help => print_help(out)?,
        Command::Rewrite {
            input,
            delta,
            options,
        } => {
            let report = rewrite_session_ids(&input, delta, &options)?;
            writeln!(
                out,
                "{}: {} records, {} bytes",
                report.output_path.display(),
                report.records,
                report.bytes
            )?;
            if report.wrapped > 0 {
                writeln!(err, "warning: {} session ids wrapped around", report.wrapped)?;
            }
        }
        Command::Inspect { path, json } => {
            let summary = inspect_backup(&path)?;
            if json {
                let text = serde_json::to_string_pretty(&summary)
                    .map_err(|error| GladError::internal(format!("summary serialization failed: {error}")))?;
                writeln!(out, "{text}")?;
            } else {
                writeln!(out, "records:        {}", summary.records)?;
                writeln!(out, "bytes:          {}", summary.bytes)?;
                writeln!(out, "largest record: {}", summary.largest_record)?;
                writeln!(out, "sessions:")?;
                for (session_id, records) in &summary.sessions {
                    writeln!(out, "  {session_id}: {records} records")?;
                }
            }
        }
        Command::Wait(args) => run_wait(&args, out, err)?,
    }
    Ok(())
}

fn run_wait(args: &WaitArgs, out: &mut dyn Write, err: &mut dyn Write) -> Result<()> {
    let mut config = WaitConfig::load(&args.config)?;
    if let Some(timeout) = args.timeout_secs {
        config.timeout_secs = timeout;
    }
    if let Some(lookback) = args.lookback_secs {
        config.lookback_secs = lookback;
    }

    let condition_text = fs::read_to_string(&args.condition).map_err(|error| {
        if error.kind() == io::ErrorKind::NotFound {
            GladError::configuration(format!(
                "condition file '{}' does not exist",
                args.condition.display()
            ))
        } else {
            GladError::Io(error)
        }
    })?;
    let condition = WaitCondition::from_json(&condition_text)?;

    let registry = DecoderRegistry::with_defaults();
    config.validate(&registry)?;
    let source = source_from_config(&config.source)?;
    let engine = WaitEngine::from_config(source, &config, registry)?;
    let options = WaitOptions::new(config.timeout(), config.lookback());

    match engine.wait(&condition, &options)? {
        WaitOutcome::Matched(result) => {
            writeln!(
                out,
                "condition satisfied after {} attempts in {} ms",
                result.attempts,
                result.elapsed.as_millis()
            )?;
            for leaf in &result.matches {
                let line = serde_json::to_string(leaf)
                    .map_err(|error| GladError::internal(format!("match serialization failed: {error}")))?;
                writeln!(out, "{line}")?;
            }
            Ok(())
        }
        WaitOutcome::TimedOut(report) => {
            if !report.unseen_channels.is_empty() {
                writeln!(
                    err,
                    "no response contained: {}",
                    report.unseen_channels.join(", ")
                )?;
            }
            if let Some(last) = &report.last_error {
                writeln!(err, "last query error: {last}")?;
            }
            Err(report.to_error())
        }
    }
}

fn run(args: &[String], out: &mut dyn Write, err: &mut dyn Write) -> u8 {
    let command = match parse_args(args) {
        Ok(command) => command,
        Err(message) => {
            let _ = writeln!(err, "error: {message}");
            let _ = writeln!(err, "run 'glad --help' for usage");
            return USAGE_EXIT_CODE;
        }
    };
    debug!(?command, "dispatching");

    match run_command(command, out, err) {
        Ok(()) => 0,
        Err(error) => {
            let _ = writeln!(err, "error: {error}");
            if let Some(hint) = error.suggestion() {
                let _ = writeln!(err, "hint: {hint}");
            }
            u8::try_from(error.exit_code()).unwrap_or(1)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let args: Vec<String> = env::args().skip(1).collect();
    let code = run(&args, &mut io::stdout().lock(), &mut io::stderr().lock());
    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use glad_record::{FIXED_FIELD_BYTES, LadRecord, RecordWriter};

    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| (*arg).to_owned()).collect()
    }

    fn run_captured(args: &[&str]) -> (u8, String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = run(&strings(args), &mut out, &mut err);
        (
            code,
            String::from_utf8(out).expect("utf8 stdout"),
            String::from_utf8(err).expect("utf8 stderr"),
        )
    }

    fn write_backup(path: &Path, sessions: &[u32]) {
        let file = fs::File::create(path).expect("create");
        let mut writer = RecordWriter::new(file);
        for session_id in sessions {
            let record = LadRecord::new(*b"SYNC", [0; FIXED_FIELD_BYTES], *session_id, b"pay".to_vec())
                .expect("record");
            writer.write_record(&record).expect("write");
        }
        writer.flush().expect("flush");
    }

    #[test]
    fn parse_rewrite_with_negative_delta() {
        let command = parse_args(&strings(&["rewrite", "in.lad", "-5", "--reject-overflow"])).expect("parse");
        match command {
            Command::Rewrite {
                input,
                delta,
                options,
            } => {
                assert_eq!(input, PathBuf::from("in.lad"));
                assert_eq!(delta, -5);
                assert_eq!(options.overflow, OverflowPolicy::Reject);
                assert!(!options.in_place);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_errors() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&strings(&["rewrite", "in.lad"])).is_err());
        assert!(parse_args(&strings(&["rewrite", "in.lad", "x"])).is_err());
        assert!(parse_args(&strings(&["rewrite", "in.lad", "1", "--output"])).is_err());
        assert!(parse_args(&strings(&["inspect"])).is_err());
        assert!(parse_args(&strings(&["wait", "--config", "c.json"])).is_err());
        assert!(parse_args(&strings(&["wait", "--config", "c.json", "--condition", "w.json", "--timeout", "soon"])).is_err());
        assert!(parse_args(&strings(&["frobnicate"])).is_err());
    }

    #[test]
    fn parse_wait_overrides() {
        let command = parse_args(&strings(&[
            "wait",
            "--config",
            "c.json",
            "--condition",
            "w.json",
            "--timeout",
            "0",
            "--lookback",
            "120",
        ]))
        .expect("parse");
        let Command::Wait(args) = command else {
            panic!("expected wait");
        };
        assert_eq!(args.timeout_secs, Some(0));
        assert_eq!(args.lookback_secs, Some(120));
    }

    #[test]
    fn help_anywhere() {
        assert!(matches!(parse_args(&strings(&["wait", "--help"])), Ok(Command::Help)));
        let (code, out, _) = run_captured(&["--help"]);
        assert_eq!(code, 0);
        assert!(out.contains("USAGE"));
    }

    #[test]
    fn usage_error_exit_code() {
        let (code, _, err) = run_captured(&["inspect"]);
        assert_eq!(code, USAGE_EXIT_CODE);
        assert!(err.contains("inspect requires <FILE>"), "{err}");
    }

    #[test]
    fn rewrite_then_inspect() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("backup.lad");
        write_backup(&input, &[10, 10, 11]);
        let output = dir.path().join("shifted.lad");

        let (code, out, err) = run_captured(&[
            "rewrite",
            input.to_str().expect("path"),
            "5",
            "--output",
            output.to_str().expect("path"),
        ]);
        assert_eq!(code, 0, "{err}");
        assert!(out.contains("3 records"), "{out}");

        let (code, out, _) = run_captured(&["inspect", output.to_str().expect("path"), "--json"]);
        assert_eq!(code, 0);
        let summary: serde_json::Value = serde_json::from_str(&out).expect("json");
        assert_eq!(summary["records"], 3);
        assert_eq!(summary["sessions"]["15"], 2);
        assert_eq!(summary["sessions"]["16"], 1);
    }

    #[test]
    fn missing_backup_uses_error_exit_code() {
        let (code, _, err) = run_captured(&["inspect", "/nonexistent/backup.lad"]);
        assert_eq!(i32::from(code), GladError::FileNotFound { path: PathBuf::new() }.exit_code());
        assert!(err.contains("hint:"), "{err}");
    }

    fn wait_fixture(dir: &Path, dn: &str) -> (PathBuf, PathBuf) {
        let response = dir.join("channels.xml");
        fs::write(
            &response,
            format!(
                "<ChannelList><Header>Channel Id,Type,Raw,Value</Header><Data>\"A-0001\",\"UNSIGNED_INT\",\"{dn}\",\"{dn}.0\"</Data></ChannelList>"
            ),
        )
        .expect("write response");

        let config = dir.join("wait.json");
        let config_json = serde_json::json!({
            "session_id": 42,
            "poll_interval_ms": 5,
            "source": { "type": "replay", "channel_responses": [response] },
        });
        fs::write(&config, config_json.to_string()).expect("write config");

        let condition = dir.join("condition.json");
        fs::write(
            &condition,
            r#"{"kind":"channel","channel_id":"A-0001","eu":"5"}"#,
        )
        .expect("write condition");
        (config, condition)
    }

    #[test]
    fn wait_matches_replayed_response() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (config, condition) = wait_fixture(dir.path(), "5");
        let (code, out, err) = run_captured(&[
            "wait",
            "--config",
            config.to_str().expect("path"),
            "--condition",
            condition.to_str().expect("path"),
            "--timeout",
            "0",
        ]);
        assert_eq!(code, 0, "{err}");
        assert!(out.contains("after 1 attempts"), "{out}");
        assert!(out.contains("\"channel_id\":\"A-0001\""), "{out}");
    }

    #[test]
    fn wait_timeout_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (config, condition) = wait_fixture(dir.path(), "4");
        let (code, _, err) = run_captured(&[
            "wait",
            "--config",
            config.to_str().expect("path"),
            "--condition",
            condition.to_str().expect("path"),
            "--timeout",
            "0",
        ]);
        let timeout = GladError::Timeout {
            timeout: Duration::ZERO,
            attempts: 1,
        };
        assert_eq!(i32::from(code), timeout.exit_code());
        assert!(err.contains("condition not satisfied within 0 seconds"), "{err}");
    }
}
