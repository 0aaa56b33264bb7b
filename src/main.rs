//! Purpose: `relq` CLI entry point: parse args, run a query pipeline, emit results.
//! Role: Binary crate root; parses args, installs logging, maps errors to exit codes.
//! Invariants: Result rows go to stdout; diagnostics and logs go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use relq::api::{Error, ErrorKind, to_exit_code};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod ingest;
mod pipeline;
mod render;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint(clap_error_hint(&err)),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command, color_mode)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_env("RELQ_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "relq",
    version,
    about = "Lazy relational queries over streams of JSON records",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Rows are JSON objects, read as JSON lines or as one JSON array.

Mental model:
  - each `--step` transforms the row stream, in order
  - row-wise steps stay lazy; `sort` and `group` read everything first
  - a terminal step (`count`, `mapping`, ...) may only come last
"#,
    after_help = r#"EXAMPLES
  $ relq query orders.jsonl --step 'filter .total > 100' --step 'project id total'
  $ relq query days.json --step 'group-sorted day' --step 'extend n=len(group)' --format table
  $ cat events.jsonl | relq query --step 'count-by kind'

LEARN MORE
  $ relq <command> --help
  Logging: set RELQ_LOG (for example RELQ_LOG=debug)"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics and pretty JSON output: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum InputMode {
    Auto,
    Jsonl,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ErrorPolicyCli {
    Stop,
    Skip,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Jsonl,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Run a pipeline of steps over JSON records",
        long_about = r#"Read JSON records from a file (or stdin) and run them through steps.

Row steps:
  project F...            keep only these fields (missing ones become null)
  rename NEW=OLD...       rename fields
  filter EXPR             keep rows where the jq expression EXPR yields true
  take-while EXPR         stop at the first row that does not match
  drop-while EXPR         skip rows until the first one that does not match
  extend N=FUNC(F,...)... add computed fields; FUNC is len|sum|min|max|concat
  take N / skip N         slice the stream
  sort F...               stable sort by field values
  group F...              sort, then group equal keys into {F..., "group": [...]}
  group-sorted F...       group input that is already sorted; fails on out-of-order keys

Terminal steps (last only):
  count | count-by F... | mapping F... | max F... | min F... | reduce-sum F

EXPR is a jq expression over the row that must yield booleans, e.g. `.total > 100`.
A missing field reads as null; a runtime error (such as indexing a number) is no match.
`extend` splits its arguments on spaces outside parentheses: `c=concat(t, a)` is one field."#,
        after_help = r#"EXAMPLES
  $ relq query rows.jsonl --step 'filter .status == "error"' --step 'rename user=login' --step 'sort user'
  $ relq query rows.jsonl --step 'mapping id' --format json
  $ relq query rows.jsonl --errors skip --format table --columns 'id name'"#
    )]
    Query(QueryArgs),
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ relq completion bash > ~/.local/share/bash-completion/completions/relq
  $ relq completion zsh > ~/.zfunc/_relq
  $ relq completion fish > ~/.config/fish/completions/relq.fish"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Args)]
struct QueryArgs {
    #[arg(help = "Input file (default: stdin; `-` also means stdin)", value_hint = ValueHint::FilePath)]
    input: Option<PathBuf>,
    #[arg(long = "in", default_value = "auto", value_enum, help = "Input format")]
    input_mode: InputMode,
    #[arg(long, default_value = "stop", value_enum, help = "On a bad input row: stop or skip")]
    errors: ErrorPolicyCli,
    #[arg(long = "step", value_name = "STEP", help = "Pipeline step (repeatable, applied in order)")]
    steps: Vec<String>,
    #[arg(long, default_value = "jsonl", value_enum, help = "Output format")]
    format: OutputFormat,
    #[arg(long, help = "Space-delimited table columns (default: all fields, sorted)")]
    columns: Option<String>,
    #[arg(long, default_value_t = 120, help = "Maximum table width before switching to vertical layout")]
    width: usize,
    #[arg(long, default_value_t = 12, help = "Width of each table column")]
    column_width: usize,
    #[arg(long, default_value = " | ", help = "Table column separator")]
    separator: String,
    #[arg(long, default_value_t = 1024 * 1024, help = "Maximum bytes per record (a JSON line or an array element)")]
    max_record_bytes: usize,
    #[arg(long, default_value_t = 64 * 1024 * 1024, help = "Maximum bytes for a whole JSON document input")]
    max_document_bytes: usize,
}

fn add_io_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Io || err.hint().is_some() {
        return err;
    }
    err.with_hint("Check that the input path exists and is readable.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint("Re-run with RELQ_LOG=debug and report the output.")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }
    let json = serde_json::to_string(&error_envelope(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    row: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
}

fn error_envelope(err: &Error) -> ErrorEnvelope {
    ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: error_message(err),
            hint: err.hint().map(str::to_string),
            field: err.field().map(str::to_string),
            row: err.row(),
            line: err.line(),
            causes: error_causes(err),
        },
    }
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::Io => "i/o error",
        ErrorKind::Parse => "invalid input",
        ErrorKind::MissingField => "missing field",
        ErrorKind::SortednessViolation => "input is not sorted",
        ErrorKind::DuplicateKey => "duplicate key",
        ErrorKind::EmptySequence => "empty input",
    }
    .to_string()
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn error_text(err: &Error, use_color: bool) -> String {
    let label = |text: &str| colorize_label(text, use_color, AnsiColor::Yellow);
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    )];
    if let Some(hint) = err.hint() {
        lines.push(format!("{} {hint}", label("hint:")));
    }
    if let Some(field) = err.field() {
        lines.push(format!("{} {field}", label("field:")));
    }
    if let Some(row) = err.row() {
        lines.push(format!("{} {row}", label("row:")));
    }
    if let Some(line) = err.line() {
        lines.push(format!("{} {line}", label("line:")));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("{} {cause}", label("caused by:")));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let command = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .and_then(|usage| {
            let mut tokens = usage.split_whitespace().skip_while(|t| *t != "relq").skip(1);
            tokens.next().filter(|t| !t.starts_with(['-', '<', '[']))
        });
    match command {
        Some(command) => format!("Try `relq {command} --help`."),
        None => "Try `relq --help`.".to_string(),
    }
}
