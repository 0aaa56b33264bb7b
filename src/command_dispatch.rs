//! Purpose: Hold top-level CLI command dispatch for `relq`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: `jsonl` output is written row by row as the pipeline yields.
//! Invariants: Rows already written stay written when a later row fails.
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, IsTerminal, Write};

use clap::CommandFactory;
use relq::api::{Columns, Error, ErrorKind, Record, Relation, Table};
use serde_json::Value;

use super::{
    Cli, ColorMode, Command, ErrorPolicyCli, InputMode, OutputFormat, QueryArgs, RunOutcome,
};
use crate::ingest::{ErrorPolicy, IngestConfig, IngestMode, RowReader};
use crate::pipeline::{Output, Pipeline};
use crate::render::{TableStyle, colorize_json, render_table};

pub(super) fn dispatch_command(command: Command, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "relq", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Query(args) => {
            run_query(args, color_mode)?;
            Ok(RunOutcome::ok())
        }
    }
}

fn run_query(args: QueryArgs, color_mode: ColorMode) -> Result<(), Error> {
    let pipeline = Pipeline::parse(&args.steps)?;
    let config = IngestConfig {
        mode: match args.input_mode {
            InputMode::Auto => IngestMode::Auto,
            InputMode::Jsonl => IngestMode::Jsonl,
            InputMode::Json => IngestMode::Json,
        },
        errors: match args.errors {
            ErrorPolicyCli::Stop => ErrorPolicy::Stop,
            ErrorPolicyCli::Skip => ErrorPolicy::Skip,
        },
        max_record_bytes: args.max_record_bytes,
        max_document_bytes: args.max_document_bytes,
        ..IngestConfig::default()
    };
    let reader = open_input(args.input.as_deref())?;
    let relation = Relation::from_results(RowReader::new(reader, config));

    match pipeline.run(relation)? {
        Output::Rows(rows) => match args.format {
            OutputFormat::Jsonl => emit_jsonl(rows),
            OutputFormat::Json => {
                let rows = rows.collect::<Result<Vec<Record>, Error>>()?;
                let rows = rows.into_iter().map(Value::Object).collect();
                emit_pretty(&Value::Array(rows), color_mode)
            }
            OutputFormat::Table => {
                let columns = Columns::parse(args.columns.as_deref().unwrap_or(""));
                let table = rows.table(&columns)?;
                emit_table(&table, &table_style(&args))
            }
        },
        Output::Document(value) => match (args.format, value) {
            (OutputFormat::Table, Value::Object(record)) => {
                let columns = Columns::parse(args.columns.as_deref().unwrap_or(""));
                let table = Table::from_records([Ok::<Record, Error>(record)], &columns)?;
                emit_table(&table, &table_style(&args))
            }
            (OutputFormat::Jsonl, value) => write_stdout(|out| {
                serde_json::to_writer(&mut *out, &value).map_err(io::Error::from)?;
                writeln!(out)
            }),
            (_, value) => emit_pretty(&value, color_mode),
        },
    }
}

fn open_input(path: Option<&std::path::Path>) -> Result<Box<dyn BufRead>, Error> {
    match path {
        None => Ok(Box::new(io::stdin().lock())),
        Some(path) if path.as_os_str() == "-" => Ok(Box::new(io::stdin().lock())),
        Some(path) => {
            let file = File::open(path).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message(format!("failed to open {}", path.display()))
                    .with_source(err)
            })?;
            tracing::debug!(path = %path.display(), "reading input file");
            Ok(Box::new(BufReader::new(file)))
        }
    }
}

fn table_style(args: &QueryArgs) -> TableStyle {
    TableStyle {
        column_width: args.column_width,
        separator: args.separator.clone(),
        max_width: args.width,
    }
}

fn emit_jsonl(rows: Relation<'_>) -> Result<(), Error> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for row in rows {
        let row = row?;
        let written = serde_json::to_writer(&mut out, &row)
            .map_err(io::Error::from)
            .and_then(|()| writeln!(out));
        if let Err(err) = written {
            return stdout_result(Err(err));
        }
    }
    stdout_result(out.flush())
}

fn emit_pretty(value: &Value, color_mode: ColorMode) -> Result<(), Error> {
    let use_color = color_mode.use_color(io::stdout().is_terminal());
    let text = colorize_json(value, use_color);
    write_stdout(|out| writeln!(out, "{text}"))
}

fn emit_table(table: &Table, style: &TableStyle) -> Result<(), Error> {
    let text = render_table(table, style);
    if text.is_empty() {
        return Ok(());
    }
    write_stdout(|out| writeln!(out, "{text}"))
}

fn write_stdout<F>(f: F) -> Result<(), Error>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let stdout = io::stdout();
    let mut out = stdout.lock();
    stdout_result(f(&mut out).and_then(|()| out.flush()))
}

/// A closed downstream pipe ends output quietly.
fn stdout_result(result: io::Result<()>) -> Result<(), Error> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(Error::new(ErrorKind::Io)
            .with_message("failed to write output")
            .with_source(err)),
    }
}
