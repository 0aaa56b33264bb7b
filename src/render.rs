//! Purpose: Turn query results into terminal text: pretty JSON and fixed-width tables.
//! Exports: `colorize_json`, `TableStyle`, `render_table`.
//! Role: Pure formatters used by the CLI emission paths; no I/O happens here.
//! Invariants: When color is disabled, `colorize_json` output equals `serde_json::to_string_pretty`.
//! Invariants: Horizontal tables give every column exactly `column_width` characters.
//! Invariants: Tables wider than `max_width` switch to vertical blocks with untruncated values.
use relq::api::Table;
use serde_json::{Map, Value};

const INDENT: &str = "  ";

// 8/16-color palette only; bright variants lose contrast on some themes.
const COLOR_KEY: &str = "36";
const COLOR_STRING: &str = "32";
const COLOR_NUMBER: &str = "33";
const COLOR_BOOL: &str = "35";
const COLOR_NULL: &str = "39";
const COLOR_PUNCT: &str = "39";

pub fn colorize_json(value: &Value, use_color: bool) -> String {
    let mut out = String::new();
    write_value(value, 0, use_color, &mut out);
    out
}

fn write_value(value: &Value, indent: usize, use_color: bool, out: &mut String) {
    match value {
        Value::Null => push_colored("null", COLOR_NULL, use_color, out),
        Value::Bool(val) => {
            let text = if *val { "true" } else { "false" };
            push_colored(text, COLOR_BOOL, use_color, out);
        }
        Value::Number(num) => push_colored(&num.to_string(), COLOR_NUMBER, use_color, out),
        Value::String(text) => push_colored(&encode_str(text), COLOR_STRING, use_color, out),
        Value::Array(items) => {
            write_seq(items.iter().map(|item| (None, item)), items.len(), "[]", indent, use_color, out)
        }
        Value::Object(map) => write_object(map, indent, use_color, out),
    }
}

fn write_object(map: &Map<String, Value>, indent: usize, use_color: bool, out: &mut String) {
    let entries = map.iter().map(|(key, value)| (Some(key.as_str()), value));
    write_seq(entries, map.len(), "{}", indent, use_color, out);
}

/// Shared body for arrays and objects; `brackets` holds the open and close characters.
fn write_seq<'v>(
    entries: impl Iterator<Item = (Option<&'v str>, &'v Value)>,
    len: usize,
    brackets: &str,
    indent: usize,
    use_color: bool,
    out: &mut String,
) {
    let (open, close) = brackets.split_at(1);
    if len == 0 {
        push_colored(brackets, COLOR_PUNCT, use_color, out);
        return;
    }
    push_colored(open, COLOR_PUNCT, use_color, out);
    out.push('\n');
    for (idx, (key, value)) in entries.enumerate() {
        push_indent(indent + 1, out);
        if let Some(key) = key {
            push_colored(&encode_str(key), COLOR_KEY, use_color, out);
            push_colored(":", COLOR_PUNCT, use_color, out);
            out.push(' ');
        }
        write_value(value, indent + 1, use_color, out);
        if idx + 1 < len {
            push_colored(",", COLOR_PUNCT, use_color, out);
        }
        out.push('\n');
    }
    push_indent(indent, out);
    push_colored(close, COLOR_PUNCT, use_color, out);
}

fn encode_str(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

fn push_indent(level: usize, out: &mut String) {
    for _ in 0..level {
        out.push_str(INDENT);
    }
}

fn push_colored(text: &str, color: &str, use_color: bool, out: &mut String) {
    if !use_color {
        out.push_str(text);
        return;
    }
    out.push_str("\u{1b}[");
    out.push_str(color);
    out.push('m');
    out.push_str(text);
    out.push_str("\u{1b}[0m");
}

#[derive(Clone, Debug)]
pub struct TableStyle {
    pub column_width: usize,
    pub separator: String,
    pub max_width: usize,
}

impl Default for TableStyle {
    fn default() -> Self {
        Self {
            column_width: 12,
            separator: " | ".to_string(),
            max_width: 120,
        }
    }
}

impl TableStyle {
    fn total_width(&self, columns: usize) -> usize {
        if columns == 0 {
            return 0;
        }
        columns * self.column_width + (columns - 1) * self.separator.chars().count()
    }
}

/// Renders a table, choosing vertical layout when columns would not fit in `max_width`.
pub fn render_table(table: &Table, style: &TableStyle) -> String {
    if table.keys.is_empty() {
        return String::new();
    }
    if style.total_width(table.keys.len()) > style.max_width {
        return render_vertical(table, style);
    }
    let width = style.column_width;
    let mut lines = Vec::with_capacity(table.rows.len() + 2);
    lines.push(join_cells(table.keys.iter().map(|k| fit(k, width)), style));
    lines.push(join_cells(table.keys.iter().map(|_| "-".repeat(width)), style));
    for row in &table.rows {
        lines.push(join_cells(row.iter().map(|v| fit(&cell_text(v), width)), style));
    }
    lines.join("\n")
}

fn render_vertical(table: &Table, style: &TableStyle) -> String {
    let label_width = table
        .keys
        .iter()
        .map(|k| k.chars().count())
        .max()
        .unwrap_or(0);
    let blocks: Vec<String> = table
        .rows
        .iter()
        .map(|row| {
            table
                .keys
                .iter()
                .zip(row)
                .map(|(key, value)| {
                    format!("{}{}{}", pad(key, label_width), style.separator, cell_text(value))
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect();
    blocks.join("\n\n")
}

fn join_cells(cells: impl Iterator<Item = String>, style: &TableStyle) -> String {
    cells.collect::<Vec<_>>().join(&style.separator)
}

/// Strings print raw; everything else prints as compact JSON.
fn cell_text(value: &Value) -> String {
    let text = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    text.replace('\n', "\\n").replace('\r', "\\r")
}

fn fit(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len <= width {
        return pad(text, width);
    }
    if width == 0 {
        return String::new();
    }
    let mut cut: String = text.chars().take(width - 1).collect();
    cut.push('~');
    cut
}

fn pad(text: &str, width: usize) -> String {
    let len = text.chars().count();
    let mut out = text.to_string();
    if width > len {
        out.push_str(&" ".repeat(width - len));
    }
    out
}
