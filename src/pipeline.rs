//! Purpose: Parse `--step` strings into relation operations and run them over a row stream.
//! Exports: `Pipeline`, `Output`.
//! Role: CLI-facing glue between text steps and the `relq::api::Relation` methods.
//! Invariants: Steps apply in the order given; a terminal step may only appear last.
//! Invariants: Parse failures are usage errors naming the offending step.
//! Invariants: Row conditions are jq expressions compiled at parse time; they must yield booleans.
use std::collections::BTreeMap;

use relq::api::{
    Computed, Error, ErrorKind, InputOrder, Key, Predicate, Record, Relation, Rename, key_of,
};
use serde_json::{Map, Value, json};

/// Built-in functions available to `extend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Len,
    Sum,
    Min,
    Max,
    Concat,
}

impl Builtin {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "len" => Some(Self::Len),
            "sum" => Some(Self::Sum),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "concat" => Some(Self::Concat),
            _ => None,
        }
    }

    fn apply(self, args: &[&Value]) -> Value {
        match self {
            Builtin::Len => match args.first() {
                Some(Value::Array(items)) => json!(items.len()),
                Some(Value::Object(map)) => json!(map.len()),
                Some(Value::String(text)) => json!(text.chars().count()),
                _ => Value::Null,
            },
            Builtin::Sum => args
                .iter()
                .map(|v| Key::from_json(v))
                .filter(|k| k.as_f64().is_some())
                .try_fold(Key::Int(0), |total, k| total.checked_add(&k))
                .map_or(Value::Null, |total| total.to_json()),
            Builtin::Min => args
                .iter()
                .min_by_key(|v| Key::from_json(v))
                .map_or(Value::Null, |v| (*v).clone()),
            Builtin::Max => args
                .iter()
                .rev()
                .max_by_key(|v| Key::from_json(v))
                .map_or(Value::Null, |v| (*v).clone()),
            Builtin::Concat => {
                let mut out = String::new();
                for arg in args {
                    match arg {
                        Value::String(text) => out.push_str(text),
                        other => out.push_str(&other.to_string()),
                    }
                }
                Value::String(out)
            }
        }
    }
}

/// Parses `name=fn(a,b)` into a computed field.
fn parse_extension(text: &str, step: &str) -> Result<Computed<'static>, Error> {
    let (name, call) = text
        .split_once('=')
        .ok_or_else(|| step_error(step, "expected `NAME=FUNC(FIELD,...)`"))?;
    let (func, rest) = call
        .split_once('(')
        .ok_or_else(|| step_error(step, "expected `FUNC(FIELD,...)`"))?;
    let args = rest
        .strip_suffix(')')
        .ok_or_else(|| step_error(step, "missing closing parenthesis"))?;
    let builtin = Builtin::parse(func.trim())
        .ok_or_else(|| step_error(step, "function must be one of len, sum, min, max, concat"))?;
    let inputs: Vec<&str> = args
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .collect();
    if builtin == Builtin::Len && inputs.len() != 1 {
        return Err(step_error(step, "len takes exactly one field"));
    }
    Ok(Computed::new(name.trim(), &inputs, move |args| {
        builtin.apply(args)
    }))
}

#[derive(Debug)]
enum Step {
    Project(Vec<String>),
    Rename(Vec<Rename>),
    Filter(Predicate),
    TakeWhile(Predicate),
    DropWhile(Predicate),
    Extend(Vec<String>),
    Take(usize),
    Skip(usize),
    Sort(Vec<String>),
    Group { names: Vec<String>, order: InputOrder },
}

#[derive(Debug)]
enum Terminal {
    Count,
    CountBy(Vec<String>),
    Mapping(Vec<String>),
    Max(Vec<String>),
    Min(Vec<String>),
    Sum(String),
}

/// What a pipeline produces: a row stream, or a single JSON document.
#[derive(Debug)]
pub enum Output<'a> {
    Rows(Relation<'a>),
    Document(Value),
}

#[derive(Debug, Default)]
pub struct Pipeline {
    steps: Vec<Step>,
    terminal: Option<Terminal>,
}

enum Parsed {
    Step(Step),
    Terminal(Terminal),
}

impl Pipeline {
    pub fn parse(texts: &[String]) -> Result<Self, Error> {
        let mut pipeline = Pipeline::default();
        for text in texts {
            if pipeline.terminal.is_some() {
                return Err(step_error(text, "no step may follow a terminal step"));
            }
            match parse_step(text)? {
                Parsed::Step(step) => pipeline.steps.push(step),
                Parsed::Terminal(terminal) => pipeline.terminal = Some(terminal),
            }
        }
        tracing::debug!(
            steps = pipeline.steps.len(),
            terminal = pipeline.terminal.is_some(),
            "parsed pipeline"
        );
        Ok(pipeline)
    }

    pub fn run<'a>(self, input: Relation<'a>) -> Result<Output<'a>, Error> {
        let mut relation = input;
        for step in self.steps {
            relation = apply_step(relation, step)?;
        }
        match self.terminal {
            None => Ok(Output::Rows(relation)),
            Some(terminal) => run_terminal(relation, terminal),
        }
    }
}

fn parse_step(text: &str) -> Result<Parsed, Error> {
    let trimmed = text.trim();
    let (op, args) = trimmed
        .split_once(char::is_whitespace)
        .map_or((trimmed, ""), |(op, args)| (op, args.trim()));
    let names = || -> Result<Vec<String>, Error> {
        let names: Vec<String> = args.split_whitespace().map(str::to_string).collect();
        if names.is_empty() {
            return Err(step_error(text, "expected at least one field name"));
        }
        Ok(names)
    };
    let step = match op {
        "project" => Step::Project(names()?),
        "rename" => Step::Rename(
            args.split_whitespace()
                .map(|pair| {
                    pair.split_once('=')
                        .map(|(new, old)| Rename::new(old, new))
                        .ok_or_else(|| step_error(text, "expected `NEW=OLD` pairs"))
                })
                .collect::<Result<_, _>>()?,
        ),
        "filter" => Step::Filter(parse_condition(args, text)?),
        "take-while" => Step::TakeWhile(parse_condition(args, text)?),
        "drop-while" => Step::DropWhile(parse_condition(args, text)?),
        "extend" => {
            let extensions = split_top_level(args);
            if extensions.is_empty() {
                return Err(step_error(text, "expected at least one `NAME=FUNC(FIELD,...)`"));
            }
            for extension in &extensions {
                parse_extension(extension, text)?;
            }
            Step::Extend(extensions)
        }
        "take" => Step::Take(parse_count(args, text)?),
        "skip" => Step::Skip(parse_count(args, text)?),
        "sort" => Step::Sort(names()?),
        "group" => Step::Group {
            names: names()?,
            order: InputOrder::Unsorted,
        },
        "group-sorted" => Step::Group {
            names: names()?,
            order: InputOrder::Sorted,
        },
        "count" => return Ok(Parsed::Terminal(Terminal::Count)),
        "count-by" => return Ok(Parsed::Terminal(Terminal::CountBy(names()?))),
        "mapping" => return Ok(Parsed::Terminal(Terminal::Mapping(names()?))),
        "max" => return Ok(Parsed::Terminal(Terminal::Max(names()?))),
        "min" => return Ok(Parsed::Terminal(Terminal::Min(names()?))),
        "reduce-sum" => {
            let mut fields = names()?;
            if fields.len() != 1 {
                return Err(step_error(text, "reduce-sum takes exactly one field"));
            }
            return Ok(Parsed::Terminal(Terminal::Sum(fields.remove(0))));
        }
        _ => return Err(step_error(text, "unknown step")),
    };
    Ok(Parsed::Step(step))
}

fn parse_condition(args: &str, step: &str) -> Result<Predicate, Error> {
    if args.is_empty() {
        return Err(step_error(step, "expected a jq boolean expression"));
    }
    Predicate::compile(args)
}

/// Splits on whitespace outside parentheses, so `c=concat(t, a)` stays one item.
fn split_top_level(args: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in args.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    items.push(std::mem::take(&mut current));
                }
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if !current.is_empty() {
        items.push(current);
    }
    items
}

fn parse_count(args: &str, step: &str) -> Result<usize, Error> {
    args.parse()
        .map_err(|_| step_error(step, "expected a non-negative integer"))
}

fn as_strs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}

fn apply_step<'a>(relation: Relation<'a>, step: Step) -> Result<Relation<'a>, Error> {
    let next = match step {
        Step::Project(names) => relation.project(&names),
        Step::Rename(renames) => relation.rename(renames),
        Step::Filter(cond) => relation.try_filter(move |r| cond.matches(r)),
        Step::TakeWhile(cond) => relation.try_take_while(move |r| cond.matches(r)),
        Step::DropWhile(cond) => relation.try_drop_while(move |r| cond.matches(r)),
        Step::Extend(texts) => {
            let computed = texts
                .iter()
                .map(|s| parse_extension(s, s))
                .collect::<Result<Vec<_>, _>>()?;
            relation.extend(computed)
        }
        Step::Take(n) => relation.take(n),
        Step::Skip(n) => relation.skip(n),
        Step::Sort(names) => relation.sort_by_names(&as_strs(&names))?,
        Step::Group { names, order } => relation.group_by_names(&as_strs(&names), order)?,
    };
    Ok(next)
}

fn run_terminal(relation: Relation<'_>, terminal: Terminal) -> Result<Output<'_>, Error> {
    match terminal {
        Terminal::Count => Ok(Output::Document(json!({ "count": relation.count()? }))),
        Terminal::CountBy(names) => {
            let counts = relation.count_by_names(&as_strs(&names))?;
            let rows: Vec<Record> = counts
                .into_iter()
                .map(|(key, count)| {
                    let mut row = key_fields(&names, &key);
                    row.insert("count".to_string(), json!(count));
                    row
                })
                .collect();
            Ok(Output::Rows(Relation::new(rows)))
        }
        Terminal::Mapping(names) => {
            let mapping = relation.mapping_by_names(&as_strs(&names))?;
            Ok(Output::Document(Value::Object(mapping_object(mapping)?)))
        }
        Terminal::Max(names) => {
            let row = relation.max(key_of(&as_strs(&names)))?;
            Ok(Output::Rows(Relation::new([row])))
        }
        Terminal::Min(names) => {
            let row = relation.min(key_of(&as_strs(&names)))?;
            Ok(Output::Rows(Relation::new([row])))
        }
        Terminal::Sum(field) => {
            let total = relation.project(&[field.as_str()]).reduce(|mut acc, row| {
                let left = Key::from_json(&acc[&field]);
                let right = Key::from_json(&row[&field]);
                let sum = match (left.as_f64(), right.as_f64()) {
                    (Some(_), Some(_)) => left.checked_add(&right).unwrap_or(Key::Null),
                    (Some(_), None) => left,
                    (None, _) => right,
                };
                acc.insert(field.clone(), sum.to_json());
                acc
            })?;
            Ok(Output::Document(Value::Object(total)))
        }
    }
}

/// Spreads a names key back into one field per name.
fn key_fields(names: &[String], key: &Key) -> Record {
    let mut row = Map::new();
    match (names, key) {
        ([name], key) => {
            row.insert(name.clone(), key.to_json());
        }
        (names, Key::Arr(parts)) => {
            for (name, part) in names.iter().zip(parts) {
                row.insert(name.clone(), part.to_json());
            }
        }
        (_, key) => {
            row.insert("key".to_string(), key.to_json());
        }
    }
    row
}

/// Labels string keys by their text and every other key by its JSON form.
///
/// Distinct keys can share a label (`"1"` and `1`); that is a `DuplicateKey`
/// error rather than a silently dropped row.
fn mapping_object(mapping: BTreeMap<Key, Record>) -> Result<Map<String, Value>, Error> {
    let mut object = Map::new();
    for (key, record) in mapping {
        let label = match &key {
            Key::Str(text) => text.clone(),
            other => other.to_string(),
        };
        if object.contains_key(&label) {
            return Err(Error::new(ErrorKind::DuplicateKey)
                .with_message(format!("mapping label `{label}` is shared by distinct keys"))
                .with_hint(format!(
                    "Key {key} prints like another key; map on a field whose values share one JSON type, or use `group`."
                )));
        }
        object.insert(label, Value::Object(record));
    }
    Ok(object)
}

fn step_error(step: &str, message: &str) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message(format!("invalid step `{step}`: {message}"))
        .with_hint("Example: --step 'filter .price > 10' --step 'group-sorted day' --step count")
}

#[cfg(test)]
mod tests {
    use super::{Output, Pipeline};
    use relq::api::{ErrorKind, Record, Relation};
    use serde_json::{Value, json};

    fn rows(values: Vec<Value>) -> Relation<'static> {
        Relation::new(values.into_iter().map(|v| v.as_object().cloned().unwrap()))
    }

    fn steps(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    fn run_rows(texts: &[&str], input: Vec<Value>) -> Vec<Value> {
        let pipeline = Pipeline::parse(&steps(texts)).expect("parse");
        match pipeline.run(rows(input)).expect("run") {
            Output::Rows(relation) => relation
                .collect::<Result<Vec<Record>, _>>()
                .expect("rows")
                .into_iter()
                .map(Value::Object)
                .collect(),
            Output::Document(_) => panic!("expected rows"),
        }
    }

    fn run_document(texts: &[&str], input: Vec<Value>) -> Value {
        let pipeline = Pipeline::parse(&steps(texts)).expect("parse");
        match pipeline.run(rows(input)).expect("run") {
            Output::Document(value) => value,
            Output::Rows(_) => panic!("expected document"),
        }
    }

    #[test]
    fn filter_project_rename() {
        let out = run_rows(
            &["filter .a >= 2", "project a b", "rename x=a"],
            vec![json!({"a": 1, "b": 1}), json!({"a": 2, "c": 3})],
        );
        assert_eq!(out, vec![json!({"x": 2, "b": null})]);
    }

    #[test]
    fn filter_takes_jq_expressions() {
        let out = run_rows(
            &[r#"filter .name == "bob" or (.tags // [] | .[] == "vip")"#],
            vec![
                json!({"name": "bob"}),
                json!({"name": "alice"}),
                json!({"name": "carol", "tags": ["vip"]}),
                json!({}),
            ],
        );
        assert_eq!(
            out,
            vec![json!({"name": "bob"}), json!({"name": "carol", "tags": ["vip"]})]
        );
    }

    #[test]
    fn non_boolean_condition_fails_at_the_row() {
        let pipeline = Pipeline::parse(&steps(&["filter .a"])).expect("parse");
        let Output::Rows(mut relation) = pipeline.run(rows(vec![json!({"a": 1})])).expect("run")
        else {
            panic!("expected rows");
        };
        let err = relation.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn group_then_extend_len() {
        let out = run_rows(
            &["group k", "extend n=len(group)", "project k n"],
            vec![json!({"k": "b"}), json!({"k": "a"}), json!({"k": "b"})],
        );
        assert_eq!(out, vec![json!({"k": "a", "n": 1}), json!({"k": "b", "n": 2})]);
    }

    #[test]
    fn extend_builtins() {
        let out = run_rows(
            &["extend s=sum(a, b) lo=min(a,b) hi=max(a,b) c=concat(t, a)"],
            vec![json!({"a": 2, "b": 5, "t": "x"})],
        );
        assert_eq!(
            out,
            vec![json!({"a": 2, "b": 5, "t": "x", "s": 7, "lo": 2, "hi": 5, "c": "x2"})]
        );
    }

    #[test]
    fn count_by_spreads_key_fields() {
        let out = run_rows(
            &["count-by a b"],
            vec![
                json!({"a": 1, "b": "x"}),
                json!({"a": 1, "b": "x"}),
                json!({"a": 0, "b": "y"}),
            ],
        );
        assert_eq!(
            out,
            vec![
                json!({"a": 0, "b": "y", "count": 1}),
                json!({"a": 1, "b": "x", "count": 2}),
            ]
        );
    }

    #[test]
    fn terminal_documents() {
        let input = || vec![json!({"id": "a", "v": 1}), json!({"id": "b", "v": 2.5})];
        assert_eq!(run_document(&["count"], input()), json!({"count": 2}));
        assert_eq!(run_document(&["reduce-sum v"], input()), json!({"v": 3.5}));
        assert_eq!(
            run_document(&["mapping id"], input()),
            json!({"a": {"id": "a", "v": 1}, "b": {"id": "b", "v": 2.5}})
        );
        assert_eq!(run_rows(&["max v"], input()), vec![json!({"id": "b", "v": 2.5})]);
    }

    #[test]
    fn sums_stay_exact_for_large_integers() {
        let input = || {
            vec![
                serde_json::from_str::<Value>(r#"{"v": 9007199254740992, "w": 1}"#).unwrap(),
                json!({"v": 1, "w": 2}),
            ]
        };
        let doc = run_document(&["reduce-sum v"], input());
        assert_eq!(doc.to_string(), r#"{"v":9007199254740993}"#);
        let out = run_rows(&["take 1", "extend s=sum(v, w)", "project s"], input());
        assert_eq!(out[0].to_string(), r#"{"s":9007199254740993}"#);
    }

    #[test]
    fn mapping_labels_must_not_collide() {
        let input = vec![json!({"id": "1", "v": "str"}), json!({"id": 1, "v": "num"})];
        let err = Pipeline::parse(&steps(&["mapping id"]))
            .expect("parse")
            .run(rows(input))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);

        let doc = run_document(&["mapping id"], vec![json!({"id": 1}), json!({"id": [1, 2]})]);
        assert_eq!(doc, json!({"1": {"id": 1}, "[1,2]": {"id": [1, 2]}}));
    }

    #[test]
    fn extend_args_split_outside_parentheses() {
        assert_eq!(
            super::split_top_level("c=concat(t, a)  n=len( xs ) s=sum(a,b)"),
            vec!["c=concat(t, a)", "n=len( xs )", "s=sum(a,b)"]
        );
    }

    #[test]
    fn slicing_and_while_steps() {
        let input = || (1..=5).map(|a| json!({"a": a})).collect::<Vec<_>>();
        assert_eq!(run_rows(&["skip 1", "take 2"], input()).len(), 2);
        assert_eq!(run_rows(&["take-while .a < 3"], input()).len(), 2);
        assert_eq!(run_rows(&["drop-while .a < 3"], input()).len(), 3);
    }

    #[test]
    fn parse_errors_are_usage() {
        for bad in [
            "bogus",
            "filter .a ~ 1",
            "filter",
            "filter .a >",
            "extend",
            "extend x=sum(a b",
            "take -1",
            "project",
            "extend x=nope(a)",
            "rename a",
        ] {
            let err = Pipeline::parse(&steps(&[bad])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Usage, "{bad}");
        }
        let err = Pipeline::parse(&steps(&["count", "take 1"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn sorted_group_violation_surfaces_lazily() {
        let pipeline = Pipeline::parse(&steps(&["group-sorted a"])).expect("parse");
        let Output::Rows(mut relation) = pipeline
            .run(rows(vec![json!({"a": 2}), json!({"a": 1}), json!({"a": 2})]))
            .expect("run")
        else {
            panic!("expected rows");
        };
        assert!(relation.next().unwrap().is_ok());
        let err = relation.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SortednessViolation);
    }
}
