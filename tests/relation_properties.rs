// Behavioral properties of the relation algebra, exercised through the public API.
use relq::api::{
    Computed, Error, ErrorKind, InputOrder, Key, Record, Relation, Rename, Snapshot,
};
use serde_json::{Value, json};

fn record(value: Value) -> Record {
    value.as_object().cloned().expect("object")
}

fn rel(values: Vec<Value>) -> Relation<'static> {
    Relation::new(values.into_iter().map(record))
}

fn rows(relation: Relation<'_>) -> Vec<Value> {
    relation
        .collect::<Result<Vec<Record>, Error>>()
        .expect("rows")
        .into_iter()
        .map(Value::Object)
        .collect()
}

fn sample() -> Vec<Value> {
    vec![
        json!({"a": 3, "b": "x", "c": true}),
        json!({"a": 1, "b": "y"}),
        json!({"a": 2, "b": "x", "c": false}),
        json!({"a": 1, "b": "z"}),
        json!({"a": 3, "b": "y"}),
    ]
}

#[test]
fn filter_never_grows_and_every_row_matches() {
    let keep = |r: &Record| r["a"].as_i64().unwrap_or(0) >= 2;
    let total = rel(sample()).count().expect("count");
    let filtered = rows(rel(sample()).filter(keep));
    assert!(filtered.len() <= total);
    assert_eq!(filtered.len(), 3);
    for row in &filtered {
        assert!(keep(row.as_object().expect("object")));
    }
}

#[test]
fn project_is_idempotent() {
    let once = rows(rel(sample()).project(&["a", "c"]));
    let twice = rows(rel(sample()).project(&["a", "c"]).project(&["a", "c"]));
    assert_eq!(once, twice);
    assert_eq!(once[1], json!({"a": 1, "c": null}));
}

#[test]
fn rename_then_inverse_round_trips() {
    let renames = vec![Rename::new("a", "alpha"), Rename::new("b", "beta")];
    let inverse: Vec<Rename> = renames.iter().map(Rename::inverse).collect();
    let renamed = rows(rel(sample()).rename(renames));
    assert_eq!(renamed[0], json!({"alpha": 3, "beta": "x", "c": true}));
    let restored = rows(rel(sample()).rename(vec![Rename::new("a", "alpha"), Rename::new("b", "beta")]).rename(inverse));
    assert_eq!(restored, sample());
}

#[test]
fn sorted_group_matches_unsorted_group() {
    let presorted = rel(sample())
        .sort_by_names(&["a"])
        .expect("sort")
        .group_by_names(&["a"], InputOrder::Sorted)
        .expect("group");
    let sorted_groups = rows(presorted);
    let unsorted_groups = rows(
        rel(sample())
            .group_by_names(&["a"], InputOrder::Unsorted)
            .expect("group"),
    );
    assert_eq!(sorted_groups, unsorted_groups);
    let keys: Vec<&Value> = sorted_groups.iter().map(|g| &g["a"]).collect();
    assert_eq!(keys, vec![&json!(1), &json!(2), &json!(3)]);
    assert_eq!(sorted_groups[0]["group"].as_array().expect("group").len(), 2);
}

#[test]
fn descending_input_groups_when_declared_sorted() {
    let groups = rows(
        rel(vec![json!({"a": 3}), json!({"a": 3}), json!({"a": 1})])
            .group_by_names(&["a"], InputOrder::Sorted)
            .expect("group"),
    );
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["a"], json!(3));
}

#[test]
fn unsorted_input_declared_sorted_is_rejected() {
    let result = rel(vec![json!({"a": 2}), json!({"a": 1}), json!({"a": 2})])
        .group_by_names(&["a"], InputOrder::Sorted)
        .expect("group")
        .collect::<Result<Vec<Record>, Error>>();
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SortednessViolation);
    assert_eq!(err.row(), Some(2));
}

#[test]
fn sorted_input_groups_consecutive_runs() {
    let groups = rows(
        rel(vec![json!({"a": 1}), json!({"a": 1}), json!({"a": 2})])
            .group_by_names(&["a"], InputOrder::Sorted)
            .expect("group"),
    );
    assert_eq!(
        groups,
        vec![
            json!({"a": 1, "group": [{"a": 1}, {"a": 1}]}),
            json!({"a": 2, "group": [{"a": 2}]}),
        ]
    );
}

#[test]
fn mapping_rejects_duplicate_keys() {
    let err = rel(vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 2})])
        .mapping_by_names(&["a"])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateKey);

    let mapping = rel(vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})])
        .mapping_by_names(&["a"])
        .expect("mapping");
    assert_eq!(mapping.len(), 3);
    assert_eq!(mapping.get(&Key::Int(2)), Some(&record(json!({"a": 2}))));
}

#[test]
fn extend_leaves_snapshot_copies_untouched() {
    let snapshot: Snapshot = vec![record(json!({"a": 1, "b": 2}))].into();
    let add_one = || {
        Computed::new("c", &["a"], |args: &[&Value]| {
            json!(args[0].as_i64().unwrap_or(0) + 1)
        })
    };
    let extended = rows(snapshot.copy().extend(vec![add_one()]));
    assert_eq!(extended, vec![json!({"a": 1, "b": 2, "c": 2})]);
    assert_eq!(snapshot.get(0), Some(&record(json!({"a": 1, "b": 2}))));
}

#[test]
fn take_count_is_bounded() {
    for n in [0, 2, 5, 9] {
        let counted = rel(sample()).take(n).count().expect("count");
        assert_eq!(counted, n.min(sample().len()));
    }
}

#[test]
fn empty_aggregates_fail() {
    assert_eq!(
        rel(vec![]).reduce(|a, _| a).unwrap_err().kind(),
        ErrorKind::EmptySequence
    );
    assert_eq!(
        rel(vec![]).min(|_| Ok(Key::Null)).unwrap_err().kind(),
        ErrorKind::EmptySequence
    );
    assert_eq!(rel(vec![]).count().expect("count"), 0);
}

#[test]
fn max_prefers_first_of_ties() {
    let by_a = |r: &Record| Ok(Key::from_json(&r["a"]));
    let best = rel(sample()).max(by_a).expect("max");
    assert_eq!(Value::Object(best), json!({"a": 3, "b": "x", "c": true}));
    let least = rel(sample()).min(by_a).expect("min");
    assert_eq!(Value::Object(least), json!({"a": 1, "b": "y"}));
}

#[test]
fn integer_keys_beyond_float_precision_stay_distinct() {
    let ids: Vec<Value> = ["9007199254740992", "9007199254740993"]
        .iter()
        .map(|id| serde_json::from_str(&format!(r#"{{"id": {id}}}"#)).expect("json"))
        .collect();
    let mapping = rel(ids.clone()).mapping_by_names(&["id"]).expect("mapping");
    assert_eq!(mapping.len(), 2);
    let counts = rel(ids).count_by_names(&["id"]).expect("count_by");
    assert_eq!(counts.values().copied().collect::<Vec<_>>(), vec![1, 1]);
}
