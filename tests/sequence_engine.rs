//! Lazy sequence engine behavior through the public pipeline API

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use deferq::Value;
use deferq::model::{ArrayFactory, Entry};
use deferq::pipeline::{
    Direction, IteratorScheme, JoinFilter, JoinSpec, Pull, SchemeKind, Sequence, SetOperationKind,
    StageStatus, function, scheme_for,
};
use deferq::QueryError;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn ints(values: &[i64]) -> Sequence {
    Sequence::from_values(values.iter().copied().map(Value::Int))
}

fn counting_naturals(pulled: Arc<AtomicUsize>) -> Sequence {
    Sequence::generated(move || -> Pull {
        let pulled = pulled.clone();
        Box::new((0i64..).map(move |n| {
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok((Value::Int(n), Value::Int(n)))
        }))
    })
}

fn value_of(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or_default()
}

#[test]
fn test_take_pulls_exactly_what_it_yields() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let first_three = counting_naturals(pulled.clone())
        .filter(function(|args| {
            Ok(Value::Bool(
                value_of(args).as_int().is_some_and(|n| n % 2 == 0),
            ))
        }))
        .take(3);

    assert_eq!(
        first_three.to_values().unwrap(),
        vec![Value::Int(0), Value::Int(2), Value::Int(4)]
    );
    assert_eq!(pulled.load(Ordering::SeqCst), 5);
}

#[test]
fn test_nothing_runs_until_pulled() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let sequence = ints(&[1, 2, 3]).select(function(move |args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(value_of(args))
    }));

    let mut iterator = sequence.iter();
    assert_eq!(iterator.status(), StageStatus::Unrealized);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert!(iterator.next().is_some());
    assert_eq!(iterator.status(), StageStatus::Iterating);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_order_by_is_stable_with_secondary_key() {
    let rows: Vec<Entry> = vec![
        (Value::Int(0), Value::list([Value::Int(1), Value::from("b")])),
        (Value::Int(1), Value::list([Value::Int(1), Value::from("a")])),
        (Value::Int(2), Value::list([Value::Int(0), Value::from("z")])),
    ];
    let column = |index: i64| {
        function(move |args| {
            Ok(value_of(args)
                .as_array()
                .and_then(|row| row.get(&Value::Int(index)).cloned())
                .unwrap_or_default())
        })
    };
    let (first, second) = (column(0), column(1));

    let primary =
        Sequence::from_entries(rows.clone()).order_by(first.clone(), Direction::Ascending);
    let keys: Vec<Value> = primary.to_entries().unwrap().into_iter().map(|(key, _)| key).collect();
    assert_eq!(keys, vec![Value::Int(2), Value::Int(0), Value::Int(1)]);

    let secondary = Sequence::from_entries(rows)
        .order_by(first, Direction::Ascending)
        .then_by(second, Direction::Ascending)
        .unwrap();
    let keys: Vec<Value> = secondary
        .to_entries()
        .unwrap()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(keys, vec![Value::Int(2), Value::Int(1), Value::Int(0)]);
}

#[test]
fn test_then_by_requires_ordering() {
    let err = ints(&[1])
        .then_by(function(|args| Ok(value_of(args))), Direction::Ascending)
        .unwrap_err();
    assert!(matches!(err, QueryError::StructuralParse { .. }));
}

#[test]
fn test_group_by_keeps_every_element_once() {
    let grouped = ints(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).group_by(
        function(|args| Ok(Value::Bool(value_of(args).as_int().is_some_and(|n| n % 2 == 0)))),
        Arc::new(ArrayFactory),
    );
    let groups = grouped.to_entries().unwrap();

    assert_eq!(groups.len(), 2);
    let sizes: Vec<usize> = groups
        .iter()
        .map(|(_, group)| group.as_array().map_or(0, |map| map.len()))
        .collect();
    assert_eq!(sizes, vec![5, 5]);
    assert_eq!(groups[0].0, Value::Bool(false));
}

#[test]
fn test_join_with_default() {
    let spec = JoinSpec {
        outer: ints(&[1, 2, 3]),
        inner: ints(&[2, 3, 4]),
        filter: JoinFilter::OnEquality {
            outer: function(|args| Ok(value_of(args))),
            inner: function(|args| Ok(value_of(args))),
        },
        default: Some((Value::Null, Value::Null)),
        projection: function(|args| Ok(Value::list(args.iter().take(2).cloned()))),
        grouped: false,
        factory: Arc::new(ArrayFactory),
    };
    let joined = Sequence::join(spec).to_values().unwrap();

    assert_eq!(
        joined,
        vec![
            Value::list([Value::Int(1), Value::Null]),
            Value::list([Value::Int(2), Value::Int(2)]),
            Value::list([Value::Int(3), Value::Int(3)]),
        ]
    );
}

#[rstest]
#[case(SetOperationKind::Union, vec![1, 2, 3, 4])]
#[case(SetOperationKind::Intersect, vec![2])]
#[case(SetOperationKind::Except, vec![1, 3])]
fn test_set_operations(#[case] kind: SetOperationKind, #[case] expected: Vec<i64>) {
    let result = ints(&[1, 2, 2, 3]).set_operation(kind, ints(&[2, 4])).to_values().unwrap();
    assert_eq!(result, expected.into_iter().map(Value::Int).collect::<Vec<_>>());
}

#[rstest]
#[case(SchemeKind::Lazy)]
#[case(SchemeKind::Eager)]
fn test_schemes_agree(#[case] kind: SchemeKind) {
    let scheme = scheme_for(kind);
    let stages = scheme.adapt(
        scheme.adapt(ints(&[5, 3, 8, 1]).filter(function(|args| {
            Ok(Value::Bool(value_of(args).as_int().is_some_and(|n| n > 2)))
        })))
        .order_by(function(|args| Ok(value_of(args))), Direction::Descending),
    );
    let map = scheme.create_ordered_map(&stages).unwrap();

    assert_eq!(
        map.values().cloned().collect::<Vec<_>>(),
        vec![Value::Int(8), Value::Int(5), Value::Int(3)]
    );
}

#[test]
fn test_eager_scheme_still_bounds_unbounded_sources() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let scheme = scheme_for(SchemeKind::Eager);
    let sliced = scheme.adapt(counting_naturals(pulled.clone()).slice(2, Some(2)));

    assert_eq!(sliced.to_values().unwrap(), vec![Value::Int(2), Value::Int(3)]);
    assert_eq!(pulled.load(Ordering::SeqCst), 4);
}

#[rstest]
#[case(SchemeKind::Lazy)]
#[case(SchemeKind::Eager)]
fn test_filtered_unbounded_source_pulls_on_demand(#[case] kind: SchemeKind) {
    let pulled = Arc::new(AtomicUsize::new(0));
    let scheme = scheme_for(kind);
    let guard = pulled.clone();
    let filtered = scheme.adapt(counting_naturals(pulled.clone()).filter(function(move |_| {
        assert!(guard.load(Ordering::SeqCst) <= 10_000, "source drained");
        Ok(Value::Bool(true))
    })));
    let first_three = scheme.adapt(scheme.adapt(filtered.take(3)).reindex());

    assert_eq!(
        first_three.to_values().unwrap(),
        vec![Value::Int(0), Value::Int(1), Value::Int(2)]
    );
    assert_eq!(pulled.load(Ordering::SeqCst), 3);
}
