//! Call chain parsing, parameter classification and structural hashing

mod common;

use common::{chain, compare, field, identity};
use deferq::ast::{BinaryOperator, Expr, Expression};
use deferq::query::{ArgumentRole, Operation, ParameterValue, Request, ResolvedQuery};
use deferq::pipeline::Direction;
use deferq::{EvaluationContext, Evaluator, QueryBuilder, QueryError, Value};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn build(query: &Expr) -> deferq::Result<deferq::ParsedQuery> {
    QueryBuilder::default().build(query)
}

fn hash(query: &Expr) -> String {
    build(query).unwrap().hash()
}

#[test]
fn test_runtime_constants_share_hash() {
    let over = |limit: i64| {
        chain(
            "numbers",
            vec![("where", vec![compare("n", BinaryOperator::GreaterThan, limit)])],
        )
    };
    assert_eq!(hash(&over(1)), hash(&over(100)));
}

#[test]
fn test_added_operation_changes_hash() {
    let base = chain(
        "numbers",
        vec![("where", vec![compare("n", BinaryOperator::GreaterThan, 1)])],
    );
    let extended = chain(
        "numbers",
        vec![
            ("where", vec![compare("n", BinaryOperator::GreaterThan, 1)]),
            ("where", vec![compare("n", BinaryOperator::LessThan, 9)]),
        ],
    );
    assert_ne!(hash(&base), hash(&extended));
}

#[test]
fn test_structural_literals_change_hash() {
    let take = |count: i64| chain("numbers", vec![("take", vec![Expression::value(count)])]);
    assert_ne!(hash(&take(5)), hash(&take(6)));
    assert_eq!(hash(&take(5)), hash(&take(5)));
}

#[test]
fn test_operations_and_parameters() {
    let parsed = build(&chain(
        "people",
        vec![
            ("where", vec![compare("p", BinaryOperator::GreaterThan, 1)]),
            ("orderBy", vec![field("age"), Expression::value(false)]),
            ("thenByAscending", vec![field("name")]),
            ("slice", vec![Expression::value(1), Expression::variable("size")]),
            ("count", vec![]),
        ],
    ))
    .unwrap();

    let names: Vec<&str> = parsed.query.operations.iter().map(Operation::name).collect();
    assert_eq!(names, vec!["where", "orderBy", "slice"]);
    assert_eq!(parsed.query.request, Request::Count);
    assert!(parsed.query.needs_random_access());

    let start = parsed.parameters.get("3-slice-0").unwrap();
    assert_eq!(start.value, ParameterValue::Structural(Value::Int(1)));
    let size = parsed.parameters.get("3-slice-1").unwrap();
    assert_eq!(size.role, ArgumentRole::Value);
    assert!(!size.is_structural());
    assert!(matches!(
        parsed.parameters.get("0-where-0").map(|p| &p.value),
        Some(ParameterValue::Runtime(_))
    ));
}

#[test]
fn test_build_time_variables_resolve_directions() {
    let query = chain(
        "numbers",
        vec![("orderBy", vec![identity("n"), Expression::variable("dir")])],
    );
    let builder = QueryBuilder::new(
        Evaluator::default(),
        EvaluationContext::new().with_variable("dir", "desc"),
    );
    let parsed = builder.build(&query).unwrap();

    match &parsed.query.operations[0] {
        Operation::OrderBy { orderings } => {
            assert_eq!(orderings[0].direction, Direction::Descending)
        }
        other => panic!("unexpected operation {other:?}"),
    }
    let direction = parsed.parameters.get("0-orderBy-1").unwrap();
    assert_eq!(direction.role, ArgumentRole::Constant);
    assert!(direction.is_structural());
}

#[test]
fn test_variable_values_stay_runtime() {
    let query = chain("numbers", vec![("take", vec![Expression::variable("limit")])]);
    let builder = QueryBuilder::new(
        Evaluator::default(),
        EvaluationContext::new().with_variable("limit", 3),
    );
    let parameter = builder.build(&query).unwrap().parameters.get("0-take-0").cloned().unwrap();

    assert_eq!(parameter.role, ArgumentRole::Value);
    assert!(!parameter.is_structural());
}

#[test]
fn test_named_callable_arguments_stay_runtime() {
    let parsed = build(&chain(
        "numbers",
        vec![("select", vec![Expression::variable("double")])],
    ))
    .unwrap();
    let function = parsed.parameters.get("0-select-0").unwrap();

    assert_eq!(function.role, ArgumentRole::Function);
    assert_eq!(
        function.value,
        ParameterValue::Runtime(Expression::variable("double"))
    );
}

#[test]
fn test_resolved_query_compiles_chain() {
    let parsed = build(&chain(
        "numbers",
        vec![
            ("unique", vec![]),
            ("union", vec![Expression::list([Expression::value(1)])]),
            ("first", vec![]),
        ],
    ))
    .unwrap();
    let resolved = ResolvedQuery::resolve(&parsed);

    assert_eq!(resolved.compiled, "$numbers->unique()->union(:1-union-0)->first()");
    assert_eq!(
        resolved.structural_value("1-union-0"),
        Some(&Value::list([Value::Int(1)]))
    );
}

#[rstest]
#[case::unknown_verb(chain("items", vec![("explode", vec![])]))]
#[case::request_not_last(chain("items", vec![("count", vec![]), ("keys", vec![])]))]
#[case::then_by_without_order(chain("items", vec![("thenBy", vec![identity("x")])]))]
#[case::unfinished_join(chain("items", vec![("join", vec![Expression::list([])])]))]
#[case::clause_without_join(chain("items", vec![("on", vec![identity("x")])]))]
#[case::source_not_variable(Expression::method_call(
    Expression::value(1),
    "count",
    Vec::<Expr>::new(),
))]
fn test_structural_errors(#[case] query: Expr) {
    assert!(matches!(build(&query), Err(QueryError::StructuralParse { .. })));
}

#[rstest]
#[case::missing_argument(chain("items", vec![("where", vec![])]))]
#[case::not_callable(chain("items", vec![("select", vec![Expression::value(5)])]))]
#[case::unknown_builtin(chain(
    "items",
    vec![("select", vec![Expression::value("no_such_function")])],
))]
#[case::computed_callable_name(chain(
    "items",
    vec![("select", vec![Expression::variable_named(Expression::variable("name"))])],
))]
#[case::bad_direction(chain(
    "items",
    vec![("orderBy", vec![identity("x"), Expression::value("sideways")])],
))]
#[case::runtime_direction(chain(
    "items",
    vec![("orderBy", vec![identity("x"), Expression::variable("dir")])],
))]
#[case::computed_method_name(Expression::method_call_named(
    Expression::variable("items"),
    Expression::variable("verb"),
    Vec::<Expr>::new(),
))]
fn test_invalid_arguments(#[case] query: Expr) {
    assert!(matches!(
        build(&query),
        Err(QueryError::InvalidOperationArgument { .. })
    ));
}
