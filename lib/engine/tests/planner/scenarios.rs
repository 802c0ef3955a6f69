use crate::test_utils::{iri, triple, var, TestStatistics};
use std::rc::Rc;
use std::sync::Arc;
use triplan_common::{CancellationToken, Permutation, PlanningError, TripleComponent};
use triplan_engine::{
    ExecutionTree, Operation, PlannerConfig, QueryPlanner,
};
use triplan_model::vocab::ql;
use triplan_model::{
    AggregateExpression, AggregateFunction, Expression, GraphPattern, GraphPatternOperation,
    GroundTerm, Literal, OrderKey, ParsedQuery, PropertyPath, QueryClause, SparqlFilter,
    SparqlTriple, TermPattern,
};

fn planner() -> QueryPlanner {
    QueryPlanner::new(Arc::new(TestStatistics))
}

fn deterministic_planner() -> QueryPlanner {
    QueryPlanner::new(Arc::new(TestStatistics)).with_config(PlannerConfig {
        deterministic_tie_break: true,
        ..PlannerConfig::default()
    })
}

fn plan(query: &ParsedQuery) -> Rc<ExecutionTree> {
    planner().create_execution_tree(query).unwrap()
}

/// S1: a single triple with bound predicate and object becomes one scan of
/// the POS permutation.
#[test]
fn single_triple_scan() {
    let query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::bgp(vec![SparqlTriple::new(
            var("x"),
            iri("p"),
            TermPattern::NamedNode(iri("o")),
        )]),
    );
    let tree = plan(&query);

    match tree.operation() {
        Operation::IndexScan {
            permutation,
            constraints,
            ..
        } => {
            assert_eq!(*permutation, Permutation::Pos);
            assert!(constraints.is_fixed(TripleComponent::Predicate));
            assert!(constraints.is_fixed(TripleComponent::Object));
            assert!(!constraints.is_fixed(TripleComponent::Subject));
        }
        other => panic!("expected an index scan, got {other:?}"),
    }
    assert_eq!(tree.column_of(&var("x")), Some(0));
    assert_eq!(tree.arity(), 1);
}

/// S2: a two-triple star joins on the shared variable.
#[test]
fn two_triple_star_join() {
    let query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::bgp(vec![triple("x", "p1", "a"), triple("x", "p2", "b")]),
    );
    let tree = plan(&query);

    match tree.operation() {
        Operation::Join {
            left,
            right,
            join_columns,
            ..
        } => {
            assert_eq!(join_columns.len(), 1);
            let (l, r) = join_columns[0];
            assert_eq!(left.variable_columns()[l], var("x"));
            assert_eq!(right.variable_columns()[r], var("x"));
        }
        other => panic!("expected a join, got {other:?}"),
    }
    assert_eq!(tree.arity(), 3);
    for name in ["x", "a", "b"] {
        assert!(tree.column_of(&var(name)).is_some(), "missing ?{name}");
    }
}

/// S3: the filter sits directly above the scan binding its variable, not
/// above the join.
#[test]
fn filter_is_pushed_to_the_binding_scan() {
    let query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::from_operations(vec![
            GraphPatternOperation::Bgp {
                triples: vec![triple("x", "p", "y"), triple("y", "q", "z")],
            },
            GraphPatternOperation::Filter(SparqlFilter::new(Expression::greater(
                var("z").into(),
                Literal::from(5).into(),
            ))),
        ]),
    );
    let tree = plan(&query);

    let Operation::Join { left, right, .. } = tree.operation() else {
        panic!("expected a join at the root, got {:?}", tree.operation());
    };
    let filtered: Vec<&Rc<ExecutionTree>> = [left, right]
        .into_iter()
        .filter(|side| matches!(side.operation(), Operation::Filter { .. }))
        .collect();
    assert_eq!(filtered.len(), 1, "exactly one side must be filtered");
    let Operation::Filter { input, .. } = filtered[0].operation() else {
        unreachable!()
    };
    assert!(
        matches!(input.operation(), Operation::IndexScan { .. }),
        "the filter must wrap the scan directly"
    );
    assert!(input.column_of(&var("z")).is_some());
}

/// S4: an alternative path becomes a union of two scans.
#[test]
fn alternative_path_becomes_a_union() {
    let query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::bgp(vec![SparqlTriple::new(
            var("s"),
            PropertyPath::alternative(PropertyPath::Iri(iri("p")), PropertyPath::Iri(iri("q"))),
            var("x"),
        )]),
    );
    let tree = plan(&query);

    let Operation::Union { left, right } = tree.operation() else {
        panic!("expected a union at the root, got {:?}", tree.operation());
    };
    for side in [left, right] {
        match side.operation() {
            Operation::IndexScan { permutation, .. } => {
                assert_eq!(*permutation, Permutation::Pso);
            }
            other => panic!("expected an index scan branch, got {other:?}"),
        }
    }
    assert!(tree.column_of(&var("s")).is_some());
    assert!(tree.column_of(&var("x")).is_some());
}

/// S5: a transitive path wraps the scan of its inner path, anchored at the
/// constant subject.
#[test]
fn transitive_path_over_the_inner_scan() {
    let query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::bgp(vec![SparqlTriple::new(
            TermPattern::NamedNode(iri("a")),
            PropertyPath::one_or_more(PropertyPath::Iri(iri("p"))),
            var("x"),
        )]),
    );
    let tree = plan(&query);

    match tree.operation() {
        Operation::TransitivePath {
            input,
            subject,
            min,
            max,
            ..
        } => {
            assert_eq!(*subject, TermPattern::NamedNode(iri("a")));
            assert_eq!((*min, *max), (1, None));
            match input.operation() {
                Operation::IndexScan { permutation, .. } => {
                    assert_eq!(*permutation, Permutation::Pso);
                }
                other => panic!("expected a scan inside the closure, got {other:?}"),
            }
        }
        other => panic!("expected a transitive path, got {other:?}"),
    }
    assert_eq!(tree.variable_columns(), &[var("x")]);
}

fn pattern_trick_query() -> ParsedQuery {
    let mut query = ParsedQuery::select(
        vec![var("p")],
        GraphPattern::bgp(vec![SparqlTriple::new(
            var("s"),
            ql::HAS_PREDICATE.into_owned(),
            var("p"),
        )]),
    );
    query.group_by = vec![var("p")];
    if let QueryClause::Select(select) = &mut query.clause {
        select.aggregates.push(AggregateExpression {
            function: AggregateFunction::Count,
            distinct: false,
            input: None,
            alias: var("c"),
        });
    }
    query
}

/// S6: counting predicates per subject uses the precomputed operator; with
/// the rewrite disabled the query falls back to group-by over a scan.
#[test]
fn pattern_trick_rewrite() {
    let query = pattern_trick_query();
    let tree = plan(&query);
    match tree.operation() {
        Operation::CountAvailablePredicates {
            subject_variable,
            predicate_variable,
            count_variable,
        } => {
            assert_eq!(*subject_variable, var("s"));
            assert_eq!(*predicate_variable, var("p"));
            assert_eq!(*count_variable, var("c"));
        }
        other => panic!("expected the pattern-trick operator, got {other:?}"),
    }
    assert_eq!(tree.variable_columns(), &[var("p"), var("c")]);
}

#[test]
fn pattern_trick_can_be_disabled() {
    let query = pattern_trick_query();
    let mut planner = QueryPlanner::new(Arc::new(TestStatistics)).with_config(PlannerConfig {
        enable_pattern_trick: false,
        ..PlannerConfig::default()
    });
    let tree = planner.create_execution_tree(&query).unwrap();

    match tree.operation() {
        Operation::GroupBy { input, keys, .. } => {
            assert_eq!(keys, &[var("p")]);
            match input.operation() {
                Operation::IndexScan { permutation, .. } => {
                    // POS delivers the grouping variable already sorted.
                    assert_eq!(*permutation, Permutation::Pos);
                }
                other => panic!("expected a scan below the group-by, got {other:?}"),
            }
        }
        other => panic!("expected a group-by, got {other:?}"),
    }
    assert_eq!(tree.variable_columns(), &[var("p"), var("c")]);
}

#[test]
fn optional_preserves_the_left_side() {
    let query = ParsedQuery::select(
        vec![var("x"), var("a"), var("b")],
        GraphPattern::from_operations(vec![
            GraphPatternOperation::Bgp {
                triples: vec![triple("x", "p1", "a")],
            },
            GraphPatternOperation::Optional(GraphPattern::bgp(vec![triple("x", "p2", "b")])),
        ]),
    );
    let tree = plan(&query);
    match tree.operation() {
        Operation::OptionalJoin { left, .. } => {
            assert!(left.column_of(&var("a")).is_some());
        }
        other => panic!("expected an optional join, got {other:?}"),
    }
    assert_eq!(tree.arity(), 3);
}

#[test]
fn minus_keeps_only_left_columns() {
    let query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::from_operations(vec![
            GraphPatternOperation::Bgp {
                triples: vec![triple("x", "p1", "a")],
            },
            GraphPatternOperation::Minus(GraphPattern::bgp(vec![triple("x", "p2", "hidden")])),
        ]),
    );
    let tree = plan(&query);
    assert!(matches!(tree.operation(), Operation::Minus { .. }));
    assert!(tree.column_of(&var("x")).is_some());
    assert!(tree.column_of(&var("a")).is_some());
    assert!(tree.column_of(&var("hidden")).is_none());
}

#[test]
fn values_join_against_the_pattern() {
    let query = ParsedQuery::select(
        vec![var("x"), var("y")],
        GraphPattern::from_operations(vec![
            GraphPatternOperation::Values {
                variables: vec![var("x")],
                bindings: vec![
                    vec![Some(GroundTerm::NamedNode(iri("v1")))],
                    vec![Some(GroundTerm::NamedNode(iri("v2")))],
                ],
            },
            GraphPatternOperation::Bgp {
                triples: vec![triple("x", "p", "y")],
            },
        ]),
    );
    let tree = plan(&query);
    let Operation::Join { left, right, .. } = tree.operation() else {
        panic!("expected a join, got {:?}", tree.operation());
    };
    let has_values = [left, right]
        .into_iter()
        .any(|side| has_operation(side, &|op| matches!(op, Operation::Values { .. })));
    assert!(has_values, "one side must feed the VALUES bindings");
}

#[test]
fn bind_appends_a_column() {
    let query = ParsedQuery::select(
        vec![var("x"), var("z")],
        GraphPattern::from_operations(vec![
            GraphPatternOperation::Bgp {
                triples: vec![triple("x", "p", "y")],
            },
            GraphPatternOperation::Bind {
                expression: Expression::Variable(var("y")),
                variable: var("z"),
            },
        ]),
    );
    let tree = plan(&query);
    assert!(matches!(tree.operation(), Operation::Bind { .. }));
    assert!(tree.column_of(&var("z")).is_some());
}

#[test]
fn text_clique_plans_a_text_leaf() {
    let query = ParsedQuery::select(
        vec![var("plant"), var("region")],
        GraphPattern::bgp(vec![
            SparqlTriple::new(
                var("c"),
                ql::CONTAINS_WORD.into_owned(),
                TermPattern::Literal(Literal::new_simple_literal("edible")),
            ),
            SparqlTriple::new(var("c"), ql::CONTAINS_ENTITY.into_owned(), var("plant")),
            triple("plant", "grows-in", "region"),
        ]),
    );
    let tree = plan(&query);

    assert!(has_operation(&tree, &|op| matches!(
        op,
        Operation::TextLeaf { word_part, .. } if word_part == "edible"
    )));
    for name in ["c", "plant", "region"] {
        assert!(tree.column_of(&var(name)).is_some(), "missing ?{name}");
    }
}

#[test]
fn order_by_reuses_an_existing_sort_order() {
    let mut query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::bgp(vec![SparqlTriple::new(
            var("x"),
            iri("p"),
            TermPattern::NamedNode(iri("o")),
        )]),
    );
    query.order_by = vec![OrderKey::ascending(var("x"))];
    // The POS scan is already sorted on ?x; no sort is inserted.
    let tree = plan(&query);
    assert!(matches!(tree.operation(), Operation::IndexScan { .. }));

    query.order_by = vec![OrderKey::descending(var("x"))];
    let tree = plan(&query);
    assert!(matches!(tree.operation(), Operation::OrderBy { .. }));
}

#[test]
fn distinct_reuses_an_existing_sort_order() {
    let mut query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::bgp(vec![SparqlTriple::new(
            var("x"),
            iri("p"),
            TermPattern::NamedNode(iri("o")),
        )]),
    );
    query.distinct = true;
    let tree = plan(&query);
    match tree.operation() {
        Operation::Distinct { input, .. } => {
            assert!(matches!(input.operation(), Operation::IndexScan { .. }));
        }
        other => panic!("expected a distinct, got {other:?}"),
    }
}

#[test]
fn limit_and_offset_are_plan_metadata() {
    let mut query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::bgp(vec![SparqlTriple::new(
            var("x"),
            iri("p"),
            TermPattern::NamedNode(iri("o")),
        )]),
    );
    query.limit = Some(10);
    query.offset = 5;
    let tree = plan(&query);
    assert_eq!(tree.limit(), Some(10));
    assert_eq!(tree.offset(), 5);
}

#[test]
fn planning_is_deterministic_with_tie_breaking() {
    let query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::bgp(vec![triple("x", "p1", "a"), triple("x", "p2", "b")]),
    );
    let first = deterministic_planner().create_execution_tree(&query).unwrap();
    let second = deterministic_planner()
        .create_execution_tree(&query)
        .unwrap();
    assert_eq!(first.cache_key(), second.cache_key());
}

#[test]
fn unbound_select_variable_is_an_error() {
    let query = ParsedQuery::select(
        vec![var("missing")],
        GraphPattern::bgp(vec![triple("x", "p", "y")]),
    );
    let result = planner().create_execution_tree(&query);
    assert!(matches!(
        result,
        Err(PlanningError::UnboundVariable { variable, .. }) if variable == var("missing")
    ));
}

#[test]
fn unbound_filter_variable_is_an_error() {
    let query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::from_operations(vec![
            GraphPatternOperation::Bgp {
                triples: vec![triple("x", "p", "y")],
            },
            GraphPatternOperation::Filter(SparqlFilter::new(Expression::Bound(var("nowhere")))),
        ]),
    );
    let result = planner().create_execution_tree(&query);
    assert!(matches!(
        result,
        Err(PlanningError::UnboundVariable { variable, .. }) if variable == var("nowhere")
    ));
}

#[test]
fn invalid_text_limit_is_an_error() {
    let mut query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::bgp(vec![triple("x", "p", "y")]),
    );
    query.text_limit = Some("a lot".to_owned());
    assert!(matches!(
        planner().create_execution_tree(&query),
        Err(PlanningError::Structural { .. })
    ));
}

#[test]
fn cancellation_aborts_planning() {
    let query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::bgp(vec![triple("x", "p1", "a"), triple("x", "p2", "b")]),
    );
    let token = CancellationToken::new();
    token.cancel();
    let mut planner = QueryPlanner::new(Arc::new(TestStatistics)).with_cancellation(token);
    assert!(matches!(
        planner.create_execution_tree(&query),
        Err(PlanningError::Cancelled)
    ));
}

#[test]
fn subqueries_plan_through_the_same_pipeline() {
    let inner = ParsedQuery::select(
        vec![var("x"), var("y")],
        GraphPattern::bgp(vec![triple("x", "p", "y")]),
    );
    let query = ParsedQuery::select(
        vec![var("x")],
        GraphPattern::from_operations(vec![GraphPatternOperation::Subquery(Box::new(inner))]),
    );
    let tree = plan(&query);
    assert!(tree.column_of(&var("x")).is_some());
}

/// Walks the operator tree looking for a node matching `predicate`.
fn has_operation(tree: &Rc<ExecutionTree>, predicate: &dyn Fn(&Operation) -> bool) -> bool {
    if predicate(tree.operation()) {
        return true;
    }
    let children: Vec<&Rc<ExecutionTree>> = match tree.operation() {
        Operation::Join { left, right, .. }
        | Operation::OptionalJoin { left, right, .. }
        | Operation::Minus { left, right, .. }
        | Operation::Union { left, right } => vec![left, right],
        Operation::Filter { input, .. }
        | Operation::Bind { input, .. }
        | Operation::Sort { input, .. }
        | Operation::OrderBy { input, .. }
        | Operation::Distinct { input, .. }
        | Operation::GroupBy { input, .. }
        | Operation::TransitivePath { input, .. } => vec![input],
        Operation::IndexScan { .. }
        | Operation::TextLeaf { .. }
        | Operation::CountAvailablePredicates { .. }
        | Operation::Values { .. } => Vec::new(),
    };
    children
        .into_iter()
        .any(|child| has_operation(child, predicate))
}
