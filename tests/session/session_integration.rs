//! Integration tests for routing, fan-out and merging through `ShardSession`

#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use parking_lot::Mutex;
use shardbridge::{ShardSession, SortingMerger, SqlAuditor};
use shardbridge_config::{RouterSection, RuleRecord, SessionSection};
use shardbridge_core::{Result, RoutingFact, ShardBridgeError, Value};
use shardbridge_router::{router_with_functions, FunctionRegistry, Router, Rule, ShardRouter};

fn fan_out_router() -> Arc<dyn ShardRouter> {
    Arc::new(
        Router::builder()
            .rule(Rule::namespace("orders", shard_ids(&["s1", "s2", "s3"])).unwrap())
            .rule(Rule::statement("orders.get", shard_ids(&["s2"])).unwrap())
            .build()
            .unwrap(),
    )
}

#[test]
fn test_resolution_is_deterministic_without_cache() {
    let router = Router::builder()
        .rule(statement_rule("users.create", &["s1"], "id < 100"))
        .rule(statement_rule("users.create", &["s2"], "id >= 100"))
        .build()
        .unwrap();
    assert!(router.cache().is_none());

    let fact = RoutingFact::new("users.create", entity(150));
    let first = router.resolve(&fact).unwrap();
    for _ in 0..50 {
        assert_eq!(router.resolve(&fact).unwrap(), first);
    }
    assert_eq!(first.shards(), &shard_ids(&["s2"])[..]);
}

#[test]
fn test_expression_tier_takes_precedence() {
    let router = Router::builder()
        .rule(Rule::namespace("ns", shard_ids(&["s3"])).unwrap())
        .rule(statement_rule("ns.create", &["s2", "s1"], "id < 100"))
        .build()
        .unwrap();

    let result = router.resolve(&RoutingFact::new("ns.create", entity(5))).unwrap();
    assert_eq!(result.shards(), &shard_ids(&["s1", "s2"])[..]);

    // the expression no longer holds, so the namespace rule applies
    let result = router.resolve(&RoutingFact::new("ns.create", entity(500))).unwrap();
    assert_eq!(result.shards(), &shard_ids(&["s3"])[..]);
}

#[test]
fn test_cache_evaluates_rule_once() {
    let evaluations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&evaluations);
    let functions = FunctionRegistry::new().with("tick", move |args: &[Value]| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(args.first().cloned().unwrap_or(Value::Null))
    });

    let records =
        vec![RuleRecord::for_statement("users.get", "s1").with_expression("tick(id) > 0")];
    let section = RouterSection {
        enable_cache: true,
        cache_size: 16,
        ..RouterSection::default()
    };
    let router = router_with_functions(&section, &records, &functions).unwrap();

    let fact = RoutingFact::new("users.get", entity(7));
    let first = router.resolve(&fact).unwrap();
    let second = router.resolve(&RoutingFact::new("users.get", entity(7))).unwrap();

    assert_eq!(first, second);
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);
    assert_eq!(router.cache().unwrap().stats().hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fan_out_sums_affected_rows() {
    let fixture = Fixture::new();
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_count("s1", 2)
            .with_count("s2", 0)
            .with_count("s3", 5),
    );
    let session = fixture.session(fan_out_router(), executor.clone());

    assert_eq!(session.update("orders.archive", &Value::Null).unwrap(), 7);
    assert_eq!(session.delete("orders.purge", &Value::Null).unwrap(), 7);
    assert_eq!(executor.shards_called("orders.archive"), vec!["s1", "s2", "s3"]);
    assert!(fixture.all_released());
}

#[test]
fn test_select_concatenates_in_shard_order() {
    let fixture = Fixture::new();
    let router: Arc<dyn ShardRouter> = Arc::new(
        Router::builder()
            .rule(Rule::namespace("orders", shard_ids(&["s2", "s1"])).unwrap())
            .build()
            .unwrap(),
    );
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_rows("s1", ints(&[1, 2]))
            .with_rows("s2", ints(&[3])),
    );
    let session = fixture.session(router, executor);

    assert_eq!(session.select("orders.list", &Value::Null).unwrap(), ints(&[1, 2, 3]));
}

#[test]
fn test_registered_merger_replaces_concatenation() {
    let fixture = Fixture::new();
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_rows("s1", ints(&[1, 5, 9]))
            .with_rows("s2", ints(&[2, 3]))
            .with_rows("s3", ints(&[4])),
    );
    let session = ShardSession::builder()
        .executor(executor)
        .router(fan_out_router())
        .registry(fixture.registry())
        .merger("orders.sorted", Arc::new(SortingMerger::new(shardbridge::compare_values)))
        .build()
        .unwrap();

    assert_eq!(
        session.select("orders.sorted", &Value::Null).unwrap(),
        ints(&[1, 2, 3, 4, 5, 9])
    );
    assert_eq!(
        session.select("orders.unsorted", &Value::Null).unwrap(),
        ints(&[1, 5, 9, 2, 3, 4])
    );
}

#[test]
fn test_select_bounds_reach_executor() {
    let fixture = Fixture::new();
    let executor = Arc::new(ScriptedExecutor::new().with_rows("s2", ints(&[1, 2, 3, 4])));
    let session = fixture.session(fan_out_router(), executor);

    let rows = session
        .select_with_bounds("orders.get", &Value::Null, shardbridge::RowBounds::new(1, 2))
        .unwrap();
    assert_eq!(rows, ints(&[2, 3]));
}

#[test]
fn test_query_for_object_across_shards() {
    let fixture = Fixture::new();

    let none = Arc::new(ScriptedExecutor::new().with_scalar("s2", Some(Value::Null)));
    let session = fixture.session(fan_out_router(), none);
    assert_eq!(session.query_for_object("orders.find", &Value::Null).unwrap(), None);

    let one = Arc::new(ScriptedExecutor::new().with_scalar("s3", Some(Value::from("found"))));
    let session = fixture.session(fan_out_router(), one);
    assert_eq!(
        session.query_for_object("orders.find", &Value::Null).unwrap(),
        Some(Value::from("found"))
    );

    let two = Arc::new(
        ScriptedExecutor::new()
            .with_scalar("s1", Some(Value::Int(1)))
            .with_scalar("s3", Some(Value::Int(2))),
    );
    let session = fixture.session(fan_out_router(), two);
    match session.query_for_object("orders.find", &Value::Null).unwrap_err() {
        ShardBridgeError::AmbiguousResult { statement, count } => {
            assert_eq!(statement, "orders.find");
            assert_eq!(count, 2);
        }
        other => panic!("Wrong error variant: {}", other),
    }
}

#[test]
fn test_failed_task_releases_every_connection() {
    let fixture = Fixture::new();
    let executor = Arc::new(ScriptedExecutor::new().failing_on("s2"));
    let session = fixture.session(fan_out_router(), executor);

    let err = session.update("orders.archive", &Value::Null).unwrap_err();
    for shard in SHARDS {
        assert_eq!(fixture.source(shard).acquired(), 1, "acquired on {}", shard);
        assert_eq!(fixture.source(shard).released(), 1, "released on {}", shard);
    }

    match &err {
        ShardBridgeError::Concurrency { statement, .. } => assert_eq!(statement, "orders.archive"),
        other => panic!("Wrong error variant: {}", other),
    }
    let failures = err.task_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].shard.as_str(), "s2");
    assert!(failures[0].cause.to_string().contains("injected failure"));
}

#[test]
fn test_acquisition_failure_aborts_before_dispatch() {
    let fixture = Fixture::new();
    fixture.source("s3").refuse_connections();
    let executor = Arc::new(ScriptedExecutor::new());
    let session = fixture.session(fan_out_router(), executor.clone());

    let err = session.update("orders.archive", &Value::Null).unwrap_err();
    assert!(matches!(err, ShardBridgeError::ConnectionAcquisition { .. }));
    assert_eq!(executor.call_count(), 0);
    assert!(fixture.all_released());
}

#[test]
fn test_fan_out_errors_name_the_statement() {
    let fixture = Fixture::new();
    fixture.source("s2").refuse_connections();
    let session = fixture.session(fan_out_router(), Arc::new(ScriptedExecutor::new()));

    let err = session.delete("orders.purge", &Value::Null).unwrap_err();
    match &err {
        ShardBridgeError::ConnectionAcquisition { statement, shard, .. } => {
            assert_eq!(statement, "orders.purge");
            assert_eq!(shard.as_str(), "s2");
        }
        other => panic!("Wrong error variant: {}", other),
    }
    assert!(err.to_string().contains("'orders.purge'"));

    let fixture = Fixture::new();
    let executor = Arc::new(ScriptedExecutor::new().panicking_on("s3"));
    let session = fixture.session(fan_out_router(), executor);

    let err = session.update("orders.archive", &Value::Null).unwrap_err();
    assert!(err.to_string().starts_with("Statement 'orders.archive' failed concurrently"));
    let failures = err.task_failures();
    assert_eq!(failures.len(), 1);
    match &failures[0].cause {
        ShardBridgeError::Statement { statement, shard, message } => {
            assert_eq!(statement, "orders.archive");
            assert_eq!(shard.as_ref().map(|s| s.as_str()), Some("s3"));
            assert!(message.contains("driver bug"));
        }
        other => panic!("Wrong error variant: {}", other),
    }
    assert!(fixture.all_released());
}

fn regroup_router() -> Arc<dyn ShardRouter> {
    Arc::new(
        Router::builder()
            .rule(statement_rule("users.create", &["s1"], "id < 100"))
            .rule(statement_rule("users.create", &["s2"], "id >= 100 && id < 200"))
            .rule(statement_rule("users.create", &["s2", "s3"], "id >= 900 && id < 1000"))
            .rule(namespace_rule("users", &["s1", "s2", "s3"], "size() > 1"))
            .build()
            .unwrap(),
    )
}

#[test]
fn test_batch_insert_regroups_entities() {
    let fixture = Fixture::new();
    let executor = Arc::new(ScriptedExecutor::new());
    let session = fixture.session(regroup_router(), executor.clone());

    let batch = Value::batch(vec![entity(1), entity(150), entity(2), entity(5000)]);
    assert_eq!(session.insert("users.create", &batch).unwrap(), 4);

    let mut inserts: Vec<(String, Value)> = executor
        .calls
        .lock()
        .iter()
        .map(|(shard, _, parameter)| (shard.clone(), parameter.clone()))
        .collect();
    inserts.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(
        inserts,
        vec![
            ("default".to_string(), Value::batch(vec![entity(5000)])),
            ("s1".to_string(), Value::batch(vec![entity(1), entity(2)])),
            ("s2".to_string(), Value::batch(vec![entity(150)])),
        ]
    );
    assert!(fixture.all_released());
}

#[test]
fn test_ambiguous_entity_fails_before_any_insert() {
    let fixture = Fixture::new();
    let executor = Arc::new(ScriptedExecutor::new());
    let session = fixture.session(regroup_router(), executor.clone());

    let batch = Value::batch(vec![entity(1), entity(950), entity(150), entity(990)]);
    match session.insert("users.create", &batch).unwrap_err() {
        ShardBridgeError::AmbiguousEntityRouting { statement, entities } => {
            assert_eq!(statement, "users.create");
            let indices: Vec<usize> = entities.iter().map(|e| e.index).collect();
            assert_eq!(indices, vec![1, 3]);
            assert_eq!(entities[0].shards, shard_ids(&["s2", "s3"]));
        }
        other => panic!("Wrong error variant: {}", other),
    }
    assert_eq!(executor.call_count(), 0);
}

#[test]
fn test_single_entity_insert_goes_direct() {
    let fixture = Fixture::new();
    let executor = Arc::new(ScriptedExecutor::new());
    let session = fixture.session(regroup_router(), executor.clone());

    assert_eq!(session.insert("users.create", &entity(120)).unwrap(), 1);
    assert_eq!(executor.shards_called("users.create"), vec!["s2"]);
    assert_eq!(fixture.source("s2").released(), 1);
}

#[test]
fn test_unrouted_session_runs_on_default() {
    let fixture = Fixture::new();
    let executor = Arc::new(ScriptedExecutor::new().with_rows("default", ints(&[7])));
    let session = ShardSession::builder()
        .executor(executor.clone())
        .registry(fixture.registry())
        .build()
        .unwrap();

    assert_eq!(session.select("orders.list", &Value::Null).unwrap(), ints(&[7]));
    assert_eq!(session.batch_insert("orders.create", &[entity(1), entity(2)]).unwrap(), 2);
    assert_eq!(executor.shards_called("orders.create"), vec!["default", "default"]);
    assert_eq!(fixture.default_source.acquired(), 2);
    assert!(fixture.all_released());
}

struct Collecting(Mutex<Vec<(String, Option<String>)>>);

impl SqlAuditor for Collecting {
    fn audit(&self, statement: &str, text: Option<&str>, _parameter: &Value) -> Result<()> {
        self.0.lock().push((statement.to_string(), text.map(str::to_string)));
        Ok(())
    }
}

#[test]
fn test_auditor_sees_every_statement() {
    let fixture = Fixture::new();
    let auditor = Arc::new(Collecting(Mutex::new(Vec::new())));
    let session = ShardSession::builder()
        .executor(Arc::new(ScriptedExecutor::new()))
        .router(fan_out_router())
        .registry(fixture.registry())
        .auditor(auditor.clone())
        .build()
        .unwrap();

    session.update("orders.archive", &Value::Null).unwrap();
    session.select("orders.get", &Value::Null).unwrap();
    session.shutdown().unwrap();

    let seen = auditor.0.lock().clone();
    assert_eq!(
        seen,
        vec![
            ("orders.archive".to_string(), Some("-- orders.archive".to_string())),
            ("orders.get".to_string(), Some("-- orders.get".to_string())),
        ]
    );
}

#[test]
fn test_profiling_does_not_change_results() {
    let fixture = Fixture::new();
    let settings = SessionSection {
        profile_long_running_sql: true,
        long_running_threshold_ms: 0,
        ..SessionSection::default()
    };
    let session = ShardSession::builder()
        .executor(Arc::new(ScriptedExecutor::new().with_count("s2", 3)))
        .router(fan_out_router())
        .registry(fixture.registry())
        .settings(settings)
        .build()
        .unwrap();

    assert_eq!(session.update("orders.get", &Value::Null).unwrap(), 3);
}

#[test]
fn test_shutdown_is_single_shot() {
    let fixture = Fixture::new();
    let session = fixture.session(fan_out_router(), Arc::new(ScriptedExecutor::new()));

    session.shutdown().unwrap();
    assert!(matches!(session.shutdown().unwrap_err(), ShardBridgeError::Lifecycle { .. }));
    assert!(matches!(
        session.select("orders.list", &Value::Null).unwrap_err(),
        ShardBridgeError::Lifecycle { .. }
    ));
}
