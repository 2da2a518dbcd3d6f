use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use taskdag::graph::{Graph, Label};
use taskdag::optimize::{
    optimize_task_graph, OptimizationStrategy, OptimizeInputs, Replacement, ReplacementContext,
};
use taskdag::parameters::Parameters;
use taskdag::platform::{StaticPlatformClient, TaskStatus};
use taskdag::task::Task;
use taskdag::taskgraph::TaskGraph;

type TestResult = Result<(), Box<dyn Error>>;

// -- helpers -----------------------------------------------------------------

struct Remove;

impl OptimizationStrategy for Remove {
    fn should_remove_task(
        &self,
        _task: &Task,
        _params: &Parameters,
        _arg: &Value,
    ) -> taskdag::Result<bool> {
        Ok(true)
    }
}

/// Replace with the task id given as argument, honoring the deadline the
/// way a cached artifact with a one-day lifetime would.
struct Replace;

impl OptimizationStrategy for Replace {
    fn should_replace_task(
        &self,
        _task: &Task,
        _params: &Parameters,
        deadline: Option<&DateTime<Utc>>,
        arg: &Value,
        _ctx: &ReplacementContext,
    ) -> taskdag::Result<Replacement> {
        let expires = Utc::now() + Duration::days(1);
        if let Some(deadline) = deadline {
            if expires < *deadline {
                return Ok(Replacement::No);
            }
        }
        match arg {
            Value::String(task_id) => Ok(Replacement::With(task_id.clone())),
            _ => Ok(Replacement::WithNothing),
        }
    }
}

fn strategies() -> BTreeMap<String, Arc<dyn OptimizationStrategy>> {
    let mut map: BTreeMap<String, Arc<dyn OptimizationStrategy>> = BTreeMap::new();
    map.insert(
        "never".to_string(),
        Arc::new(taskdag::optimize::strategies::Never),
    );
    map.insert("remove".to_string(), Arc::new(Remove));
    map.insert("replace".to_string(), Arc::new(Replace));
    map
}

fn params() -> Parameters {
    Parameters::new(BTreeMap::new(), &[], false).expect("defaults are valid")
}

struct TaskSpec {
    label: &'static str,
    optimization: Option<(&'static str, Value)>,
    if_dependencies: &'static [&'static str],
    deadline: Option<Duration>,
}

fn task(label: &'static str) -> TaskSpec {
    TaskSpec {
        label,
        optimization: None,
        if_dependencies: &[],
        deadline: None,
    }
}

impl TaskSpec {
    fn opt(mut self, name: &'static str, arg: Value) -> Self {
        self.optimization = Some((name, arg));
        self
    }

    fn if_deps(mut self, deps: &'static [&'static str]) -> Self {
        self.if_dependencies = deps;
        self
    }

    fn deadline_in(mut self, duration: Duration) -> Self {
        self.deadline = Some(duration);
        self
    }
}

fn make_graph(specs: Vec<TaskSpec>, edges: &[(&str, &str, &str)]) -> TaskGraph {
    let mut tasks: BTreeMap<Label, Task> = BTreeMap::new();
    for spec in specs {
        let mut task_definition = json!({});
        if let Some(offset) = spec.deadline {
            task_definition = json!({
                "deadline": (Utc::now() + offset)
                    .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                    .to_string(),
            });
        }
        tasks.insert(
            spec.label.to_string(),
            Task {
                kind: "test".to_string(),
                label: spec.label.to_string(),
                attributes: BTreeMap::new(),
                dependencies: BTreeMap::new(),
                soft_dependencies: BTreeSet::new(),
                if_dependencies: spec
                    .if_dependencies
                    .iter()
                    .map(|d| d.to_string())
                    .collect(),
                optimization: spec
                    .optimization
                    .map(|(name, arg)| [(name.to_string(), arg)].into()),
                task_definition,
                description: None,
                task_id: None,
            },
        );
    }

    let mut edge_set = Vec::new();
    for (from, to, name) in edges {
        edge_set.push((from.to_string(), to.to_string(), name.to_string()));
        if let Some(task) = tasks.get_mut(&from.to_string()) {
            task.dependencies.insert(name.to_string(), to.to_string());
        }
    }

    let graph = Graph::new(tasks.keys().cloned(), edge_set);
    TaskGraph::new(tasks, graph)
}

/// Triangle: t2 depends on t1, t3 depends on both.
fn triangle(
    t1: Option<(&'static str, Value)>,
    t2: Option<(&'static str, Value)>,
    t3: Option<(&'static str, Value)>,
) -> TaskGraph {
    let mut specs = vec![task("t1"), task("t2"), task("t3")];
    for (spec, opt) in specs.iter_mut().zip([t1, t2, t3]) {
        spec.optimization = opt;
    }
    make_graph(
        specs,
        &[("t3", "t2", "dep"), ("t3", "t1", "dep2"), ("t2", "t1", "dep")],
    )
}

struct Run {
    surviving: BTreeSet<Label>,
    label_to_taskid: BTreeMap<Label, String>,
    graph: TaskGraph,
    log_actions: BTreeMap<Label, String>,
}

fn optimize(graph: &TaskGraph, params: &Parameters, do_not_optimize: &[&str]) -> TestResult2<Run> {
    optimize_with(graph, params, do_not_optimize, &BTreeMap::new())
}

type TestResult2<T> = Result<T, Box<dyn Error>>;

fn optimize_with(
    graph: &TaskGraph,
    params: &Parameters,
    do_not_optimize: &[&str],
    existing_tasks: &BTreeMap<Label, String>,
) -> TestResult2<Run> {
    let client = StaticPlatformClient::default();
    let do_not_optimize: BTreeSet<Label> =
        do_not_optimize.iter().map(|l| l.to_string()).collect();
    let strategies = strategies();
    let inputs = OptimizeInputs {
        params,
        do_not_optimize: &do_not_optimize,
        existing_tasks,
        strategies: &strategies,
        client: &client,
        decision_task_id: "DECISION-TASK",
    };
    let (optimized, label_to_taskid, log) = optimize_task_graph(graph, &inputs)?;
    Ok(Run {
        surviving: optimized.tasks.keys().cloned().collect(),
        label_to_taskid,
        log_actions: log
            .into_iter()
            .map(|r| (r.label, r.action))
            .collect(),
        graph: optimized,
    })
}

fn set(items: &[&str]) -> BTreeSet<Label> {
    items.iter().map(|s| s.to_string()).collect()
}

// -- removal -----------------------------------------------------------------

#[test]
fn nothing_is_removed_without_strategies() -> TestResult {
    let graph = triangle(None, None, None);
    let run = optimize(&graph, &params(), &[])?;
    assert_eq!(run.surviving, set(&["t1", "t2", "t3"]));
    Ok(())
}

#[test]
fn remove_strategy_removes_everything() -> TestResult {
    let remove = Some(("remove", Value::Null));
    let graph = triangle(remove.clone(), remove.clone(), remove);
    let run = optimize(&graph, &params(), &[])?;
    assert!(run.surviving.is_empty());
    Ok(())
}

#[test]
fn removal_is_blocked_by_live_dependents() -> TestResult {
    // t2 has no strategy, so t1 must stay for it.
    let graph = triangle(Some(("remove", Value::Null)), None, Some(("remove", Value::Null)));
    let run = optimize(&graph, &params(), &[])?;
    assert_eq!(run.surviving, set(&["t1", "t2"]));
    Ok(())
}

#[test]
fn do_not_optimize_pins_tasks_and_their_dependencies() -> TestResult {
    let remove = Some(("remove", Value::Null));
    let graph = triangle(remove.clone(), remove.clone(), remove);
    let run = optimize(&graph, &params(), &["t2"])?;
    assert_eq!(run.surviving, set(&["t1", "t2"]));
    assert_eq!(run.log_actions["t2"], "kept");
    Ok(())
}

// -- if-dependencies ---------------------------------------------------------

#[test]
fn if_dependency_task_follows_its_primaries_down() -> TestResult {
    // t3 only exists to post-process t1/t2; when both go, so does it.
    let graph = make_graph(
        vec![
            task("t1").opt("remove", Value::Null),
            task("t2").opt("remove", Value::Null),
            task("t3").if_deps(&["t1", "t2"]),
            task("t4").if_deps(&["t1"]),
        ],
        &[
            ("t3", "t2", "dep"),
            ("t3", "t1", "dep2"),
            ("t2", "t1", "dep"),
            ("t4", "t1", "dep3"),
        ],
    );
    let run = optimize(&graph, &params(), &[])?;
    assert!(run.surviving.is_empty());
    Ok(())
}

#[test]
fn if_dependency_task_is_kept_while_any_primary_survives() -> TestResult {
    let graph = make_graph(
        vec![
            task("t1"),
            task("t2").opt("remove", Value::Null),
            task("t3").if_deps(&["t1", "t2"]),
            task("t4").if_deps(&["t1"]),
        ],
        &[
            ("t3", "t2", "dep"),
            ("t3", "t1", "dep2"),
            ("t2", "t1", "dep"),
            ("t4", "t1", "dep3"),
        ],
    );
    let run = optimize(&graph, &params(), &[])?;
    // t3 survives because t1 does, which in turn pins t2 (a real
    // dependency of t3) in place.
    assert_eq!(run.surviving, set(&["t1", "t2", "t3", "t4"]));
    Ok(())
}

#[test]
fn if_dependency_chain_collapses_to_fixpoint() -> TestResult {
    // a -> b -> c, a if-depends on b, b if-depends on c: removing c takes
    // down the whole chain.
    let graph = make_graph(
        vec![
            task("a").if_deps(&["b"]),
            task("b").if_deps(&["c"]),
            task("c").opt("remove", Value::Null),
        ],
        &[("a", "b", "e1"), ("b", "c", "e2")],
    );
    let run = optimize(&graph, &params(), &[])?;
    assert!(run.surviving.is_empty());
    Ok(())
}

#[test]
fn ancestor_does_not_keep_an_if_dependency_task() -> TestResult {
    let graph = make_graph(
        vec![
            task("t1"),
            task("t2").opt("remove", Value::Null),
            task("t3").if_deps(&["t2"]),
        ],
        &[("t3", "t2", "dep"), ("t2", "t1", "dep2")],
    );
    let run = optimize(&graph, &params(), &[])?;
    assert_eq!(run.surviving, set(&["t1"]));
    Ok(())
}

// -- replacement -------------------------------------------------------------

#[test]
fn replacement_rewrites_downstream_dependencies() -> TestResult {
    let graph = triangle(Some(("replace", json!("e1"))), None, None);
    let run = optimize(&graph, &params(), &[])?;
    assert_eq!(run.surviving, set(&["t2", "t3"]));
    assert_eq!(run.label_to_taskid["t1"], "e1");
    assert_eq!(run.graph.tasks["t2"].dependencies["dep"], "e1");

    // The wire format's dependency list carries the replacement id too.
    let wire_deps = run.graph.tasks["t2"].task_definition["dependencies"]
        .as_array()
        .expect("wire dependencies")
        .clone();
    assert!(wire_deps.contains(&json!("e1")));
    Ok(())
}

#[test]
fn replacement_is_blocked_by_unreplaced_dependencies() -> TestResult {
    let graph = triangle(Some(("replace", json!("e1"))), None, Some(("replace", json!("e3"))));
    let run = optimize(&graph, &params(), &[])?;
    assert_eq!(run.label_to_taskid.get("t1"), Some(&"e1".to_string()));
    // t3 depends on t2, which still runs, so t3 cannot be substituted.
    assert!(run.surviving.contains("t3"));
    Ok(())
}

#[test]
fn replace_with_nothing_removes_the_task() -> TestResult {
    let graph = triangle(
        Some(("replace", json!("e1"))),
        Some(("replace", Value::Null)),
        Some(("replace", Value::Null)),
    );
    let run = optimize(&graph, &params(), &[])?;
    assert!(run.surviving.is_empty());
    assert_eq!(run.label_to_taskid.get("t1"), Some(&"e1".to_string()));
    Ok(())
}

#[test]
fn replacement_honors_dependent_deadlines() -> TestResult {
    // t1's replacement expires in one day; t2's deadline is two days out.
    let graph = make_graph(
        vec![
            task("t1").opt("replace", json!("e1")),
            task("t2").deadline_in(Duration::days(2)),
            task("t3").deadline_in(Duration::minutes(1)),
        ],
        &[("t2", "t1", "dep1"), ("t3", "t1", "dep2")],
    );
    let run = optimize(&graph, &params(), &[])?;
    assert_eq!(run.surviving, set(&["t1", "t2", "t3"]));
    assert!(run.label_to_taskid.get("t1").is_none() || run.label_to_taskid["t1"] != "e1");
    Ok(())
}

#[test]
fn existing_tasks_seed_replacements() -> TestResult {
    let graph = triangle(None, None, None);
    let existing: BTreeMap<Label, String> = [("t1".to_string(), "SEEDED".to_string())].into();
    let run = optimize_with(&graph, &params(), &[], &existing)?;
    assert_eq!(run.surviving, set(&["t2", "t3"]));
    assert_eq!(run.graph.tasks["t2"].dependencies["dep"], "SEEDED");
    Ok(())
}

#[test]
fn existing_tasks_win_over_removal_strategies() -> TestResult {
    // t1 both carries a removal strategy and is pre-seeded; the seed is
    // decided first, so t1 is replaced rather than removed and downstream
    // edges still resolve.
    let graph = triangle(Some(("remove", Value::Null)), None, None);
    let existing: BTreeMap<Label, String> = [("t1".to_string(), "SEEDED".to_string())].into();
    let run = optimize_with(&graph, &params(), &[], &existing)?;
    assert_eq!(run.surviving, set(&["t2", "t3"]));
    assert_eq!(run.label_to_taskid["t1"], "SEEDED");
    assert_eq!(run.graph.tasks["t2"].dependencies["dep"], "SEEDED");
    assert_eq!(run.log_actions["t1"], "replaced");
    Ok(())
}

// -- soundness, determinism, round-trip --------------------------------------

#[test]
fn surviving_tasks_never_depend_on_removed_labels() -> TestResult {
    let graph = triangle(None, None, Some(("remove", Value::Null)));
    let run = optimize(&graph, &params(), &[])?;
    assert_eq!(run.surviving, set(&["t1", "t2"]));
    for task in run.graph.tasks.values() {
        for dep in task.dependencies.values() {
            assert!(
                run.graph.tasks.contains_key(dep) || run.label_to_taskid.values().any(|id| id == dep),
                "task '{}' depends on vanished '{dep}'",
                task.label
            );
        }
    }
    Ok(())
}

#[test]
fn optimization_decisions_are_deterministic() -> TestResult {
    let graph = make_graph(
        vec![
            task("a").opt("remove", Value::Null),
            task("b").opt("replace", json!("e-b")),
            task("c"),
            task("d").if_deps(&["a"]),
        ],
        &[("c", "b", "dep"), ("d", "a", "dep")],
    );
    let p = params();
    let first = optimize(&graph, &p, &[])?;
    let second = optimize(&graph, &p, &[])?;

    assert_eq!(first.surviving, second.surviving);
    assert_eq!(first.log_actions, second.log_actions);
    assert_eq!(
        first.label_to_taskid.get("b"),
        second.label_to_taskid.get("b")
    );
    Ok(())
}

#[test]
fn optimized_graph_round_trips_through_json() -> TestResult {
    let graph = triangle(Some(("replace", json!("e1"))), None, None);
    let run = optimize(&graph, &params(), &[])?;

    let json = run.graph.to_json()?;
    let parsed = TaskGraph::from_json(&json)?;
    assert_eq!(parsed, run.graph);
    Ok(())
}

// -- skip-unless-changed (scenario S4) ---------------------------------------

#[test]
fn skip_unless_changed_consults_files_changed() -> TestResult {
    let mut values = BTreeMap::new();
    values.insert("files_changed".to_string(), json!(["docs/index.md"]));
    let params = Parameters::new(values, &[], false)?;

    let mut strategies = strategies();
    strategies.insert(
        "skip-unless-changed".to_string(),
        Arc::new(taskdag::optimize::strategies::SkipUnlessChanged),
    );

    let graph = make_graph(
        vec![
            task("src-task").opt("skip-unless-changed", json!(["src/**"])),
            task("docs-task").opt("skip-unless-changed", json!(["docs/**"])),
        ],
        &[],
    );

    let client = StaticPlatformClient::default();
    let inputs = OptimizeInputs {
        params: &params,
        do_not_optimize: &BTreeSet::new(),
        existing_tasks: &BTreeMap::new(),
        strategies: &strategies,
        client: &client,
        decision_task_id: "DECISION-TASK",
    };
    let (optimized, _, _) = optimize_task_graph(&graph, &inputs)?;
    assert_eq!(
        optimized.tasks.keys().cloned().collect::<BTreeSet<_>>(),
        set(&["docs-task"])
    );
    Ok(())
}

// -- index-search with a stubbed platform ------------------------------------

#[test]
fn index_search_uses_batched_platform_answers() -> TestResult {
    let mut strategies = strategies();
    strategies.insert(
        "index-search".to_string(),
        Arc::new(taskdag::optimize::strategies::IndexSearch),
    );

    let graph = make_graph(
        vec![
            task("cached").opt("index-search", json!(["demo.cache.hit"])),
            task("consumer").deadline_in(Duration::hours(1)),
        ],
        &[("consumer", "cached", "parent")],
    );

    let client = StaticPlatformClient::new(
        [("demo.cache.hit".to_string(), "CACHED-ID".to_string())].into(),
        [(
            "CACHED-ID".to_string(),
            TaskStatus {
                state: "completed".to_string(),
                expires: "2099-01-01T00:00:00.000Z".to_string(),
            },
        )]
        .into(),
    );

    let p = params();
    let inputs = OptimizeInputs {
        params: &p,
        do_not_optimize: &BTreeSet::new(),
        existing_tasks: &BTreeMap::new(),
        strategies: &strategies,
        client: &client,
        decision_task_id: "DECISION-TASK",
    };
    let (optimized, label_to_taskid, _) = optimize_task_graph(&graph, &inputs)?;

    assert_eq!(
        optimized.tasks.keys().cloned().collect::<BTreeSet<_>>(),
        set(&["consumer"])
    );
    assert_eq!(label_to_taskid["cached"], "CACHED-ID");
    assert_eq!(
        optimized.tasks["consumer"].dependencies["parent"],
        "CACHED-ID"
    );
    Ok(())
}
