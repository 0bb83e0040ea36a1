use stagecuter::{ConfigError, Edge, PipelineSpec, TaskGraph, TaskNode};

fn names(graph: &TaskGraph) -> Vec<&str> {
    graph.topological_order().into_iter().map(|n| n.name()).collect()
}

#[test]
fn builds_linear_chain_from_edges() {
    let graph = TaskGraph::build(
        "p",
        vec![
            TaskNode::new("c", "echo c"),
            TaskNode::new("b", "echo b"),
            TaskNode::new("a", "echo a"),
        ],
        vec![Edge::new("a", "b"), Edge::new("b", "c")],
    )
    .expect("valid graph");

    assert_eq!(names(&graph), vec!["a", "b", "c"]);
    assert_eq!(graph.dependencies_of("c"), ["b".to_string()]);
    assert_eq!(graph.dependents_of("a"), ["b".to_string()]);
    assert_eq!(graph.roots().len(), 1);
}

#[test]
fn edges_and_node_dependencies_are_merged() {
    let graph = TaskGraph::build(
        "p",
        vec![
            TaskNode::new("a", "echo a"),
            TaskNode::new("b", "echo b"),
            TaskNode::new("c", "echo c").after("a"),
        ],
        vec![Edge::new("b", "c"), Edge::new("a", "c")],
    )
    .expect("valid graph");

    let deps = graph.dependencies_of("c");
    assert_eq!(deps.len(), 2, "duplicate edge must not duplicate the dependency");
    assert!(deps.contains(&"a".to_string()));
    assert!(deps.contains(&"b".to_string()));
}

#[test]
fn independent_tasks_keep_declaration_order() {
    let nodes = vec![
        TaskNode::new("z", "echo z"),
        TaskNode::new("m", "echo m"),
        TaskNode::new("a", "echo a"),
        TaskNode::new("join", "echo join").after("z").after("a"),
    ];

    let first = TaskGraph::build("p", nodes.clone(), vec![]).unwrap();
    let second = TaskGraph::build("p", nodes, vec![]).unwrap();

    assert_eq!(names(&first), vec!["z", "m", "a", "join"]);
    assert_eq!(names(&first), names(&second));
}

#[test]
fn rejects_cycle() {
    let err = TaskGraph::build(
        "p",
        vec![
            TaskNode::new("a", "echo a"),
            TaskNode::new("b", "echo b"),
            TaskNode::new("c", "echo c"),
        ],
        vec![Edge::new("a", "b"), Edge::new("b", "c"), Edge::new("c", "a")],
    )
    .unwrap_err();

    assert!(matches!(err, ConfigError::CycleDetected(_)), "got {err:?}");
}

#[test]
fn rejects_self_dependency() {
    let err = TaskGraph::build("p", vec![TaskNode::new("a", "echo a").after("a")], vec![])
        .unwrap_err();
    assert_eq!(err, ConfigError::CycleDetected("a".to_string()));
}

#[test]
fn rejects_duplicate_task_id() {
    let err = TaskGraph::build(
        "p",
        vec![TaskNode::new("a", "echo 1"), TaskNode::new("a", "echo 2")],
        vec![],
    )
    .unwrap_err();
    assert_eq!(err, ConfigError::DuplicateTask("a".to_string()));
}

#[test]
fn rejects_edge_to_unknown_task() {
    let err = TaskGraph::build(
        "p",
        vec![TaskNode::new("a", "echo a")],
        vec![Edge::new("a", "ghost")],
    )
    .unwrap_err();
    assert_eq!(
        err,
        ConfigError::UnknownTask {
            task: "a".to_string(),
            missing: "ghost".to_string()
        }
    );
}

#[test]
fn rejects_node_dependency_on_unknown_task() {
    let err = TaskGraph::build("p", vec![TaskNode::new("a", "echo a").after("ghost")], vec![])
        .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownTask { ref missing, .. } if missing == "ghost"));
}

#[test]
fn standard_pipeline_is_linear() {
    let graph = PipelineSpec::default().build_graph().expect("pipeline graph");

    assert_eq!(graph.id(), "dbt_transform");
    assert_eq!(
        names(&graph),
        vec![
            "lower_run",
            "lower_test",
            "mid_run",
            "mid_test",
            "upper_run",
            "upper_test",
            "project_test",
            "docs_generate",
        ]
    );
    assert_eq!(
        graph.node("mid_run").unwrap().command(),
        "docker exec dbt_airflow_project-dbt-1 dbt run --models silver"
    );
    assert_eq!(
        graph.node("docs_generate").unwrap().command(),
        "docker exec dbt_airflow_project-dbt-1 dbt docs generate"
    );
    assert_eq!(graph.downstream_of("upper_test").len(), 2);
}

#[test]
fn standard_pipeline_retry_defaults() {
    let graph = PipelineSpec::default().build_graph().unwrap();
    let attempts = |task: &str| graph.node(task).unwrap().retry_budget().max_attempts();

    assert_eq!(attempts("lower_run"), 3);
    assert_eq!(attempts("lower_test"), 2);
    assert_eq!(attempts("project_test"), 1);
    assert_eq!(attempts("docs_generate"), 1);
    assert_eq!(
        graph.node("mid_run").unwrap().retry_budget().delay(),
        std::time::Duration::from_secs(300)
    );
}

#[test]
fn render_shows_chain() {
    let graph = TaskGraph::build(
        "p",
        vec![TaskNode::new("a", "echo a"), TaskNode::new("b", "echo b").after("a")],
        vec![],
    )
    .unwrap();

    assert_eq!(graph.render(), "a\n  └─> b\n");
}
