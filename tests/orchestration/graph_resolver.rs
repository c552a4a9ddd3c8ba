use crate::common::*;
use colonies_core::models::{Process, ProcessGraph};
use colonies_core::orchestration::GraphResolver;
use colonies_core::{ColoniesResult, ProcessState};
use sqlx::PgPool;

async fn submit_chain(pool: &PgPool) -> ColoniesResult<(ProcessGraph, Vec<Process>)> {
    ProcessGraph::submit(
        pool,
        COLONY,
        vec![
            spec().with_node("extract", &[]),
            spec().with_node("transform", &["extract"]),
            spec().with_node("load", &["transform"]),
        ],
    )
    .await
}

fn id_of(processes: &[Process], node: &str) -> String {
    processes
        .iter()
        .find(|p| p.spec.node_name == node)
        .map(|p| p.process_id.clone())
        .expect("node not submitted")
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_resolve_releases_children_and_tracks_state(pool: PgPool) -> ColoniesResult<()> {
    let (graph, processes) = submit_chain(&pool).await?;
    let graph_id = &graph.process_graph_id;
    let resolver = GraphResolver::with_pool(pool.clone());

    let (_, arena) = resolver.load(graph_id).await?;
    assert_eq!(arena.len(), 3);
    assert_eq!(arena.depth(&id_of(&processes, "load")), Some(2));
    assert_eq!(arena.leaves().len(), 1);

    assert_eq!(resolver.resolve(graph_id).await?, ProcessState::Waiting);

    let mut extract = Process::find_by_id(&pool, &id_of(&processes, "extract")).await?.expect("extract");
    extract.assign(&pool, "executor_1").await?;
    assert_eq!(resolver.resolve(graph_id).await?, ProcessState::Running);
    let running = ProcessGraph::find_by_id(&pool, graph_id).await?.expect("graph");
    assert!(running.start_time.is_some());

    Process::mark_successful(&pool, &extract.process_id).await?;
    resolver.resolve(graph_id).await?;
    let transform = Process::find_by_id(&pool, &id_of(&processes, "transform")).await?.expect("transform");
    let load = Process::find_by_id(&pool, &id_of(&processes, "load")).await?.expect("load");
    assert!(!transform.wait_for_parents);
    assert!(load.wait_for_parents);

    for node in ["transform", "load"] {
        let mut process = Process::find_by_id(&pool, &id_of(&processes, node)).await?.expect(node);
        Process::set_wait_for_parents(&pool, &process.process_id, false).await?;
        process.assign(&pool, "executor_1").await?;
        Process::mark_successful(&pool, &process.process_id).await?;
    }

    assert_eq!(resolver.resolve(graph_id).await?, ProcessState::Success);
    let done = ProcessGraph::find_by_id(&pool, graph_id).await?.expect("graph");
    assert_eq!(done.state, ProcessState::Success);
    assert!(done.end_time.is_some());
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_resolve_cascades_failure(pool: PgPool) -> ColoniesResult<()> {
    let (graph, processes) = submit_chain(&pool).await?;
    let resolver = GraphResolver::with_pool(pool.clone());

    let mut extract = Process::find_by_id(&pool, &id_of(&processes, "extract")).await?.expect("extract");
    extract.assign(&pool, "executor_1").await?;
    Process::mark_failed(&pool, &extract.process_id, vec!["disk full".to_string()]).await?;

    assert_eq!(resolver.resolve(&graph.process_graph_id).await?, ProcessState::Failed);
    for process in Process::list_by_process_graph(&pool, &graph.process_graph_id).await? {
        assert_eq!(process.state, ProcessState::Failed);
    }
    let failed = ProcessGraph::find_by_id(&pool, &graph.process_graph_id).await?.expect("graph");
    assert_eq!(failed.state, ProcessState::Failed);

    assert!(resolver.resolve("missing").await.unwrap_err().is_not_found());
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_graph_state_only_moves_forward(pool: PgPool) -> ColoniesResult<()> {
    let (graph, processes) = submit_chain(&pool).await?;
    let graph_id = &graph.process_graph_id;
    let resolver = GraphResolver::with_pool(pool.clone());

    let mut extract = Process::find_by_id(&pool, &id_of(&processes, "extract")).await?.expect("extract");
    extract.assign(&pool, "executor_1").await?;
    assert_eq!(resolver.resolve(graph_id).await?, ProcessState::Running);
    let started = ProcessGraph::find_by_id(&pool, graph_id).await?.expect("graph").start_time;
    assert!(started.is_some());

    // Requeueing the root keeps the graph running
    extract.unassign(&pool).await?;
    assert_eq!(resolver.resolve(graph_id).await?, ProcessState::Running);

    // Reassigning it does not stamp a second start time
    extract.assign(&pool, "executor_2").await?;
    assert_eq!(resolver.resolve(graph_id).await?, ProcessState::Running);
    let graph_row = ProcessGraph::find_by_id(&pool, graph_id).await?.expect("graph");
    assert_eq!(graph_row.state, ProcessState::Running);
    assert_eq!(graph_row.start_time, started);

    // A graph failed from outside is never revived
    ProcessGraph::set_state(&pool, graph_id, ProcessState::Failed).await?;
    assert_eq!(resolver.resolve(graph_id).await?, ProcessState::Failed);
    let failed = ProcessGraph::find_by_id(&pool, graph_id).await?.expect("graph");
    assert_eq!(failed.state, ProcessState::Failed);
    Ok(())
}
