//! Process Graph Tests
//!
//! Submission, state stamping and cascading deletion of process graphs.

use crate::common::*;
use colonies_core::models::{Attribute, NewProcessGraph, Process, ProcessGraph};
use colonies_core::{ColoniesError, ColoniesResult, ProcessState};
use sqlx::PgPool;

/// a -> {b, c} -> d
async fn submit_diamond(pool: &PgPool) -> ColoniesResult<(ProcessGraph, Vec<Process>)> {
    ProcessGraph::submit(
        pool,
        COLONY,
        vec![
            spec().with_node("a", &[]).with_env("STAGE", "a"),
            spec().with_node("b", &["a"]).with_env("STAGE", "b"),
            spec().with_node("c", &["a"]),
            spec().with_node("d", &["b", "c"]),
        ],
    )
    .await
}

fn by_node<'a>(processes: &'a [Process], node: &str) -> &'a Process {
    processes
        .iter()
        .find(|p| p.spec.node_name == node)
        .expect("node not submitted")
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_submit_wires_parents_and_children(pool: PgPool) -> ColoniesResult<()> {
    let (graph, processes) = submit_diamond(&pool).await?;
    assert_eq!(processes.len(), 4);
    assert_eq!(graph.state, ProcessState::Waiting);

    let a = by_node(&processes, "a");
    let b = by_node(&processes, "b");
    let c = by_node(&processes, "c");
    let d = by_node(&processes, "d");

    assert_eq!(graph.root_process_ids, vec![a.process_id.clone()]);
    assert!(!a.wait_for_parents);
    assert!(a.parents.is_empty());
    assert_eq!(a.children.len(), 2);
    assert!(a.children.contains(&b.process_id) && a.children.contains(&c.process_id));

    assert!(b.wait_for_parents);
    assert_eq!(b.parents, vec![a.process_id.clone()]);
    assert_eq!(b.children, vec![d.process_id.clone()]);

    assert!(d.wait_for_parents);
    assert_eq!(d.parents, vec![b.process_id.clone(), c.process_id.clone()]);
    assert!(d.children.is_empty());

    for process in &processes {
        assert_eq!(process.process_graph_id, graph.process_graph_id);
    }
    let members = Process::list_by_process_graph(&pool, &graph.process_graph_id).await?;
    assert_eq!(members.len(), 4);
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_submit_rejects_invalid_graphs(pool: PgPool) -> ColoniesResult<()> {
    let cycle = ProcessGraph::submit(
        &pool,
        COLONY,
        vec![
            spec().with_node("root", &[]),
            spec().with_node("x", &["root", "y"]),
            spec().with_node("y", &["x"]),
        ],
    )
    .await
    .unwrap_err();
    assert!(matches!(cycle, ColoniesError::Validation(_)));

    let foreign = ProcessGraph::submit(&pool, COLONY, vec![spec().with_node("x", &["ghost"])])
        .await
        .unwrap_err();
    assert!(matches!(foreign, ColoniesError::Validation(_)));

    let duplicate = ProcessGraph::submit(
        &pool,
        COLONY,
        vec![spec().with_node("x", &[]), spec().with_node("x", &[])],
    )
    .await
    .unwrap_err();
    assert!(matches!(duplicate, ColoniesError::Validation(_)));

    let unnamed = ProcessGraph::submit(&pool, COLONY, vec![spec()]).await.unwrap_err();
    assert!(matches!(unnamed, ColoniesError::Validation(_)));

    // Nothing was written by the failed submissions
    assert_eq!(ProcessGraph::count(&pool).await?, 0);
    assert_eq!(Process::count(&pool).await?, 0);
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_set_state_stamps_times(pool: PgPool) -> ColoniesResult<()> {
    let graph = ProcessGraph::create(&pool, NewProcessGraph::new(COLONY, vec![])).await?;
    let id = &graph.process_graph_id;
    assert!(graph.start_time.is_none());

    ProcessGraph::set_state(&pool, id, ProcessState::Running).await?;
    let running = ProcessGraph::find_by_id(&pool, id).await?.expect("Graph not found");
    assert_eq!(running.state, ProcessState::Running);
    assert!(running.start_time.is_some());
    assert!(running.end_time.is_none());

    ProcessGraph::set_state(&pool, id, ProcessState::Success).await?;
    let done = ProcessGraph::find_by_id(&pool, id).await?.expect("Graph not found");
    assert_eq!(done.state, ProcessState::Success);
    assert_eq!(done.start_time, running.start_time);
    assert!(done.end_time.is_some());

    let found = ProcessGraph::find_by_state(&pool, COLONY, ProcessState::Success, 10).await?;
    assert_eq!(found.len(), 1);
    assert_eq!(ProcessGraph::count_by_state(&pool, ProcessState::Success).await?, 1);
    assert_eq!(
        ProcessGraph::count_by_colony_and_state(&pool, COLONY, ProcessState::Waiting).await?,
        0
    );

    let err = ProcessGraph::set_state(&pool, "missing", ProcessState::Running).await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_delete_cascades_to_members_only(pool: PgPool) -> ColoniesResult<()> {
    let (graph, processes) = submit_diamond(&pool).await?;
    let (other_graph, _) = submit_diamond(&pool).await?;
    let stand_alone = submit(&pool, spec().with_env("KEEP", "1")).await?;

    let counts = ProcessGraph::delete(&pool, &graph.process_graph_id).await?;
    assert_eq!(counts.graphs, 1);
    assert_eq!(counts.processes, 4);

    for process in &processes {
        assert!(Process::find_by_id(&pool, &process.process_id).await?.is_none());
        assert!(Attribute::find_by_target(&pool, &process.process_id).await?.is_empty());
    }
    assert!(ProcessGraph::find_by_id(&pool, &graph.process_graph_id).await?.is_none());

    assert_eq!(
        Process::list_by_process_graph(&pool, &other_graph.process_graph_id).await?.len(),
        4
    );
    assert!(Process::find_by_id(&pool, &stand_alone.process_id).await?.is_some());
    assert_eq!(Attribute::find_by_target(&pool, &stand_alone.process_id).await?.len(), 1);
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_delete_all_by_colony_with_state(pool: PgPool) -> ColoniesResult<()> {
    let (finished, _) = submit_diamond(&pool).await?;
    let (active, _) = submit_diamond(&pool).await?;
    ProcessGraph::set_state(&pool, &finished.process_graph_id, ProcessState::Success).await?;

    let counts =
        ProcessGraph::delete_all_by_colony(&pool, COLONY, Some(ProcessState::Success)).await?;
    assert_eq!(counts.graphs, 1);
    assert_eq!(counts.processes, 4);
    assert!(ProcessGraph::find_by_id(&pool, &active.process_graph_id).await?.is_some());

    let counts = ProcessGraph::delete_all_by_colony(&pool, COLONY, None).await?;
    assert_eq!(counts.graphs, 1);
    assert_eq!(Process::count(&pool).await?, 0);
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_in_graph_process_deletion_by_colony(pool: PgPool) -> ColoniesResult<()> {
    let (graph, processes) = submit_diamond(&pool).await?;
    let stand_alone = submit_default(&pool).await?;
    let root = by_node(&processes, "a");
    Process::mark_failed(&pool, &root.process_id, vec![]).await?;

    let deleted = Process::delete_all_in_process_graphs_by_colony(
        &pool,
        COLONY,
        Some(ProcessState::Failed),
    )
    .await?;
    assert_eq!(deleted, 1);

    let deleted = Process::delete_all_in_process_graphs_by_colony(&pool, COLONY, None).await?;
    assert_eq!(deleted, 3);
    assert!(Process::list_by_process_graph(&pool, &graph.process_graph_id).await?.is_empty());
    assert!(Process::find_by_id(&pool, &stand_alone.process_id).await?.is_some());

    // Stand-alone deletion leaves graph members alone
    let (graph, _) = submit_diamond(&pool).await?;
    assert_eq!(Process::delete_all_by_colony(&pool, COLONY, None).await?, 1);
    assert_eq!(Process::list_by_process_graph(&pool, &graph.process_graph_id).await?.len(), 4);
    assert_eq!(Process::delete_all_by_process_graph(&pool, &graph.process_graph_id).await?, 4);
    Ok(())
}
