mod common;
use crate::common::builders;

use std::collections::BTreeSet;

use taskline::dag::{Task, TaskGraph};
use taskline::logging::parse_level_str;

#[test]
fn diamond_levels_and_adjacency() {
    // t0 -> t1, t0 -> t2, (t1, t2) -> t3
    let tasks = builders::dag(&[vec![], vec![0], vec![0], vec![1, 2]], &["main"]);
    let ids: Vec<_> = tasks.iter().map(|t| t.id()).collect();
    let graph = TaskGraph::from_tasks(&tasks);

    assert_eq!(graph.len(), 4);
    assert_eq!(graph.roots(), vec![ids[0]]);
    assert_eq!(graph.dependencies_of(ids[3]), &[ids[1], ids[2]]);
    assert_eq!(graph.dependents_of(ids[0]), &[ids[1], ids[2]]);
    assert_eq!(graph.label_of(ids[2]), Some("t2"));

    assert_eq!(
        graph.levels(),
        vec![vec![ids[0]], vec![ids[1], ids[2]], vec![ids[3]]]
    );

    let expected: BTreeSet<_> = ids[1..].iter().copied().collect();
    assert_eq!(graph.transitive_dependents(ids[0]), expected);
    assert!(graph.transitive_dependents(ids[3]).is_empty());
}

#[test]
fn dependencies_outside_the_set_are_ignored() {
    let outside = Task::new("outside", "main");
    let inside = Task::builder("inside", "main").after(&outside).after(&outside).build();
    let graph = TaskGraph::from_tasks(std::slice::from_ref(&inside));

    assert_eq!(graph.len(), 1);
    assert!(graph.dependencies_of(inside.id()).is_empty());
    assert_eq!(graph.roots(), vec![inside.id()]);
    assert!(graph.label_of(outside.id()).is_none());
    assert_eq!(graph.levels(), vec![vec![inside.id()]]);
}

#[test]
fn duplicate_tasks_are_listed_once() {
    let tasks = builders::chain(&["a", "b"], "main");
    let doubled: Vec<_> = tasks.iter().chain(tasks.iter()).cloned().collect();
    let graph = TaskGraph::from_tasks(&doubled);
    assert_eq!(graph.len(), 2);
    assert_eq!(graph.tasks().collect::<Vec<_>>(), vec![tasks[0].id(), tasks[1].id()]);
}

#[test]
fn empty_graph_has_no_levels() {
    let graph = TaskGraph::from_tasks(&[]);
    assert!(graph.is_empty());
    assert!(graph.levels().is_empty());
    assert!(graph.roots().is_empty());
}

#[test]
fn log_levels_parse_case_insensitively() {
    assert_eq!(parse_level_str(" Debug "), Some(tracing::Level::DEBUG));
    assert_eq!(parse_level_str("warning"), Some(tracing::Level::WARN));
    assert_eq!(parse_level_str("loud"), None);
}
