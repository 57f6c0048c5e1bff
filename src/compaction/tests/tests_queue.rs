use std::collections::VecDeque;

use crate::compaction::tests::{queue_priorities, task};
use crate::compaction::{Priority, QueueState};

fn empty_queue() -> QueueState {
    QueueState {
        tasks: VecDeque::new(),
        busy_levels: Vec::new(),
        busy_memtables: Vec::new(),
        shutdown: false,
    }
}

#[test]
fn priorities_are_totally_ordered() {
    assert!(Priority::Low < Priority::Normal);
    assert!(Priority::Normal < Priority::High);
    assert!(Priority::High < Priority::Urgent);
}

#[test]
fn insert_into_empty_queue() {
    let mut queue = empty_queue();
    queue.insert(task(1, Priority::Normal));
    assert_eq!(queue_priorities(&queue), vec![Priority::Normal]);
}

#[test]
fn higher_priority_takes_the_head() {
    let mut queue = empty_queue();
    queue.insert(task(1, Priority::Normal));
    queue.insert(task(2, Priority::Urgent));
    assert_eq!(
        queue_priorities(&queue),
        vec![Priority::Urgent, Priority::Normal]
    );
}

#[test]
fn equal_priority_queues_behind_the_head() {
    let mut queue = empty_queue();
    queue.insert(task(1, Priority::Normal));
    queue.insert(task(2, Priority::Normal));
    let ids: Vec<u64> = queue.tasks.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![1, 2], "FIFO among equals");
}

#[test]
fn insert_lands_before_first_strictly_lower_successor() {
    let mut queue = empty_queue();
    queue.insert(task(1, Priority::Urgent));
    queue.insert(task(2, Priority::High));
    queue.insert(task(3, Priority::Low));
    // Normal outranks Low but not High: it must slot between them.
    queue.insert(task(4, Priority::Normal));

    assert_eq!(
        queue_priorities(&queue),
        vec![
            Priority::Urgent,
            Priority::High,
            Priority::Normal,
            Priority::Low
        ]
    );
}

#[test]
fn lowest_priority_appends_at_tail() {
    let mut queue = empty_queue();
    queue.insert(task(1, Priority::High));
    queue.insert(task(2, Priority::Normal));
    queue.insert(task(3, Priority::Low));
    assert_eq!(
        queue_priorities(&queue),
        vec![Priority::High, Priority::Normal, Priority::Low]
    );
}

#[test]
fn mixed_sequence_stays_sorted_by_priority() {
    let mut queue = empty_queue();
    for (id, priority) in [
        (1, Priority::Low),
        (2, Priority::Urgent),
        (3, Priority::Normal),
        (4, Priority::High),
        (5, Priority::Normal),
        (6, Priority::Urgent),
    ] {
        queue.insert(task(id, priority));
    }

    let priorities = queue_priorities(&queue);
    let mut sorted = priorities.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(priorities, sorted, "queue must stay priority-sorted");
}
