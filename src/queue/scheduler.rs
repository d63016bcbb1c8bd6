//! Deterministic issue ordering and claim selection.
//!
//! Order is phase ascending (missing phase last), then priority ascending
//! (missing priority last), then creation time ascending. Ids unknown to the
//! cache sort after every known issue. Sorting is stable, so ties keep queue
//! insertion order.

use super::Queue;
use crate::issue::{Issue, IssueCache};
use crate::worker::WorkerSlot;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Compare two optional keys with `None` ordered after every `Some`.
fn cmp_present_first<T: Ord>(a: &Option<T>, b: &Option<T>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn compare_issues(a: &Issue, b: &Issue) -> Ordering {
    cmp_present_first(&a.phase, &b.phase)
        .then_with(|| cmp_present_first(&a.priority, &b.priority))
        .then_with(|| cmp_present_first(&a.created_at, &b.created_at))
}

fn compare_ids(a: &str, b: &str, cache: &IssueCache) -> Ordering {
    match (cache.get(a), cache.get(b)) {
        (Some(x), Some(y)) => compare_issues(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Queue ids in scheduling order.
pub fn sorted_ids<'a>(queue: &'a Queue, cache: &IssueCache) -> Vec<&'a str> {
    let mut ids: Vec<&str> = queue.ids().iter().map(String::as_str).collect();
    ids.sort_by(|a, b| compare_ids(a, b, cache));
    ids
}

/// Next issue for `worker_id`, skipping issues held by any other worker.
///
/// Pure: the caller must record the claim in the same critical section as
/// this call.
pub fn pick_next(
    queue: &Queue,
    cache: &IssueCache,
    workers: &[WorkerSlot],
    worker_id: usize,
) -> Option<String> {
    let active: HashSet<&str> = workers
        .iter()
        .filter(|w| w.id != worker_id)
        .filter_map(|w| w.issue_id.as_deref())
        .collect();

    sorted_ids(queue, cache)
        .into_iter()
        .find(|id| !active.contains(id))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn issue(id: &str, phase: Option<u32>, priority: Option<u32>, created: i64) -> Issue {
        let mut i = Issue::new(id, id).with_created_at(at(created));
        i.phase = phase;
        i.priority = priority;
        i
    }

    fn busy(id: usize, issue: &str) -> WorkerSlot {
        let mut w = WorkerSlot::new(id);
        w.issue_id = Some(issue.to_string());
        w
    }

    #[test]
    fn test_phase_then_priority_then_age() {
        let cache = IssueCache::from_issues([
            issue("no-phase", None, Some(0), 0),
            issue("p2", Some(2), Some(0), 0),
            issue("p1-low", Some(1), Some(3), 0),
            issue("p1-high-new", Some(1), Some(0), 50),
            issue("p1-high-old", Some(1), Some(0), 10),
        ]);
        let queue: Queue = ["no-phase", "p2", "p1-low", "p1-high-new", "p1-high-old"]
            .into_iter()
            .collect();
        assert_eq!(
            sorted_ids(&queue, &cache),
            vec!["p1-high-old", "p1-high-new", "p1-low", "p2", "no-phase"]
        );
    }

    #[test]
    fn test_sort_is_idempotent_and_stable() {
        let cache = IssueCache::from_issues([
            issue("b", None, Some(1), 5),
            issue("a", None, Some(1), 5),
            issue("c", None, None, 5),
        ]);
        let queue: Queue = ["b", "c", "a"].into_iter().collect();
        let once = sorted_ids(&queue, &cache);
        assert_eq!(once, vec!["b", "a", "c"]);

        let resorted: Queue = once.iter().copied().collect();
        assert_eq!(sorted_ids(&resorted, &cache), once);
    }

    #[test]
    fn test_comparator_is_total() {
        let issues = [
            issue("a", Some(1), None, 1),
            issue("b", None, Some(0), 2),
            issue("c", Some(1), Some(2), 3),
            issue("d", None, None, 0),
        ];
        for x in &issues {
            assert_eq!(compare_issues(x, x), Ordering::Equal);
            for y in &issues {
                assert_eq!(compare_issues(x, y), compare_issues(y, x).reverse());
            }
        }
    }

    #[test]
    fn test_unknown_ids_sort_last() {
        let cache = IssueCache::from_issues([issue("known", None, None, 0)]);
        let queue: Queue = ["ghost", "known"].into_iter().collect();
        assert_eq!(sorted_ids(&queue, &cache), vec!["known", "ghost"]);
    }

    #[test]
    fn test_pick_next_prefers_higher_priority() {
        let cache = IssueCache::from_issues([
            issue("I2", None, Some(1), 0),
            issue("I1", None, Some(0), 0),
        ]);
        let queue: Queue = ["I2", "I1"].into_iter().collect();
        let workers = vec![WorkerSlot::new(0)];
        assert_eq!(pick_next(&queue, &cache, &workers, 0).as_deref(), Some("I1"));
    }

    #[test]
    fn test_pick_next_never_returns_other_workers_issue() {
        let cache = IssueCache::from_issues([
            issue("I1", None, Some(0), 0),
            issue("I2", None, Some(1), 0),
            issue("I3", None, Some(2), 0),
        ]);
        let queue: Queue = ["I1", "I2", "I3"].into_iter().collect();

        let workers = vec![busy(0, "I1"), busy(1, "I2"), WorkerSlot::new(2)];
        assert_eq!(pick_next(&queue, &cache, &workers, 2).as_deref(), Some("I3"));

        // A worker's own current issue is not excluded.
        assert_eq!(pick_next(&queue, &cache, &workers, 0).as_deref(), Some("I1"));

        let all_busy = vec![busy(0, "I1"), busy(1, "I2"), busy(2, "I3"), WorkerSlot::new(3)];
        assert_eq!(pick_next(&queue, &cache, &all_busy, 3), None);
    }

    #[test]
    fn test_pick_next_exhaustive_no_double_claim() {
        let ids = ["a", "b", "c", "d"];
        let cache = IssueCache::from_issues(
            ids.iter().enumerate().map(|(n, id)| issue(id, None, Some(n as u32 % 2), n as i64)),
        );
        let queue: Queue = ids.into_iter().collect();
        // Every assignment of issues (or none) to three other workers.
        for mask in 0..(5u32.pow(3)) {
            let mut workers = vec![WorkerSlot::new(0)];
            let mut m = mask;
            for w in 1..=3 {
                let pick = (m % 5) as usize;
                m /= 5;
                let mut slot = WorkerSlot::new(w);
                if pick < ids.len() {
                    slot.issue_id = Some(ids[pick].to_string());
                }
                workers.push(slot);
            }
            if let Some(next) = pick_next(&queue, &cache, &workers, 0) {
                assert!(workers[1..].iter().all(|w| w.issue_id.as_deref() != Some(next.as_str())));
            }
        }
    }
}
