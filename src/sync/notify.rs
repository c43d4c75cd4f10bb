//! Notification detection — one notification per item's transition into
//! a terminal status.
//!
//! Detects transitions, not arrivals: the detector remembers each task's
//! item statuses from the previous observation and only fires when a
//! status actually changed into `completed` or `failed`. Re-delivering
//! the same task state (which re-sync does on every reconnect) therefore
//! never duplicates a notification.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tasks::model::{ItemStatus, Task, TaskItem};

/// How prominently a notification should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Error,
}

/// A user-facing notification event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

/// Emits notifications for item status transitions into terminal states.
#[derive(Debug, Default)]
pub struct NotificationDetector {
    /// Per task id: the item statuses seen at the previous observation.
    seen: HashMap<u64, HashMap<u64, ItemStatus>>,
}

impl NotificationDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare a task against its previously observed item statuses and
    /// emit one notification per item that just became terminal, then
    /// remember the new statuses.
    pub fn observe(&mut self, task: &Task) -> Vec<Notification> {
        let prev = self.seen.get(&task.id);

        let notifications = task
            .items
            .iter()
            .filter(|item| {
                item.status.is_terminal()
                    && prev.and_then(|m| m.get(&item.id)).copied() != Some(item.status)
            })
            .map(|item| notification_for(task, item))
            .collect();

        self.seen.insert(
            task.id,
            task.items.iter().map(|i| (i.id, i.status)).collect(),
        );

        notifications
    }

    /// Observe a task without emitting — used to seed a baseline from the
    /// first snapshot, where pre-existing terminal items are old news.
    pub fn prime(&mut self, task: &Task) {
        let _ = self.observe(task);
    }

    /// Drop tracking for tasks no longer present in the view.
    pub fn retain(&mut self, live_ids: &[u64]) {
        self.seen.retain(|id, _| live_ids.contains(id));
    }

    /// Forget one task entirely.
    pub fn forget(&mut self, task_id: u64) {
        self.seen.remove(&task_id);
    }

    /// Number of tasks currently tracked.
    pub fn tracked(&self) -> usize {
        self.seen.len()
    }
}

fn notification_for(task: &Task, item: &TaskItem) -> Notification {
    match item.status {
        ItemStatus::Failed => {
            let detail = item
                .result
                .as_ref()
                .and_then(|r| r.get("error"))
                .and_then(|e| e.as_str())
                .unwrap_or("operation failed");
            Notification {
                title: task.label().to_string(),
                message: format!("Item {} of {} failed: {detail}", item.index + 1, task.total_items),
                severity: Severity::Error,
            }
        }
        _ => Notification {
            title: task.label().to_string(),
            message: format!("Item {} of {} finished", item.index + 1, task.total_items),
            severity: Severity::Info,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::model::TaskStatus;
    use chrono::Utc;
    use serde_json::json;

    fn make_task(id: u64, item_statuses: &[ItemStatus]) -> Task {
        let items = item_statuses
            .iter()
            .enumerate()
            .map(|(index, &status)| TaskItem {
                id: 10 + index as u64,
                index,
                status,
                payload: json!({}),
                result: (status == ItemStatus::Failed)
                    .then(|| json!({"error": "disk full"})),
                started_at: None,
                finished_at: None,
            })
            .collect::<Vec<_>>();
        Task {
            id,
            kind: "scrape_batch".to_string(),
            status: TaskStatus::Running,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            total_items: items.len(),
            completed_items: items.iter().filter(|i| i.status.is_terminal()).count(),
            meta: serde_json::Value::Null,
            items,
        }
    }

    #[test]
    fn emits_on_transition_into_terminal() {
        let mut detector = NotificationDetector::new();

        let queued = make_task(1, &[ItemStatus::Queued, ItemStatus::Queued]);
        assert!(detector.observe(&queued).is_empty());

        let running = make_task(1, &[ItemStatus::Running, ItemStatus::Queued]);
        assert!(detector.observe(&running).is_empty());

        let one_done = make_task(1, &[ItemStatus::Completed, ItemStatus::Queued]);
        let notifications = detector.observe(&one_done);
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].severity, Severity::Info);
        assert_eq!(notifications[0].title, "scrape_batch");
    }

    #[test]
    fn duplicate_delivery_emits_once() {
        let mut detector = NotificationDetector::new();
        detector.prime(&make_task(1, &[ItemStatus::Queued]));

        let done = make_task(1, &[ItemStatus::Completed]);
        assert_eq!(detector.observe(&done).len(), 1);
        // Same snapshot delivered three times in a row
        assert!(detector.observe(&done).is_empty());
        assert!(detector.observe(&done).is_empty());
    }

    #[test]
    fn failed_item_gets_error_severity_with_detail() {
        let mut detector = NotificationDetector::new();
        detector.prime(&make_task(1, &[ItemStatus::Running]));

        let failed = make_task(1, &[ItemStatus::Failed]);
        let notifications = detector.observe(&failed);
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].severity, Severity::Error);
        assert!(notifications[0].message.contains("disk full"));
        assert!(notifications[0].message.contains("Item 1 of 1"));
    }

    #[test]
    fn three_item_partial_failure_notifies_three_times_total() {
        let mut detector = NotificationDetector::new();
        detector.prime(&make_task(
            1,
            &[ItemStatus::Queued, ItemStatus::Queued, ItemStatus::Queued],
        ));

        let mut total = Vec::new();
        total.extend(detector.observe(&make_task(
            1,
            &[ItemStatus::Completed, ItemStatus::Queued, ItemStatus::Queued],
        )));
        total.extend(detector.observe(&make_task(
            1,
            &[ItemStatus::Completed, ItemStatus::Failed, ItemStatus::Queued],
        )));
        let final_state = make_task(
            1,
            &[ItemStatus::Completed, ItemStatus::Failed, ItemStatus::Completed],
        );
        total.extend(detector.observe(&final_state));
        // Re-delivery of the final state adds nothing
        total.extend(detector.observe(&final_state));

        assert_eq!(total.len(), 3);
        let errors = total.iter().filter(|n| n.severity == Severity::Error).count();
        assert_eq!(errors, 1);
    }

    #[test]
    fn skipped_intermediate_states_still_notify_once() {
        let mut detector = NotificationDetector::new();
        detector.prime(&make_task(1, &[ItemStatus::Queued, ItemStatus::Queued]));

        // Broadcast ring dropped the intermediate updates; the next
        // observation jumps straight to both items terminal.
        let notifications = detector.observe(&make_task(
            1,
            &[ItemStatus::Completed, ItemStatus::Failed],
        ));
        assert_eq!(notifications.len(), 2);
    }

    #[test]
    fn prime_suppresses_pre_existing_terminals() {
        let mut detector = NotificationDetector::new();
        let done = make_task(1, &[ItemStatus::Completed]);
        detector.prime(&done);
        assert!(detector.observe(&done).is_empty());
    }

    #[test]
    fn retain_drops_stale_tasks() {
        let mut detector = NotificationDetector::new();
        detector.prime(&make_task(1, &[ItemStatus::Queued]));
        detector.prime(&make_task(2, &[ItemStatus::Queued]));
        assert_eq!(detector.tracked(), 2);

        detector.retain(&[2]);
        assert_eq!(detector.tracked(), 1);

        // Task 1 is unknown again, so its completion notifies
        let done = make_task(1, &[ItemStatus::Completed]);
        assert_eq!(detector.observe(&done).len(), 1);
    }
}
