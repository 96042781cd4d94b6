//! Short-Term Scheduler: a four-class multi-level feedback queue with
//! energy gating and preemption, each class ordered by `-deadline_urgency`.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use chrono::Utc;

use crate::types::{Priority, Task, TaskStatus};

/// Min-heap entry ordered by urgency descending (highest urgency first
/// out), wrapped so `BinaryHeap`, which is a max-heap, pops the right end.
struct Entry {
    urgency: f64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.urgency == other.urgency
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.urgency.partial_cmp(&other.urgency).unwrap_or(Ordering::Equal)
    }
}

const CLASSES: [Priority; 4] = [
    Priority::P0Urgent,
    Priority::P1Important,
    Priority::P2Normal,
    Priority::P3Background,
];

#[derive(Default)]
pub struct ShortTermScheduler {
    queues: HashMap<Priority, BinaryHeap<Entry>>,
    current: Option<Task>,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct QueueCounts {
    pub p0_urgent: usize,
    pub p1_important: usize,
    pub p2_normal: usize,
    pub p3_background: usize,
}

impl ShortTermScheduler {
    pub fn new() -> Self {
        let mut queues = HashMap::new();
        for class in CLASSES {
            queues.insert(class, BinaryHeap::new());
        }
        Self { queues, current: None }
    }

    fn classify_priority(task: &Task) -> Priority {
        if task.priority != Priority::P2Normal {
            return task.priority;
        }
        if let Some(deadline) = task.deadline {
            let hours_left = (deadline - Utc::now()).num_seconds() as f64 / 3600.0;
            if hours_left <= 2.0 {
                return Priority::P0Urgent;
            }
            if hours_left <= 24.0 {
                return Priority::P1Important;
            }
        }
        if task.cognitive_load <= 1 && task.energy_cost <= 1 {
            return Priority::P3Background;
        }
        task.priority
    }

    pub fn enqueue(&mut self, mut task: Task) {
        let priority = Self::classify_priority(&task);
        task.priority = priority;
        let urgency = task.deadline_urgency();
        self.queues
            .entry(priority)
            .or_default()
            .push(Entry { urgency, task });
    }

    pub fn enqueue_batch(&mut self, tasks: Vec<Task>) {
        for task in tasks {
            self.enqueue(task);
        }
    }

    /// Scans P0..P3, popping within a class until an energy-eligible
    /// task is found; skipped entries are restored before moving on.
    pub fn dequeue(&mut self, energy_level: u8) -> Option<Task> {
        for class in CLASSES {
            let heap = self.queues.get_mut(&class)?;
            let mut skipped = Vec::new();
            let mut found = None;
            while let Some(entry) = heap.pop() {
                if entry.task.energy_cost <= energy_level {
                    found = Some(entry.task);
                    break;
                }
                skipped.push(entry);
            }
            for entry in skipped {
                heap.push(entry);
            }
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// If a current task exists and `urgent` outranks it, saves the
    /// current task back onto its queue and takes over; otherwise
    /// simply enqueues `urgent`. Never blocks.
    pub fn preempt(&mut self, mut urgent: Task, _energy_level: u8) -> Option<Task> {
        let urgent_priority = Self::classify_priority(&urgent);
        urgent.priority = urgent_priority;

        match self.current.take() {
            None => {
                urgent.status = TaskStatus::InProgress;
                self.current = Some(urgent);
                None
            }
            Some(mut current) => {
                if urgent_priority < current.priority {
                    current.status = TaskStatus::Active;
                    let preempted = current.clone();
                    self.enqueue(current);
                    urgent.status = TaskStatus::InProgress;
                    self.current = Some(urgent);
                    Some(preempted)
                } else {
                    self.current = Some(current);
                    self.enqueue(urgent);
                    None
                }
            }
        }
    }

    pub fn set_current(&mut self, mut task: Task) {
        task.status = TaskStatus::InProgress;
        self.current = Some(task);
    }

    pub fn get_current(&self) -> Option<&Task> {
        self.current.as_ref()
    }

    pub fn clear_current(&mut self) -> Option<Task> {
        self.current.take()
    }

    /// No-op above the energy threshold; otherwise drains the P3 class,
    /// marking every task delegated.
    pub fn auto_delegate_p3(&mut self, energy_level: u8) -> Vec<Task> {
        if energy_level > 2 {
            return Vec::new();
        }
        let heap = self.queues.entry(Priority::P3Background).or_default();
        let mut delegated = Vec::new();
        while let Some(entry) = heap.pop() {
            let mut task = entry.task;
            task.status = TaskStatus::Delegated;
            delegated.push(task);
        }
        delegated
    }

    /// Non-destructive flatten across classes; ineligible tasks (cost
    /// exceeds the energy budget) are deferred to the tail, preserving
    /// relative order among eligible tasks.
    pub fn get_ordered_schedule(&self, energy_level: u8) -> Vec<Task> {
        let mut schedule = Vec::new();
        let mut deferred = Vec::new();
        for class in CLASSES {
            if let Some(heap) = self.queues.get(&class) {
                let mut sorted: Vec<&Entry> = heap.iter().collect();
                sorted.sort_by(|a, b| b.cmp(a));
                for entry in sorted {
                    if entry.task.energy_cost <= energy_level {
                        schedule.push(entry.task.clone());
                    } else {
                        deferred.push(entry.task.clone());
                    }
                }
            }
        }
        schedule.extend(deferred);
        schedule
    }

    pub fn reorder(&mut self, tasks: Vec<Task>) {
        for class in CLASSES {
            self.queues.insert(class, BinaryHeap::new());
        }
        self.enqueue_batch(tasks);
    }

    pub fn total_count(&self) -> usize {
        self.queues.values().map(|h| h.len()).sum::<usize>() + if self.current.is_some() { 1 } else { 0 }
    }

    pub fn queue_counts(&self) -> QueueCounts {
        QueueCounts {
            p0_urgent: self.queues.get(&Priority::P0Urgent).map(|h| h.len()).unwrap_or(0),
            p1_important: self.queues.get(&Priority::P1Important).map(|h| h.len()).unwrap_or(0),
            p2_normal: self.queues.get(&Priority::P2Normal).map(|h| h.len()).unwrap_or(0),
            p3_background: self.queues.get(&Priority::P3Background).map(|h| h.len()).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task_with_priority(name: &str, priority: Priority) -> Task {
        let mut task = Task::new(name);
        task.priority = priority;
        task
    }

    #[test]
    fn dequeue_respects_class_order() {
        let mut sts = ShortTermScheduler::new();
        sts.enqueue(task_with_priority("p2", Priority::P2Normal));
        sts.enqueue(task_with_priority("p0", Priority::P0Urgent));
        sts.enqueue(task_with_priority("p1", Priority::P1Important));
        let first = sts.dequeue(5).unwrap();
        assert_eq!(first.priority, Priority::P0Urgent);
    }

    #[test]
    fn dequeue_never_exceeds_energy_level() {
        let mut sts = ShortTermScheduler::new();
        let mut expensive = task_with_priority("expensive", Priority::P0Urgent);
        expensive.energy_cost = 5;
        let mut cheap = task_with_priority("cheap", Priority::P0Urgent);
        cheap.energy_cost = 1;
        sts.enqueue(expensive);
        sts.enqueue(cheap.clone());
        let result = sts.dequeue(2).unwrap();
        assert_eq!(result.id, cheap.id);
    }

    #[test]
    fn dequeue_returns_none_when_nothing_fits() {
        let mut sts = ShortTermScheduler::new();
        let mut expensive = task_with_priority("too costly", Priority::P0Urgent);
        expensive.energy_cost = 5;
        sts.enqueue(expensive);
        assert!(sts.dequeue(1).is_none());
    }

    #[test]
    fn preempt_takes_over_when_current_is_empty() {
        let mut sts = ShortTermScheduler::new();
        let urgent = task_with_priority("first", Priority::P0Urgent);
        assert!(sts.preempt(urgent, 5).is_none());
        assert!(sts.get_current().is_some());
    }

    #[test]
    fn preempt_saves_lower_priority_current_task() {
        let mut sts = ShortTermScheduler::new();
        let current = task_with_priority("background", Priority::P2Normal);
        sts.preempt(current.clone(), 5);
        let urgent = task_with_priority("urgent", Priority::P0Urgent);
        let preempted = sts.preempt(urgent, 5).unwrap();
        assert_eq!(preempted.id, current.id);
        assert_eq!(sts.get_current().unwrap().priority, Priority::P0Urgent);
    }

    #[test]
    fn preempt_does_not_replace_equal_or_higher_priority_current() {
        let mut sts = ShortTermScheduler::new();
        let current = task_with_priority("already urgent", Priority::P0Urgent);
        sts.preempt(current.clone(), 5);
        let other = task_with_priority("also urgent", Priority::P0Urgent);
        let result = sts.preempt(other, 5);
        assert!(result.is_none());
        assert_eq!(sts.get_current().unwrap().id, current.id);
    }

    #[test]
    fn auto_delegate_drains_p3_only_under_low_energy() {
        let mut sts = ShortTermScheduler::new();
        sts.enqueue(task_with_priority("background", Priority::P3Background));
        assert!(sts.auto_delegate_p3(3).is_empty());
        let delegated = sts.auto_delegate_p3(2);
        assert_eq!(delegated.len(), 1);
        assert_eq!(sts.queue_counts().p3_background, 0);
    }

    #[test]
    fn get_ordered_schedule_defers_ineligible_tasks() {
        let mut sts = ShortTermScheduler::new();
        let mut costly = task_with_priority("costly", Priority::P1Important);
        costly.energy_cost = 5;
        let cheap = task_with_priority("cheap", Priority::P2Normal);
        sts.enqueue(costly.clone());
        sts.enqueue(cheap.clone());
        let schedule = sts.get_ordered_schedule(2);
        assert_eq!(schedule.last().unwrap().id, costly.id);
        assert_eq!(schedule.first().unwrap().id, cheap.id);
    }

    #[test]
    fn classify_priority_promotes_imminent_deadlines() {
        let mut sts = ShortTermScheduler::new();
        let mut near = Task::new("due soon");
        near.deadline = Some(Utc::now() + Duration::hours(1));
        sts.enqueue(near);
        assert_eq!(sts.queue_counts().p0_urgent, 1);
    }

    #[test]
    fn enqueue_batch_then_ordered_schedule_is_a_permutation() {
        let mut sts = ShortTermScheduler::new();
        let tasks: Vec<Task> = (0..5).map(|i| Task::new(format!("task {i}"))).collect();
        let ids: std::collections::HashSet<_> = tasks.iter().map(|t| t.id).collect();
        sts.enqueue_batch(tasks);
        let schedule = sts.get_ordered_schedule(5);
        let schedule_ids: std::collections::HashSet<_> = schedule.iter().map(|t| t.id).collect();
        assert_eq!(ids, schedule_ids);
    }
}
