//! Per-tick task queues.
//!
//! Deferred work (canonical relationship flushes, record array refreshes,
//! lifecycle callbacks, batched fetches and saves) is queued here instead of
//! running on every mutation. Scheduling the same task twice before it runs
//! is a no-op, so a burst of mutations produces one unit of work.

use crate::relationships::EdgeKey;
use crate::types::{ArrayId, ModelId};
use std::collections::{HashSet, VecDeque};

/// Queues, drained in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Queue {
    SyncRelationships,
    Actions,
    Fetch,
}

const QUEUES: [Queue; 3] = [Queue::SyncRelationships, Queue::Actions, Queue::Fetch];

impl Queue {
    fn index(self) -> usize {
        match self {
            Queue::SyncRelationships => 0,
            Queue::Actions => 1,
            Queue::Fetch => 2,
        }
    }
}

/// A unit of deferred work.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Task {
    /// Reconcile one relationship edge with its canonical state.
    FlushCanonical(ModelId, EdgeKey),
    /// Re-evaluate record array membership for changed records.
    UpdateRecordArrays,
    /// Deliver queued lifecycle callbacks for a record.
    TriggerDeferred(ModelId),
    /// Full rescan of a filtered record array.
    UpdateFilter(ArrayId),
    FlushPendingSaves,
    FlushPendingFetches,
    /// find-all, query and link requests.
    FlushPendingRequests,
}

impl Task {
    /// The queue a task belongs to.
    pub fn queue(&self) -> Queue {
        match self {
            Task::FlushCanonical(..) => Queue::SyncRelationships,
            Task::UpdateRecordArrays
            | Task::TriggerDeferred(_)
            | Task::UpdateFilter(_)
            | Task::FlushPendingSaves => Queue::Actions,
            Task::FlushPendingFetches | Task::FlushPendingRequests => Queue::Fetch,
        }
    }
}

#[derive(Debug, Default)]
struct TaskQueue {
    tasks: VecDeque<Task>,
    scheduled: HashSet<Task>,
}

/// The scheduler.
#[derive(Debug, Default)]
pub struct RunLoop {
    queues: [TaskQueue; 3],
    depth: usize,
}

impl RunLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task` unless it is already waiting. Returns true if queued.
    pub fn schedule_once(&mut self, task: Task) -> bool {
        let queue = &mut self.queues[task.queue().index()];
        if !queue.scheduled.insert(task.clone()) {
            return false;
        }
        queue.tasks.push_back(task);
        true
    }

    /// Pop the next task of one queue.
    pub fn pop(&mut self, queue: Queue) -> Option<Task> {
        let queue = &mut self.queues[queue.index()];
        let task = queue.tasks.pop_front()?;
        queue.scheduled.remove(&task);
        Some(task)
    }

    /// Pop the next task, earlier queues first.
    pub fn next_task(&mut self) -> Option<Task> {
        QUEUES.iter().find_map(|q| self.pop(*q))
    }

    pub fn is_scheduled(&self, task: &Task) -> bool {
        self.queues[task.queue().index()].scheduled.contains(task)
    }

    pub fn pending(&self) -> usize {
        self.queues.iter().map(|q| q.tasks.len()).sum()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Enter a join. Joins nest.
    pub fn begin(&mut self) {
        self.depth += 1;
    }

    /// Leave a join. Returns true when the outermost join ended.
    pub fn end(&mut self) -> bool {
        self.depth = self.depth.saturating_sub(1);
        self.depth == 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_once_dedups() {
        let mut run_loop = RunLoop::new();
        assert!(run_loop.schedule_once(Task::UpdateRecordArrays));
        assert!(!run_loop.schedule_once(Task::UpdateRecordArrays));
        assert_eq!(run_loop.pending(), 1);

        assert_eq!(run_loop.next_task(), Some(Task::UpdateRecordArrays));
        // Once popped, it may be scheduled again.
        assert!(run_loop.schedule_once(Task::UpdateRecordArrays));
    }

    #[test]
    fn test_queue_order() {
        let mut run_loop = RunLoop::new();
        let edge = Task::FlushCanonical(ModelId(1), EdgeKey::declared("comments"));
        run_loop.schedule_once(Task::FlushPendingFetches);
        run_loop.schedule_once(Task::UpdateRecordArrays);
        run_loop.schedule_once(edge.clone());

        assert_eq!(run_loop.next_task(), Some(edge));
        assert_eq!(run_loop.next_task(), Some(Task::UpdateRecordArrays));
        assert_eq!(run_loop.next_task(), Some(Task::FlushPendingFetches));
        assert!(run_loop.is_idle());
    }

    #[test]
    fn test_nested_joins() {
        let mut run_loop = RunLoop::new();
        run_loop.begin();
        run_loop.begin();
        assert!(!run_loop.end());
        assert!(run_loop.end());
        assert!(run_loop.end());
    }
}
