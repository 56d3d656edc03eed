//! Runtime invariants over snapshots
//!
//! The engine in `tern-runtime` can export a [`RuntimeSnapshot`] of its
//! workers and tasks; these checks are the assertions that must hold for any
//! such snapshot taken while no transition is in flight.
//!
//! # Invariants
//!
//! 1. **Single runner**: no task is the current task of two workers
//! 2. **Assignment consistency**: a worker's current task names that worker
//!    back and is `Running` or `InSyscall`
//! 3. **Syscall flag**: a worker flagged in-syscall holds an `InSyscall` task
//! 4. **Idle context**: a worker without a task is in the scheduler context
//! 5. **Dead tasks detached**: a dead task is assigned to no worker

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::types::{StackContext, TaskId, TaskStatus, WorkerId};

/// Observable state of one task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: TaskId,
    pub status: TaskStatus,
    pub worker: Option<WorkerId>,
}

/// Observable state of one worker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerView {
    pub id: WorkerId,
    pub context: StackContext,
    pub current: Option<TaskId>,
    pub in_syscall: bool,
    pub locks: u32,
}

/// Workers and tasks captured together
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    pub workers: Vec<WorkerView>,
    pub tasks: Vec<TaskView>,
}

/// An invariant violation with details
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Description of what went wrong
    pub description: String,
}

/// Check all runtime invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_all_invariants(snapshot: &RuntimeSnapshot) -> Vec<InvariantViolation> {
    let tasks: BTreeMap<TaskId, &TaskView> = snapshot.tasks.iter().map(|t| (t.id, t)).collect();
    let mut violations = Vec::new();

    violations.extend(check_single_runner(snapshot));
    violations.extend(check_assignment_consistency(snapshot, &tasks));
    violations.extend(check_syscall_flag(snapshot, &tasks));
    violations.extend(check_idle_context(snapshot));
    violations.extend(check_dead_detached(snapshot));

    violations
}

/// Invariant 1: no task is current on two workers
fn check_single_runner(snapshot: &RuntimeSnapshot) -> Vec<InvariantViolation> {
    let mut owners: BTreeMap<TaskId, WorkerId> = BTreeMap::new();
    let mut violations = Vec::new();

    for worker in &snapshot.workers {
        let Some(tid) = worker.current else { continue };
        if let Some(other) = owners.insert(tid, worker.id) {
            violations.push(InvariantViolation {
                invariant: "single_runner",
                description: alloc::format!(
                    "Task {} is current on both {} and {}",
                    tid,
                    other,
                    worker.id
                ),
            });
        }
    }

    violations
}

/// Invariant 2: worker.current and task.worker agree
fn check_assignment_consistency(
    snapshot: &RuntimeSnapshot,
    tasks: &BTreeMap<TaskId, &TaskView>,
) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for worker in &snapshot.workers {
        let Some(tid) = worker.current else { continue };
        // Tasks outside the snapshot are not validated here
        let Some(task) = tasks.get(&tid) else { continue };

        if task.worker != Some(worker.id) {
            violations.push(InvariantViolation {
                invariant: "assignment_consistency",
                description: alloc::format!(
                    "{} runs task {} but the task names {:?}",
                    worker.id,
                    tid,
                    task.worker
                ),
            });
        }
        if !matches!(task.status, TaskStatus::Running | TaskStatus::InSyscall) {
            violations.push(InvariantViolation {
                invariant: "assignment_consistency",
                description: alloc::format!(
                    "{} holds task {} in status {:?}",
                    worker.id,
                    tid,
                    task.status
                ),
            });
        }
    }

    violations
}

/// Invariant 3: in-syscall workers hold in-syscall tasks
fn check_syscall_flag(
    snapshot: &RuntimeSnapshot,
    tasks: &BTreeMap<TaskId, &TaskView>,
) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for worker in snapshot.workers.iter().filter(|w| w.in_syscall) {
        let status = worker
            .current
            .and_then(|tid| tasks.get(&tid))
            .map(|t| t.status);
        if status != Some(TaskStatus::InSyscall) {
            violations.push(InvariantViolation {
                invariant: "syscall_flag",
                description: alloc::format!(
                    "{} is flagged in-syscall but its task status is {:?}",
                    worker.id,
                    status
                ),
            });
        }
    }

    violations
}

/// Invariant 4: idle workers sit in the scheduler context
fn check_idle_context(snapshot: &RuntimeSnapshot) -> Vec<InvariantViolation> {
    snapshot
        .workers
        .iter()
        .filter(|w| w.current.is_none() && w.context != StackContext::Scheduler)
        .map(|w| InvariantViolation {
            invariant: "idle_context",
            description: alloc::format!("Idle {} is in context {:?}", w.id, w.context),
        })
        .collect()
}

/// Invariant 5: dead tasks belong to nobody
fn check_dead_detached(snapshot: &RuntimeSnapshot) -> Vec<InvariantViolation> {
    snapshot
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Dead && t.worker.is_some())
        .map(|t| InvariantViolation {
            invariant: "dead_detached",
            description: alloc::format!("Dead task {} still names {:?}", t.id, t.worker),
        })
        .collect()
}

/// Assert all invariants hold (panic if not)
pub fn assert_invariants(snapshot: &RuntimeSnapshot) {
    if let Some(v) = check_all_invariants(snapshot).first() {
        panic!("Invariant violated: {}: {}", v.invariant, v.description);
    }
}
