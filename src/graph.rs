//! The dependency builder: turns declared resource accesses into
//! precedence edges at task-initialization time.

use crate::resource::{ResourceUser, SLOT_UNSET};
use crate::scheduler::DependencyKind;
use crate::task::Task;
use std::sync::Arc;

/// Walks each unique resource's user list backwards from this task's own
/// entry and installs an edge for every conflicting predecessor in the
/// same task space.
///
/// Two stopping rules bound the walk per resource:
///
/// - a serial predecessor with a synchronizing access shadows everything
///   older (those are already ordered behind it);
/// - the space's parent task dominates all earlier entries.
///
/// Runs on whichever worker pulls the task out of an emplacement queue,
/// exactly once per task.
pub(crate) fn init_graph(task: &Arc<Task>) {
    let user = task.user.read();

    for unique in user.unique.iter() {
        let slot = unique.slot();
        debug_assert_ne!(slot, SLOT_UNSET, "dependency walk before submission");

        // The user-list lock only fences concurrent removal; predecessors
        // found here may retire mid-walk, in which case add_follower sees
        // a reached post-event and refuses the edge.
        let users = unique.core.users.lock();
        for pred in users.iter_below(slot) {
            if Arc::ptr_eq(&pred.space, &task.space) {
                let pred_user = pred.user.read();
                if ResourceUser::is_serial(&pred_user, &user) {
                    install_edge(&pred, task);
                    if pred_user.has_sync_access(unique.core.id) {
                        break;
                    }
                }
            }
            if task.space.is_parent(&pred) {
                break;
            }
        }
    }
}

fn install_edge(pred: &Arc<Task>, task: &Arc<Task>) {
    let kind = task.sched().dependency_kind(pred, task);
    let installed = match kind {
        DependencyKind::Pre => pred.pre().add_follower(task.pre()),
        DependencyKind::Post => pred.post().add_follower(task.pre()),
    };
    tracing::trace!(
        pred = pred.id,
        task = task.id,
        ?kind,
        installed,
        "dependency edge"
    );
}
