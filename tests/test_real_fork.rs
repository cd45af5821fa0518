//! End-to-end duplication with a real `fork()`.
//!
//! Kept as the only test in its binary so the harness has as few threads as
//! possible when forking. Children leave with `_exit`.

use std::sync::Arc;

use forkscope::{
    DuplicationOutcome, ForkDuplicator, ProcessCoordinator, ProcessLimits, SharedRegistry,
    SignalProbe,
};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use pretty_assertions::assert_eq;

const INCREMENTS: u64 = 500;

fn exit_child(code: i32) -> ! {
    // SAFETY: `_exit` skips atexit handlers and stdio flushing, which the
    // forked child of a test harness must not run.
    unsafe { nix::libc::_exit(code) }
}

fn wait_for(child_pid: u32) -> i32 {
    match waitpid(Pid::from_raw(child_pid as i32), None).unwrap() {
        WaitStatus::Exited(_, code) => code,
        other => panic!("Child ended unexpectedly: {other:?}"),
    }
}

#[test]
fn test_fork_shares_registry_across_processes() {
    let registry = Arc::new(SharedRegistry::create(ProcessLimits::new(2)).unwrap());
    let mut coordinator =
        ProcessCoordinator::bootstrap(registry.clone(), Box::new(ForkDuplicator)).unwrap();

    // A well-behaved child: counts states, then gives its slot back.
    let child_pid = match coordinator.request_duplication().unwrap() {
        DuplicationOutcome::ChildContinue { identity } => {
            let ok = identity.logical_index == 1 && identity.slot == 1;
            for _ in 0..INCREMENTS {
                if registry.fetch_and_increment_state_id().is_err() {
                    exit_child(4);
                }
            }
            if !matches!(coordinator.retire(), Ok(true)) {
                exit_child(5);
            }
            exit_child(if ok { 0 } else { 3 });
        }
        DuplicationOutcome::ParentContinue {
            child_pid,
            logical_index,
        } => {
            assert_eq!(logical_index, 1);
            child_pid
        }
        DuplicationOutcome::ResourceExhausted => panic!("Fork refused"),
    };

    for _ in 0..INCREMENTS {
        registry.fetch_and_increment_state_id().unwrap();
    }
    assert_eq!(wait_for(child_pid), 0);
    assert_eq!(registry.fetch_and_increment_state_id().unwrap(), 2 * INCREMENTS);
    assert_eq!(registry.current_process_count().unwrap(), 1);
    assert_eq!(registry.process_index_for_slot(1).unwrap(), None);

    // A child that dies without cleaning up leaves its slot behind.
    let child_pid = match coordinator.request_duplication().unwrap() {
        DuplicationOutcome::ChildContinue { .. } => exit_child(0),
        DuplicationOutcome::ParentContinue {
            child_pid,
            logical_index,
        } => {
            assert_eq!(logical_index, 2);
            child_pid
        }
        DuplicationOutcome::ResourceExhausted => panic!("Fork refused"),
    };
    assert_eq!(wait_for(child_pid), 0);
    assert_eq!(registry.current_process_count().unwrap(), 2);
    assert_eq!(registry.process_index_for_slot(1).unwrap(), Some(2));

    // At capacity until the dead slot is reclaimed.
    assert!(coordinator.request_duplication().unwrap().is_exhausted());
    assert!(registry.check_dead_processes(&SignalProbe).unwrap());
    assert!(!registry.check_dead_processes(&SignalProbe).unwrap());
    assert_eq!(registry.current_process_count().unwrap(), 1);
    assert_eq!(registry.process_index_for_slot(1).unwrap(), None);
    assert_eq!(registry.process_index_for_slot(0).unwrap(), Some(0));
}
