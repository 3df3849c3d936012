//! 任务状态机单元测试

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::descriptor::TaskDescriptor;
use crate::event::ProtocolError;
use crate::task::{transition_table, StateMachine, TaskState, TaskTransition};

#[test]
fn test_table_connect_order_is_commutative() {
    assert_eq!(
        transition_table(TaskState::NotConnected, TaskTransition::InputsConnected),
        Some(TaskState::InputsConnected)
    );
    assert_eq!(
        transition_table(TaskState::InputsConnected, TaskTransition::OutputsConnected),
        Some(TaskState::Ready)
    );
    assert_eq!(
        transition_table(TaskState::NotConnected, TaskTransition::OutputsConnected),
        Some(TaskState::OutputsConnected)
    );
    assert_eq!(
        transition_table(TaskState::OutputsConnected, TaskTransition::InputsConnected),
        Some(TaskState::Ready)
    );
}

#[test]
fn test_table_execution_path() {
    assert_eq!(
        transition_table(TaskState::Ready, TaskTransition::Run),
        Some(TaskState::Running)
    );
    assert_eq!(
        transition_table(TaskState::Running, TaskTransition::Finish),
        Some(TaskState::Finished)
    );
    assert_eq!(
        transition_table(TaskState::Running, TaskTransition::Fail),
        Some(TaskState::Failure)
    );
}

#[test]
fn test_terminal_states_have_no_outgoing_transitions() {
    let transitions = [
        TaskTransition::InputsConnected,
        TaskTransition::OutputsConnected,
        TaskTransition::Run,
        TaskTransition::Finish,
        TaskTransition::Fail,
    ];
    for state in [TaskState::Finished, TaskState::Failure] {
        assert!(state.is_terminal());
        for transition in transitions {
            assert_eq!(transition_table(state, transition), None);
        }
    }
}

#[test]
fn test_machine_runs_full_lifecycle() {
    let machine = StateMachine::new(&TaskDescriptor::new("lifecycle"));
    assert_eq!(machine.current(), TaskState::NotConnected);

    machine.transition(TaskTransition::InputsConnected).unwrap();
    machine.transition(TaskTransition::OutputsConnected).unwrap();
    assert_eq!(machine.current(), TaskState::Ready);

    machine.transition(TaskTransition::Run).unwrap();
    machine.transition(TaskTransition::Finish).unwrap();
    assert_eq!(machine.current(), TaskState::Finished);
}

#[test]
fn test_illegal_transition_drives_failure() {
    let machine = StateMachine::new(&TaskDescriptor::new("illegal"));

    // Run before connection completion is not in the table.
    let err = machine.transition(TaskTransition::Run).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::IllegalTransition {
            state: TaskState::NotConnected,
            transition: TaskTransition::Run,
            ..
        }
    ));
    assert_eq!(machine.current(), TaskState::Failure);
}

#[test]
fn test_illegal_transition_in_terminal_state_keeps_state() {
    let machine = StateMachine::new(&TaskDescriptor::new("finished"));
    machine.transition(TaskTransition::InputsConnected).unwrap();
    machine.transition(TaskTransition::OutputsConnected).unwrap();
    machine.transition(TaskTransition::Run).unwrap();
    machine.transition(TaskTransition::Finish).unwrap();

    assert!(machine.transition(TaskTransition::Fail).is_err());
    assert_eq!(machine.current(), TaskState::Finished);
}

#[test]
fn test_observer_sees_ready_entry_once() {
    let machine = StateMachine::new(&TaskDescriptor::new("observed"));
    let ready_entries = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(Mutex::new(Vec::new()));

    {
        let ready_entries = ready_entries.clone();
        let entered = entered.clone();
        machine.set_observer(Box::new(move |state| {
            entered.lock().push(state);
            if state == TaskState::Ready {
                ready_entries.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    machine.transition(TaskTransition::OutputsConnected).unwrap();
    machine.transition(TaskTransition::InputsConnected).unwrap();
    machine.transition(TaskTransition::Run).unwrap();
    machine.transition(TaskTransition::Finish).unwrap();

    assert_eq!(ready_entries.load(Ordering::SeqCst), 1);
    assert_eq!(
        *entered.lock(),
        vec![
            TaskState::OutputsConnected,
            TaskState::Ready,
            TaskState::Running,
            TaskState::Finished
        ]
    );
}
