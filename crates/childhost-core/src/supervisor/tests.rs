use super::*;
use crate::config::HostConfig;
use crate::control::ControlLoop;
use crate::metrics::ChildProcessMetric;
use crate::notification::{ChildProcessNotification, NotificationKind};
use crate::process::ProcessKind;
use crate::testing::{
    ChannelSpy, MockLauncher, MockProcess, PrefixFilter, Recorder, RecordingDelegate,
};
use std::sync::Arc;
use tokio::sync::broadcast;

struct Fixture {
    control_loop: ControlLoop,
    supervisor: Supervisor,
    recorder: Recorder,
    spy: ChannelSpy,
    notifications: broadcast::Receiver<ChildProcessNotification>,
}

fn fixture(kind: ProcessKind) -> Fixture {
    let (control_loop, control) =
        ControlLoop::new(HostConfig::default(), Arc::new(MockLauncher::default())).unwrap();
    let notifications = control.subscribe();
    let recorder = Recorder::default();
    let spy = ChannelSpy::default();

    let data = ProcessDescriptor::new(kind);
    let sink = crate::channel::ChannelEventSink::new(data.id, control.downgrade());
    let channel = spy.channel(sink);
    let supervisor = Supervisor::new(
        data,
        Box::new(RecordingDelegate::new(&recorder)),
        Box::new(channel),
        true,
    );

    Fixture {
        control_loop,
        supervisor,
        recorder,
        spy,
        notifications,
    }
}

fn drain(rx: &mut broadcast::Receiver<ChildProcessNotification>) -> Vec<NotificationKind> {
    let mut kinds = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        kinds.push(notification.kind);
    }
    kinds
}

#[test]
fn test_new_supervisor_is_created() {
    let f = fixture(ProcessKind::Renderer);
    assert_eq!(f.supervisor.state(), LifecycleState::Created);
    assert!(!f.supervisor.disconnect_was_alive());
    assert!(f.supervisor.can_shutdown());
    assert!(matches!(
        f.supervisor.termination_status(),
        Err(SupervisorError::NotLaunched)
    ));
}

#[test]
fn test_send_before_launch_is_invalid() {
    let mut f = fixture(ProcessKind::Renderer);
    let err = f.supervisor.send(Message::new("hello")).unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::InvalidState {
            operation: "send",
            state: LifecycleState::Created,
            ..
        }
    ));
}

#[test]
fn test_launched_handle_connects() {
    let mut f = fixture(ProcessKind::Utility);
    let process = MockProcess::new();
    f.supervisor.state = LifecycleState::Launching;

    let disposition = f.supervisor.on_process_launched(Ok(process.handle(4242)));

    assert_eq!(disposition, Disposition::Keep);
    assert_eq!(f.supervisor.state(), LifecycleState::Connected);
    assert_eq!(f.supervisor.data().pid, Some(4242));
    assert_eq!(f.spy.attached_pid(), Some(4242));
    assert!(process.terminate_on_shutdown());
    assert_eq!(f.recorder.events(), vec!["launched"]);
}

#[test]
fn test_launch_result_outside_launching_is_ignored() {
    let mut f = fixture(ProcessKind::Utility);
    let process = MockProcess::new();

    let disposition = f.supervisor.on_process_launched(Ok(process.handle(4242)));

    assert_eq!(disposition, Disposition::Keep);
    assert_eq!(f.supervisor.state(), LifecycleState::Created);
    assert_eq!(f.supervisor.data().pid, None);
    assert_eq!(f.spy.attached_pid(), None);
    assert!(f.recorder.events().is_empty());
    assert!(matches!(
        f.supervisor.termination_status(),
        Err(SupervisorError::NotLaunched)
    ));

    // A late failure cannot tear down an adopted process either.
    f.supervisor.set_handle(process.handle(4242)).unwrap();
    let disposition = f
        .supervisor
        .on_process_launched(Err(SupervisorError::LaunchFailed("late".into())));
    assert_eq!(disposition, Disposition::Keep);
    assert_eq!(f.supervisor.state(), LifecycleState::Connected);
    assert!(f.recorder.events().is_empty());
}

#[test]
fn test_invalid_handle_destroys_without_crash() {
    let mut f = fixture(ProcessKind::Utility);
    let process = MockProcess::new();
    f.supervisor.state = LifecycleState::Launching;

    let disposition = f.supervisor.on_process_launched(Ok(process.invalid_handle()));

    assert_eq!(disposition, Disposition::Destroy);
    assert_eq!(f.supervisor.state(), LifecycleState::Terminated);
    assert_eq!(f.recorder.events(), vec!["launch_failed"]);
    assert!(drain(&mut f.notifications).is_empty());
}

#[test]
fn test_send_after_channel_error_fails() {
    let mut f = fixture(ProcessKind::Plugin);
    let process = MockProcess::new();
    f.supervisor.set_handle(process.handle(7)).unwrap();

    f.supervisor.send(Message::new("ping")).unwrap();
    assert_eq!(f.spy.sent(), vec!["ping"]);

    f.spy.refuse_sends();
    assert!(matches!(
        f.supervisor.send(Message::new("pong")),
        Err(SupervisorError::ChannelClosed)
    ));
}

#[test]
fn test_filters_run_before_delegate() {
    let mut f = fixture(ProcessKind::Plugin);
    f.supervisor.add_filter(Box::new(PrefixFilter {
        prefix: "sys:",
        recorder: f.recorder.clone(),
    }));

    assert!(f.supervisor.on_message_received(&Message::new("sys:ping")));
    assert!(!f.supervisor.on_message_received(&Message::new("hello")));
    assert_eq!(f.recorder.events(), vec!["filtered:sys:ping", "message:hello"]);
}

#[test]
fn test_immediate_crash_reports_once() {
    let mut f = fixture(ProcessKind::Renderer);
    let process = MockProcess::new();
    f.supervisor.set_handle(process.handle(11)).unwrap();
    process.set_status(TerminationStatus::Crashed(139));

    let env = f.control_loop.env_mut();
    let disposition = f.supervisor.on_channel_error(env);

    assert_eq!(disposition, Disposition::Destroy);
    assert_eq!(f.supervisor.state(), LifecycleState::Terminated);
    assert!(!f.supervisor.disconnect_was_alive());
    assert_eq!(
        f.recorder.events(),
        vec!["channel_error", "crashed:139", "disconnected"]
    );
    assert_eq!(
        drain(&mut f.notifications),
        vec![NotificationKind::Crashed, NotificationKind::HostDisconnected]
    );

    let env = f.control_loop.env_mut();
    assert_eq!(env.metrics.count(ChildProcessMetric::Crashed, ProcessKind::Renderer), 1);
    assert_eq!(
        env.metrics.count(ChildProcessMetric::CrashedWasAlive, ProcessKind::Renderer),
        0
    );
    assert_eq!(env.metrics.count(ChildProcessMetric::Disconnected, ProcessKind::Renderer), 1);
}

#[test]
fn test_repeated_channel_error_is_ignored() {
    let mut f = fixture(ProcessKind::Renderer);
    let process = MockProcess::new();
    f.supervisor.set_handle(process.handle(11)).unwrap();
    process.set_status(TerminationStatus::NormalTermination);

    let env = f.control_loop.env_mut();
    assert_eq!(f.supervisor.on_channel_error(env), Disposition::Destroy);
    assert_eq!(f.supervisor.on_channel_error(env), Disposition::Keep);
    assert_eq!(f.recorder.count("channel_error"), 1);
    assert_eq!(f.recorder.count("disconnected"), 1);
}

#[test]
fn test_ignored_channel_error_keeps_supervisor() {
    let (control_loop, control) =
        ControlLoop::new(HostConfig::default(), Arc::new(MockLauncher::default())).unwrap();
    let mut control_loop = control_loop;
    let recorder = Recorder::default();
    let spy = ChannelSpy::default();
    let data = ProcessDescriptor::new(ProcessKind::Gpu);
    let sink = crate::channel::ChannelEventSink::new(data.id, control.downgrade());
    let channel = spy.channel(sink);
    let mut delegate = RecordingDelegate::new(&recorder);
    delegate.on_error = ChannelErrorAction::Ignore;
    let mut supervisor = Supervisor::new(data, Box::new(delegate), Box::new(channel), true);

    let disposition = supervisor.on_channel_error(control_loop.env_mut());

    assert_eq!(disposition, Disposition::Keep);
    assert_eq!(supervisor.state(), LifecycleState::Created);
    assert_eq!(recorder.events(), vec!["channel_error"]);
}

#[tokio::test(start_paused = true)]
async fn test_still_running_defers_then_gives_up() {
    let mut f = fixture(ProcessKind::Worker);
    let process = MockProcess::new();
    f.supervisor.set_handle(process.polled_handle(21)).unwrap();

    let env = f.control_loop.env_mut();
    assert_eq!(f.supervisor.on_child_disconnected(env), Disposition::Keep);
    assert_eq!(f.supervisor.state(), LifecycleState::Disconnecting);
    assert!(f.supervisor.disconnect_was_alive());
    assert!(drain(&mut f.notifications).is_empty());

    assert_eq!(f.supervisor.on_child_disconnected(env), Disposition::Destroy);
    assert!(f.supervisor.disconnect_was_alive());
    assert_eq!(
        drain(&mut f.notifications),
        vec![NotificationKind::HostDisconnected]
    );

    let env = f.control_loop.env_mut();
    assert_eq!(
        env.metrics.count(ChildProcessMetric::DisconnectedAlive, ProcessKind::Worker),
        1
    );
    assert_eq!(env.metrics.count(ChildProcessMetric::Disconnected, ProcessKind::Worker), 1);
}

#[tokio::test(start_paused = true)]
async fn test_kill_after_wait_counts_was_alive() {
    let mut f = fixture(ProcessKind::Gpu);
    let process = MockProcess::new();
    f.supervisor.set_handle(process.handle(31)).unwrap();

    let env = f.control_loop.env_mut();
    assert_eq!(f.supervisor.on_child_disconnected(env), Disposition::Keep);
    process.exit(TerminationStatus::Killed(9));
    assert_eq!(f.supervisor.on_child_disconnected(env), Disposition::Destroy);
    // Resolved states never step again.
    assert_eq!(f.supervisor.on_child_disconnected(env), Disposition::Keep);

    assert!(!f.recorder.events().iter().any(|e| e.starts_with("crashed")));
    assert_eq!(env.metrics.count(ChildProcessMetric::Killed, ProcessKind::Gpu), 1);
    assert_eq!(env.metrics.count(ChildProcessMetric::KilledWasAlive, ProcessKind::Gpu), 1);
    assert_eq!(env.metrics.count(ChildProcessMetric::Disconnected, ProcessKind::Gpu), 1);
    assert_eq!(
        drain(&mut f.notifications),
        vec![NotificationKind::HostDisconnected]
    );
}

#[test]
fn test_disconnect_without_handle_finishes() {
    let mut f = fixture(ProcessKind::Utility);
    let env = f.control_loop.env_mut();
    assert_eq!(f.supervisor.on_child_disconnected(env), Disposition::Destroy);
    assert_eq!(f.recorder.events(), vec!["disconnected"]);
}

#[test]
fn test_force_shutdown_unregisters_and_stops_channel() {
    let mut f = fixture(ProcessKind::Utility);
    let child = f.supervisor.id();
    let env = f.control_loop.env_mut();
    env.registry.register(child);

    f.supervisor.force_shutdown(env);

    assert!(!env.registry.contains(child));
    assert!(f.spy.was_force_shutdown());
}

#[test]
fn test_connected_publishes_notification() {
    let mut f = fixture(ProcessKind::Renderer);
    let env = f.control_loop.env_mut();
    f.supervisor.on_channel_connected(env, 77);

    assert_eq!(f.recorder.events(), vec!["connected:77"]);
    assert_eq!(
        drain(&mut f.notifications),
        vec![NotificationKind::HostConnected]
    );
}
