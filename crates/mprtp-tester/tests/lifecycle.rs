//! End-to-end runs of the lifecycle controller against in-process fakes,
//! on a paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mprtp_tester::cancel::{CancellationGate, ExitHook, SignalKind, Tier};
use mprtp_tester::lifecycle::{LifecycleController, Phase, StopCause, StopOutcome, Timing};
use mprtp_tester::test_util::{fake_collaborators, spec, Probe};
use tokio::time::Instant;

const DELAY: Duration = Duration::from_secs(3);

fn controller(key: &str) -> (Arc<LifecycleController>, Probe, Duration) {
    let (collab, probe) = fake_collaborators(DELAY);
    let ctrl = Arc::new(LifecycleController::new(collab, Timing::default()));
    let total = ctrl.setup(spec(key)).unwrap();
    (ctrl, probe, total)
}

/// Exit hook that records `(code, evaluations seen at exit time)`.
fn recording_exit(probe: &Probe) -> (Arc<Mutex<Vec<(i32, usize)>>>, ExitHook) {
    let exits = Arc::new(Mutex::new(Vec::new()));
    let sink = exits.clone();
    let probe = probe.clone();
    let hook: ExitHook = Arc::new(move |code| {
        sink.lock().unwrap().push((code, probe.evaluations()));
    });
    (exits, hook)
}

#[tokio::test(start_paused = true)]
async fn natural_run_ends_after_total_duration() {
    let (ctrl, probe, total) = controller("rmcat1");
    assert_eq!(total, Duration::from_secs(100 + 3 + 2));

    let t0 = Instant::now();
    assert_eq!(ctrl.start().await.unwrap(), StopOutcome::Ran);

    // settle + total + drain
    assert_eq!(t0.elapsed(), Duration::from_secs(1) + total + Duration::from_secs(3));
    assert!(ctrl.is_ended());
    assert_eq!(
        probe.events(),
        vec![
            "helpers.start",
            "driver.start",
            "driver.stop",
            "helpers.stop",
            "evaluate",
            "plot"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_triggers_run_stop_sequence_once() {
    let (ctrl, probe, _total) = controller("mprtp3");

    let run = tokio::spawn({
        let ctrl = ctrl.clone();
        async move { ctrl.start().await }
    });
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(ctrl.phase(), Phase::Running);

    let (a, b) = tokio::join!(
        ctrl.stop(StopCause::Signal),
        ctrl.stop(StopCause::StallDetected)
    );
    let mut outcomes = [a, b];
    outcomes.sort_by_key(|o| *o == StopOutcome::Ran);
    assert_eq!(outcomes, [StopOutcome::AlreadyStopping, StopOutcome::Ran]);

    assert_eq!(run.await.unwrap().unwrap(), StopOutcome::AlreadyStopping);
    assert_eq!(probe.count("driver.stop"), 1);
    assert_eq!(probe.count("helpers.stop"), 1);
    assert_eq!(probe.evaluations(), 1);
    assert_eq!(probe.plots(), 1);
}

#[tokio::test(start_paused = true)]
async fn ended_flag_is_sticky() {
    let (ctrl, probe, _total) = controller("rmcat4");
    ctrl.start().await.unwrap();
    assert!(ctrl.is_ended());

    assert_eq!(ctrl.stop(StopCause::Signal).await, StopOutcome::AlreadyStopping);
    ctrl.shutdown(StopCause::Signal).await;
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert!(ctrl.is_ended());
    assert_eq!(ctrl.phase(), Phase::Ended);
    assert_eq!(probe.evaluations(), 1);
}

#[tokio::test(start_paused = true)]
async fn watchdog_stops_a_run_whose_main_path_hung() {
    let (ctrl, probe, total) = controller("rmcat1");
    let t0 = Instant::now();

    let run = tokio::spawn({
        let ctrl = ctrl.clone();
        async move { ctrl.start().await }
    });
    tokio::time::sleep(Duration::from_secs(10)).await;
    // Nothing will ever take the natural stop path now.
    run.abort();

    ctrl.wait_ended().await;
    let grace = Timing::default().watchdog_grace;
    // Armed after the 1s settle, fires at total + grace, then drains for 3s.
    assert_eq!(
        t0.elapsed(),
        Duration::from_secs(1) + total + grace + Duration::from_secs(3)
    );
    assert_eq!(probe.evaluations(), 1);
    assert!(ctrl.is_ended());
}

#[tokio::test(start_paused = true)]
async fn watchdog_does_not_fire_after_natural_end() {
    let (ctrl, probe, _total) = controller("mprtp1");
    ctrl.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(probe.evaluations(), 1);
    assert_eq!(probe.count("driver.stop"), 1);
}

#[tokio::test(start_paused = true)]
async fn single_signal_stops_gracefully_then_exits() {
    let (ctrl, probe, _total) = controller("rmcat2");
    let (exits, hook) = recording_exit(&probe);
    let gate = Arc::new(CancellationGate::new(hook));
    gate.attach(ctrl.clone());

    let run = tokio::spawn({
        let ctrl = ctrl.clone();
        async move { ctrl.start().await }
    });
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(gate.request(SignalKind::Interrupt), Tier::Graceful);
    assert_eq!(run.await.unwrap().unwrap(), StopOutcome::AlreadyStopping);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(ctrl.is_ended());
    assert_eq!(*exits.lock().unwrap(), vec![(0, 1)]);
    assert_eq!(probe.plots(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_signal_during_drain_exits_before_evaluation() {
    let (ctrl, probe, _total) = controller("rmcat2");
    let (exits, hook) = recording_exit(&probe);
    let gate = Arc::new(CancellationGate::new(hook));
    gate.attach(ctrl.clone());

    let _run = tokio::spawn({
        let ctrl = ctrl.clone();
        async move { ctrl.start().await }
    });
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(gate.request(SignalKind::Interrupt), Tier::Graceful);
    // One second into the 3s helper drain.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(ctrl.phase(), Phase::Stopping);
    assert_eq!(probe.count("helpers.stop"), 1);

    assert_eq!(gate.request(SignalKind::Terminate), Tier::Forced);
    assert_eq!(*exits.lock().unwrap(), vec![(0, 0)]);
    assert_eq!(gate.hits(), 2);
}

#[tokio::test(start_paused = true)]
async fn keep_alive_postpones_the_watchdog() {
    let (ctrl, probe, total) = controller("rmcat1");
    let t0 = Instant::now();

    let run = tokio::spawn({
        let ctrl = ctrl.clone();
        async move { ctrl.start().await }
    });
    tokio::time::sleep(Duration::from_secs(10)).await;
    run.abort();

    // Top up shortly before the first deadline.
    let grace = Timing::default().watchdog_grace;
    let before_deadline = Duration::from_secs(1) + total + grace - Duration::from_secs(10);
    tokio::time::sleep_until(t0 + before_deadline).await;
    assert_eq!(probe.evaluations(), 0);
    ctrl.keep_alive(Duration::from_secs(120));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(probe.evaluations(), 0, "watchdog fired despite keep-alive");

    ctrl.wait_ended().await;
    assert_eq!(probe.evaluations(), 1);
}
