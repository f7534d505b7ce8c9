mod common;

use common::{MockDriver, Step, mock_gateway, retry};
use devgate::codec::Value;
use devgate::error::GatewayError;
use devgate::gateway::{Gateway, GatewayOptions};
use devgate::request::{AddressWindow, OperationRequest, Payload};
use devgate::status::{BadReason, Status};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn read_power() -> OperationRequest {
    OperationRequest::read_resource("power")
}

/// Paused-clock timers fire on millisecond ticks
fn assert_gap(earlier: Instant, later: Instant, expected: Duration) {
    let gap = later - earlier;
    assert!(
        gap >= expected && gap < expected + Duration::from_millis(20),
        "expected a gap of {:?}, got {:?}",
        expected,
        gap
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_overlap_inside_the_driver() {
    let (gw, probe) = mock_gateway(Duration::from_millis(20), retry(1, 0));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let gw = gw.clone();
            tokio::spawn(async move { gw.execute(read_power()).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), Value::U16(3));
    }

    assert_eq!(probe.calls(), 10);
    assert!(!probe.overlapped());
    assert_eq!(gw.current_status(), Status::Good);
}

#[tokio::test(start_paused = true)]
async fn two_operations_take_at_least_their_combined_latency() {
    let (gw, _probe) = mock_gateway(Duration::from_millis(100), retry(1, 0));
    let start = Instant::now();
    let (a, b) = tokio::join!(gw.execute(read_power()), gw.execute(read_power()));
    a.unwrap();
    b.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn queued_callers_reach_the_driver_in_arrival_order() {
    let (gw, probe) = mock_gateway(Duration::from_millis(100), retry(1, 0));
    let busy = gw.clone();
    let holder = tokio::spawn(async move { busy.execute(read_power()).await });
    while probe.calls() < 1 {
        tokio::task::yield_now().await;
    }

    let mut writers = Vec::new();
    for value in 1..=5u16 {
        let gw = gw.clone();
        writers.push(tokio::spawn(async move {
            gw.execute(OperationRequest::write_resource("power", Value::U16(value)))
                .await
        }));
        // Let this writer join the lock queue before the next one is spawned
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    holder.await.unwrap().unwrap();
    for writer in writers {
        writer.await.unwrap().unwrap();
    }
    assert_eq!(
        probe.writes(),
        vec![vec![1], vec![2], vec![3], vec![4], vec![5]]
    );
    assert!(!probe.overlapped());
}

#[tokio::test(start_paused = true)]
async fn status_is_readable_while_an_operation_holds_the_device() {
    let (gw, probe) = mock_gateway(Duration::from_secs(1), retry(1, 0));
    gw.execute(read_power()).await.unwrap();
    assert_eq!(gw.current_status(), Status::Good);

    let busy = gw.clone();
    let running = tokio::spawn(async move { busy.execute(read_power()).await });
    while probe.calls() < 2 {
        tokio::task::yield_now().await;
    }

    let before = Instant::now();
    let status = gw.current_status();
    let snapshot = gw.snapshot();
    assert!(before.elapsed() < Duration::from_millis(1));
    assert_eq!(status, Status::Uncertain);
    assert_eq!(snapshot.total_operations, 1);

    running.await.unwrap().unwrap();
    assert_eq!(gw.current_status(), Status::Good);
    assert_eq!(gw.snapshot().total_operations, 2);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_exponential_backoff() {
    let (gw, probe) = mock_gateway(Duration::ZERO, retry(3, 1000));
    probe.push(Step::Fail(GatewayError::timeout("slow")));
    probe.push(Step::Fail(GatewayError::connection("reset")));

    assert_eq!(gw.execute(read_power()).await.unwrap(), Value::U16(3));

    let started = probe.started();
    assert_eq!(started.len(), 3);
    assert_gap(started[0], started[1], Duration::from_secs(1));
    assert_gap(started[1], started[2], Duration::from_secs(2));
    // Each transient failure drops the connection before the retry
    assert_eq!(probe.connects.load(Ordering::SeqCst), 3);
    assert_eq!(gw.current_status(), Status::Good);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_attempts_and_last_error() {
    let (gw, probe) = mock_gateway(Duration::ZERO, retry(3, 100));
    for _ in 0..3 {
        probe.push(Step::Fail(GatewayError::timeout("no answer")));
    }

    let err = gw.execute(read_power()).await.unwrap_err();
    match &err {
        GatewayError::RetryExhausted { attempts, last } => {
            assert_eq!(*attempts, 3);
            assert!(matches!(**last, GatewayError::Timeout { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(probe.calls(), 3);
    assert_eq!(gw.current_status(), Status::Bad(BadReason::Timeout));
    assert_eq!(gw.snapshot().consecutive_failures, 1);
}

#[tokio::test]
async fn terminal_failures_are_not_retried() {
    let (gw, probe) = mock_gateway(Duration::ZERO, retry(3, 100));
    probe.push(Step::Fail(GatewayError::decoding("garbage")));

    let err = gw.execute(read_power()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Decoding { .. }));
    assert_eq!(probe.calls(), 1);
    assert_eq!(gw.current_status(), Status::Bad(BadReason::DecodingError));
}

#[tokio::test]
async fn invalid_requests_never_reach_the_driver() {
    let (gw, probe) = mock_gateway(Duration::ZERO, retry(3, 100));

    let err = gw
        .execute(OperationRequest::read_window(AddressWindow::holding(0, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest { .. }));

    let err = gw
        .execute(OperationRequest::read_resource("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::UnknownResource { .. }));

    let err = gw
        .execute(OperationRequest::read_window(AddressWindow::endpoint("/status")))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest { .. }));

    let err = gw
        .execute(OperationRequest::write_window(
            AddressWindow::holding(0, 2),
            Payload::Registers(vec![1]),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest { .. }));

    assert_eq!(probe.calls(), 0);
    assert_eq!(gw.current_status(), Status::Uncertain);
}

#[tokio::test]
async fn driver_panic_is_contained_and_the_gateway_stays_usable() {
    let (gw, probe) = mock_gateway(Duration::ZERO, retry(3, 100));
    probe.push(Step::Panic);

    let err = gw.execute(read_power()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Internal { .. }));
    assert_eq!(gw.current_status(), Status::Bad(BadReason::InternalError));

    assert_eq!(gw.execute(read_power()).await.unwrap(), Value::U16(3));
    assert_eq!(gw.current_status(), Status::Good);
}

#[tokio::test(start_paused = true)]
async fn hung_driver_call_times_out_and_is_retried() {
    let (gw, probe) = mock_gateway(Duration::ZERO, retry(2, 10));
    probe.push(Step::Hang);

    assert_eq!(gw.execute(read_power()).await.unwrap(), Value::U16(3));
    let started = probe.started();
    assert_eq!(started.len(), 2);
    // Operation timeout plus the first backoff delay
    assert_gap(started[0], started[1], Duration::from_millis(2010));
}

#[tokio::test(start_paused = true)]
async fn writes_round_trip_through_the_resource_map() {
    let (gw, _probe) = mock_gateway(Duration::ZERO, retry(1, 0));
    gw.execute(OperationRequest::write_resource("power", Value::U16(1234)))
        .await
        .unwrap();
    assert_eq!(gw.execute(read_power()).await.unwrap(), Value::U16(1234));
}

#[tokio::test(start_paused = true)]
async fn cancel_while_waiting_for_the_device_leaves_status_alone() {
    let (gw, probe) = mock_gateway(Duration::from_secs(1), retry(1, 0));
    let busy = gw.clone();
    let holder = tokio::spawn(async move { busy.execute(read_power()).await });
    while probe.calls() < 1 {
        tokio::task::yield_now().await;
    }

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let err = gw
        .execute_with_cancel(read_power(), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled { .. }));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(gw.current_status(), Status::Uncertain);

    holder.await.unwrap().unwrap();
    assert_eq!(probe.calls(), 1);
    assert_eq!(gw.current_status(), Status::Good);
}

#[tokio::test]
async fn read_all_without_resources_leaves_the_device_alone() {
    let (driver, probe) = MockDriver::new(Duration::ZERO);
    let gw = Gateway::new("empty", Box::new(driver), GatewayOptions::default()).unwrap();

    assert!(gw.read_all().await.unwrap().is_empty());
    assert_eq!(probe.calls(), 0);
    assert_eq!(gw.current_status(), Status::Uncertain);
    assert_eq!(gw.snapshot().total_operations, 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_operation_settles_status_and_resets_the_connection() {
    let (gw, probe) = mock_gateway(Duration::from_secs(1), retry(1, 0));
    gw.execute(read_power()).await.unwrap();

    let busy = gw.clone();
    let running = tokio::spawn(async move { busy.execute(read_power()).await });
    while probe.calls() < 2 {
        tokio::task::yield_now().await;
    }
    running.abort();
    assert!(running.await.unwrap_err().is_cancelled());

    assert_eq!(gw.current_status(), Status::Bad(BadReason::Timeout));
    assert_eq!(probe.disconnects.load(Ordering::SeqCst), 0);

    // The next holder drops the stale connection before talking to the device
    assert_eq!(gw.execute(read_power()).await.unwrap(), Value::U16(3));
    assert_eq!(probe.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(probe.connects.load(Ordering::SeqCst), 2);
    assert_eq!(gw.current_status(), Status::Good);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_records_the_last_failure() {
    let (gw, probe) = mock_gateway(Duration::ZERO, retry(3, 10_000));
    probe.push(Step::Fail(GatewayError::unavailable("busy")));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let err = gw
        .execute_with_cancel(read_power(), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled { .. }));
    assert_eq!(probe.calls(), 1);
    assert_eq!(gw.current_status(), Status::Bad(BadReason::NotConnected));
}

#[tokio::test]
async fn startup_and_shutdown_drive_the_status() {
    let (gw, probe) = mock_gateway(Duration::ZERO, retry(1, 0));
    assert_eq!(gw.current_status(), Status::Uncertain);
    assert!(gw.startup().await);
    assert_eq!(gw.current_status(), Status::Good);

    gw.shutdown().await;
    assert_eq!(gw.current_status(), Status::Bad(BadReason::NotConnected));
    assert_eq!(probe.disconnects.load(Ordering::SeqCst), 1);

    // A later request reconnects
    gw.execute(read_power()).await.unwrap();
    assert_eq!(gw.current_status(), Status::Good);
}

#[tokio::test]
async fn check_access_is_a_single_attempt() {
    let (gw, probe) = mock_gateway(Duration::ZERO, retry(3, 100));
    probe.push(Step::Fail(GatewayError::timeout("slow")));
    assert!(!gw.check_access().await);
    assert_eq!(probe.calls(), 1);
    assert_eq!(gw.current_status(), Status::Bad(BadReason::Timeout));
    assert!(gw.check_access().await);
    assert_eq!(gw.current_status(), Status::Good);
}

#[tokio::test]
async fn read_all_decodes_every_resource() {
    let (gw, probe) = mock_gateway(Duration::ZERO, retry(1, 0));
    let values = gw.read_all().await.unwrap();
    assert_eq!(values.get("power"), Some(&Value::U16(3)));
    assert_eq!(probe.calls(), 1);
    assert_eq!(gw.current_status(), Status::Good);
}
