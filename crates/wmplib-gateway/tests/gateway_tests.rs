//! End-to-end driver tests against the scripted mock gateway.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use wmplib_core::error::{Error, Result};
use wmplib_core::events::GatewayEvent;
use wmplib_core::store::{keys, AttributeStore, MemoryStore};
use wmplib_core::types::{FanSpeed, OperatingMode, Temperature, UnitId};
use wmplib_gateway::{AddressResolver, GatewayBuilder, GatewayClient, UnitState};
use wmplib_test_harness::MockGateway;

/// Builder preset with fast intervals for tests.
fn test_builder(gateway: &MockGateway) -> GatewayBuilder {
    GatewayBuilder::new(gateway.host())
        .port(gateway.port())
        .ping_interval(Duration::from_millis(400))
        .refresh_interval(Duration::from_millis(600))
        .clock_sync(false)
        .no_rediscovery()
        .connect_timeout(Duration::from_millis(500))
}

/// Wait until `pred` holds or the deadline passes.
async fn wait_until<F>(mut pred: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    pred()
}

/// Wait until a unit snapshot satisfies `pred`.
async fn wait_for_unit<F>(client: &GatewayClient, id: UnitId, pred: F, timeout: Duration) -> bool
where
    F: Fn(&UnitState) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Ok(Some(unit)) = client.unit(id).await {
            if pred(&unit) {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Wait for an event matching `pred`, draining everything else.
async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<GatewayEvent>,
    mut pred: F,
    timeout: Duration,
) -> Option<GatewayEvent>
where
    F: FnMut(&GatewayEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) if pred(&event) => return Some(event),
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            _ => return None,
        }
    }
}

async fn connected_client(gateway: &MockGateway) -> GatewayClient {
    test_builder(gateway).connect().await.expect("connect failed")
}

#[tokio::test]
async fn connect_learns_identity_and_limits() {
    let gateway = MockGateway::start().await.unwrap();
    gateway.respond(
        "LIMITS:*",
        &[
            "LIMITS:MODE,[AUTO,HEAT,DRY,FAN,COOL]",
            "LIMITS:SETPTEMP,[160,320]",
            "LIMITS:FANSP,[AUTO,1,2,3,4]",
        ],
    );
    gateway.respond(
        "GET,1:*",
        &[
            "CHN,1:ONOFF,ON",
            "CHN,1:MODE,COOL",
            "CHN,1:SETPTEMP,215",
            "CHN,1:AMBTEMP,228",
        ],
    );

    let client = connected_client(&gateway).await;

    assert!(
        wait_for_unit(
            &client,
            UnitId::SINGLE,
            |unit| unit.power == Some(true)
                && unit.visible_mode() == Some(OperatingMode::Cool)
                && unit.setpoint == Some(Temperature::from_tenths(215))
                && unit.ambient == Some(Temperature::from_tenths(228)),
            Duration::from_secs(3),
        )
        .await,
        "unit never reached the reported state; received: {:?}",
        gateway.received()
    );

    let identity = client.identity().await.unwrap().expect("no identity");
    assert_eq!(identity.model, "WMP-1");
    assert_eq!(identity.mac, "CC3F1D018734");

    let status = client.status().await.unwrap();
    assert!(status.connected);
    assert!(!status.via_proxy);
    assert!(!status.failed);

    // The session opened with identity and limits queries.
    let received = gateway.received();
    assert_eq!(received[0], "ID");
    assert_eq!(received[1], "LIMITS:*");

    client.shutdown().await;
    gateway.stop().await;
}

#[tokio::test]
async fn off_unit_remembers_mode_from_wire() {
    let gateway = MockGateway::start().await.unwrap();
    let client = connected_client(&gateway).await;
    let mut events = client.subscribe();

    gateway.push("CHN,1:ONOFF,OFF").await;
    gateway.push("CHN,1:MODE,COOL").await;

    // MODE while off is remembered but stays invisible.
    assert!(
        wait_for_unit(
            &client,
            UnitId::SINGLE,
            |unit| unit.last_mode == Some(OperatingMode::Cool)
                && unit.visible_mode() == Some(OperatingMode::Off),
            Duration::from_secs(3),
        )
        .await,
        "MODE while off was not remembered"
    );

    // Power on restores the remembered mode.
    gateway.push("CHN,1:ONOFF,ON").await;
    let restored = wait_for_event(
        &mut events,
        |e| matches!(e, GatewayEvent::ModeChanged { mode: OperatingMode::Cool, .. }),
        Duration::from_secs(3),
    )
    .await;
    assert!(restored.is_some(), "mode was not restored on power-on");

    client.shutdown().await;
    gateway.stop().await;
}

#[tokio::test]
async fn out_of_limits_setpoint_rejected_without_traffic() {
    let gateway = MockGateway::start().await.unwrap();
    gateway.respond("LIMITS:*", &["LIMITS:SETPTEMP,[160,320]"]);

    let client = connected_client(&gateway).await;
    assert!(
        wait_for_unit(
            &client,
            UnitId::SINGLE,
            |unit| !unit.limits.is_empty(),
            Duration::from_secs(3),
        )
        .await,
        "limits never arrived"
    );

    // 50.0 C is outside the advertised 16.0..32.0 range.
    let err = client
        .set_setpoint(UnitId::SINGLE, Temperature::from_celsius(50.0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)), "got: {err:?}");

    // Zero outbound bytes for the rejected command.
    assert!(
        !gateway.received().iter().any(|c| c.starts_with("SET")),
        "rejected command reached the wire: {:?}",
        gateway.received()
    );

    client.shutdown().await;
    gateway.stop().await;
}

#[tokio::test]
async fn accepted_setpoint_issues_follow_up_query() {
    let gateway = MockGateway::start().await.unwrap();
    gateway.respond("LIMITS:*", &["LIMITS:SETPTEMP,[160,320]"]);
    gateway.respond("GET,1:SETPTEMP", &["CHN,1:SETPTEMP,210"]);

    let client = connected_client(&gateway).await;
    assert!(
        wait_for_unit(
            &client,
            UnitId::SINGLE,
            |unit| !unit.limits.is_empty(),
            Duration::from_secs(3),
        )
        .await
    );

    client
        .set_setpoint(UnitId::SINGLE, Temperature::from_celsius(21.0))
        .await
        .unwrap();

    assert!(
        wait_until(
            || {
                let received = gateway.received();
                match received.iter().position(|c| c == "SET,1:SETPTEMP,210") {
                    Some(at) => received[at + 1..].iter().any(|c| c == "GET,1:SETPTEMP"),
                    None => false,
                }
            },
            Duration::from_secs(3),
        )
        .await,
        "no follow-up query after setpoint change: {:?}",
        gateway.received()
    );

    // The clamp-back from the unit lands in the registry.
    assert!(
        wait_for_unit(
            &client,
            UnitId::SINGLE,
            |unit| unit.setpoint == Some(Temperature::from_tenths(210)),
            Duration::from_secs(3),
        )
        .await,
        "clamped setpoint never reflected"
    );

    client.shutdown().await;
    gateway.stop().await;
}

#[tokio::test]
async fn command_while_unreachable_fails_and_is_not_queued() {
    // Bind-then-drop to get a dead port.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = GatewayBuilder::new("127.0.0.1")
        .port(port)
        .clock_sync(false)
        .no_rediscovery()
        .connect_timeout(Duration::from_millis(300))
        .spawn();

    // The implicit reconnect fails, so the command is reported failed.
    let err = client.set_power(UnitId::SINGLE, true).await.unwrap_err();
    assert!(
        matches!(err, Error::Transport(_) | Error::Timeout | Error::Io(_)),
        "got: {err:?}"
    );

    let status = client.status().await.unwrap();
    assert!(!status.connected);
    assert!(status.failed);

    client.shutdown().await;
}

#[tokio::test]
async fn eager_connect_fails_fast_when_unreachable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = GatewayBuilder::new("127.0.0.1")
        .port(port)
        .no_rediscovery()
        .connect_timeout(Duration::from_millis(300))
        .connect()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn watchdog_closes_silent_connection_and_reconnects() {
    let gateway = MockGateway::start().await.unwrap();
    // A gateway that never says anything: no identity, no pong.
    gateway.respond("ID", &[]);
    gateway.respond("PING", &[]);
    gateway.respond("LIMITS:*", &[]);

    let client = GatewayBuilder::new(gateway.host())
        .port(gateway.port())
        .ping_interval(Duration::from_millis(200))
        .refresh_interval(Duration::from_millis(300))
        .clock_sync(false)
        .no_rediscovery()
        .connect_timeout(Duration::from_millis(500))
        .spawn();
    let mut events = client.subscribe();

    let connected = wait_for_event(
        &mut events,
        |e| matches!(e, GatewayEvent::Connected),
        Duration::from_secs(2),
    )
    .await;
    assert!(connected.is_some());

    // Watchdog deadline: max(2 x 300ms, 3 x 200ms) = 600ms of silence.
    let disconnected = wait_for_event(
        &mut events,
        |e| matches!(e, GatewayEvent::Disconnected),
        Duration::from_secs(5),
    )
    .await;
    assert!(disconnected.is_some(), "watchdog never fired");

    // The master tick dials again on its own.
    assert!(
        wait_until(|| gateway.connection_count() >= 2, Duration::from_secs(5)).await,
        "no reconnect after watchdog close"
    );

    client.shutdown().await;
    gateway.stop().await;
}

#[tokio::test]
async fn keep_alive_sent_when_idle() {
    let gateway = MockGateway::start().await.unwrap();
    let client = test_builder(&gateway)
        .ping_interval(Duration::from_millis(300))
        .connect()
        .await
        .unwrap();

    assert!(
        wait_until(
            || gateway.received().iter().any(|c| c == "PING"),
            Duration::from_secs(3),
        )
        .await,
        "no keep-alive observed: {:?}",
        gateway.received()
    );

    client.shutdown().await;
    gateway.stop().await;
}

#[tokio::test]
async fn provisioned_units_refresh_periodically() {
    let gateway = MockGateway::start().await.unwrap();
    let client = test_builder(&gateway)
        .provision_units([1, 2])
        .connect()
        .await
        .unwrap();

    assert!(
        wait_until(
            || {
                let received = gateway.received();
                received.iter().any(|c| c == "GET,1:*")
                    && received.iter().any(|c| c == "GET,2:*")
            },
            Duration::from_secs(3),
        )
        .await,
        "provisioned units were not refreshed: {:?}",
        gateway.received()
    );

    // A second refresh round happens after the interval.
    let first_round = gateway.received().iter().filter(|c| *c == "GET,1:*").count();
    assert!(
        wait_until(
            || gateway.received().iter().filter(|c| *c == "GET,1:*").count() > first_round,
            Duration::from_secs(3),
        )
        .await,
        "no periodic re-refresh observed"
    );

    client.shutdown().await;
    gateway.stop().await;
}

/// Test resolver handing out a fixed candidate list.
struct FixedResolver(Vec<IpAddr>);

#[async_trait]
impl AddressResolver for FixedResolver {
    async fn resolve(&self, _mac: &str) -> Result<Vec<IpAddr>> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn stale_address_recovered_through_resolver() {
    let gateway = MockGateway::start().await.unwrap();
    let store: Arc<dyn AttributeStore> = Arc::new(MemoryStore::with_values([(
        keys::GATEWAY_MAC,
        "CC3F1D018734",
    )]));

    // 127.0.0.2 refuses; the resolver points back at the mock.
    let client = GatewayBuilder::new("127.0.0.2")
        .port(gateway.port())
        .ping_interval(Duration::from_millis(400))
        .refresh_interval(Duration::from_millis(600))
        .clock_sync(false)
        .connect_timeout(Duration::from_millis(300))
        .attribute_store(Arc::clone(&store))
        .address_resolver(Arc::new(FixedResolver(vec!["127.0.0.1".parse().unwrap()])))
        .connect()
        .await
        .expect("rediscovery should have found the moved gateway");

    let status = client.status().await.unwrap();
    assert!(status.connected);

    // The rediscovered address was persisted for the next run.
    assert_eq!(store.get(keys::GATEWAY_IP).as_deref(), Some("127.0.0.1"));

    client.shutdown().await;
    gateway.stop().await;
}

#[tokio::test]
async fn gateway_close_line_drops_the_session() {
    let gateway = MockGateway::start().await.unwrap();
    let client = connected_client(&gateway).await;
    let mut events = client.subscribe();

    gateway.push("CLOSE").await;

    let disconnected = wait_for_event(
        &mut events,
        |e| matches!(e, GatewayEvent::Disconnected),
        Duration::from_secs(3),
    )
    .await;
    assert!(disconnected.is_some(), "CLOSE did not drop the session");

    client.shutdown().await;
    gateway.stop().await;
}

#[tokio::test]
async fn relative_fan_step_validates_against_limits() {
    let gateway = MockGateway::start().await.unwrap();
    gateway.respond("LIMITS:*", &["LIMITS:FANSP,[AUTO,1,2]"]);

    let client = connected_client(&gateway).await;
    gateway.push("CHN,1:FANSP,2").await;
    assert!(
        wait_for_unit(
            &client,
            UnitId::SINGLE,
            |unit| unit.fan_speed == Some(FanSpeed::Speed(2)) && !unit.limits.is_empty(),
            Duration::from_secs(3),
        )
        .await,
        "fan speed never reported"
    );

    // Speed 2 is the top; stepping up must be rejected with no traffic.
    let err = client.fan_speed_up(UnitId::SINGLE).await.unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)), "got: {err:?}");
    assert!(!gateway.received().iter().any(|c| c.starts_with("SET")));

    // Stepping down lands on speed 1.
    client.fan_speed_down(UnitId::SINGLE).await.unwrap();
    assert!(
        wait_until(
            || gateway.received().iter().any(|c| c == "SET,1:FANSP,1"),
            Duration::from_secs(2),
        )
        .await
    );

    client.shutdown().await;
    gateway.stop().await;
}
