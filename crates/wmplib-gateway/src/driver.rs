//! The per-gateway driver task.
//!
//! One tokio task owns everything mutable for a gateway: the transport,
//! the line buffer, the unit registry, and the scheduler. Public API
//! handles talk to it over an mpsc channel with oneshot replies, so all
//! state mutation is serialized through one task and no locking is
//! needed. Timed work (the master tick, the adaptive receive poll) is
//! multiplexed over a single `sleep_until` via the [`Scheduler`].
//!
//! The driver keeps the session alive indefinitely: the master tick
//! reconnects a closed session (consulting the address resolver when the
//! stored address no longer answers), refreshes stale units, paces
//! queued commands one per tick, keeps the link alive with `PING`, and
//! force-closes a connection that has gone silent past the watchdog
//! deadline.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use wmplib_core::error::{Error, Result};
use wmplib_core::events::GatewayEvent;
use wmplib_core::store::{keys, AttributeStore};
use wmplib_core::transport::Transport;
use wmplib_core::types::{
    Capability, FanSpeed, GatewayInfo, OperatingMode, StepDirection, Temperature, UnitId,
    VaneAxis, VanePosition,
};
use wmplib_transport::{ProxyDirective, ProxyTransport, TcpTransport};

use crate::builder::GatewayConfig;
use crate::client::GatewayStatus;
use crate::codec::{
    cmd_cfg_datetime, cmd_cfg_devicename, cmd_get, cmd_id, cmd_limits, cmd_ping, cmd_set,
    encode_command, parse_message, LineBuffer, Message,
};
use crate::resolver::AddressResolver;
use crate::scheduler::Scheduler;
use crate::state::{UnitRegistry, UnitState};

/// Timeout for one receive poll; near-zero so the driver never stalls.
const RECV_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Receive poll delay floor, used while the gateway is chatty.
const RECV_DELAY_MIN: Duration = Duration::from_millis(50);

/// Receive poll delay cap, reached by geometric backoff when idle.
const RECV_DELAY_MAX: Duration = Duration::from_secs(2);

/// Re-tick delay while queued commands remain to be paced out.
const FAST_TICK: Duration = Duration::from_millis(100);

/// How often the gateway wall clock is re-synced.
const CLOCK_SYNC_INTERVAL: Duration = Duration::from_secs(3600);

/// Receive buffer size; WMP bursts are far smaller than this.
const RECV_BUF: usize = 2048;

/// Event broadcast channel capacity.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The driver's scheduled tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TaskKey {
    /// Liveness, reconnect, refresh, pacing, keep-alive, clock sync.
    MasterTick,
    /// Adaptive receive poll.
    Receive,
}

/// A validated high-level command against one unit.
#[derive(Debug, Clone)]
pub(crate) enum UnitAction {
    SetPower { unit: UnitId, on: bool },
    SetMode { unit: UnitId, mode: OperatingMode },
    SetFanSpeed { unit: UnitId, speed: FanSpeed },
    StepFanSpeed { unit: UnitId, direction: StepDirection },
    SetSetpoint { unit: UnitId, setpoint: Temperature },
    SetVane { unit: UnitId, axis: VaneAxis, position: VanePosition },
    StepVane { unit: UnitId, axis: VaneAxis, direction: StepDirection },
}

/// A request sent from the client handle to the driver task.
pub(crate) enum Request {
    /// Eagerly establish the connection (used by `GatewayClient::connect`).
    Connect { reply: oneshot::Sender<Result<()>> },
    /// Submit a validated unit command.
    Action {
        action: UnitAction,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Request an immediate full-status refresh of one unit.
    Refresh {
        unit: UnitId,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Rename the gateway.
    Rename {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Snapshot of every unit.
    Units {
        reply: oneshot::Sender<Vec<UnitState>>,
    },
    /// Snapshot of one unit.
    Unit {
        id: UnitId,
        reply: oneshot::Sender<Option<UnitState>>,
    },
    /// Connection status and failure flag.
    Status {
        reply: oneshot::Sender<GatewayStatus>,
    },
    /// Last reported gateway identity.
    Identity {
        reply: oneshot::Sender<Option<GatewayInfo>>,
    },
}

/// Spawn the driver task for one gateway.
pub(crate) fn spawn_driver(
    config: GatewayConfig,
    store: Arc<dyn AttributeStore>,
    resolver: Option<Arc<dyn AddressResolver>>,
    provisioned: Vec<UnitId>,
) -> (
    mpsc::Sender<Request>,
    broadcast::Sender<GatewayEvent>,
    CancellationToken,
    JoinHandle<()>,
) {
    let (tx, rx) = mpsc::channel(32);
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    let mut registry = UnitRegistry::new();
    for unit in provisioned {
        registry.provision(unit);
    }

    let driver = GatewayDriver {
        config,
        store,
        resolver,
        transport: None,
        via_proxy: false,
        lines: LineBuffer::new(),
        registry,
        scheduler: Scheduler::new(),
        outbound: VecDeque::new(),
        recv_delay: RECV_DELAY_MIN,
        last_rx: Instant::now(),
        last_tx: Instant::now(),
        last_clock_sync: None,
        reconnect_attempts: 0,
        last_failure: None,
        identity: None,
        event_tx: event_tx.clone(),
    };

    let task = tokio::spawn(driver.run(rx, cancel.clone()));
    (tx, event_tx, cancel, task)
}

struct GatewayDriver {
    config: GatewayConfig,
    store: Arc<dyn AttributeStore>,
    resolver: Option<Arc<dyn AddressResolver>>,
    /// The one connection to the gateway; `None` while disconnected.
    transport: Option<Box<dyn Transport>>,
    via_proxy: bool,
    lines: LineBuffer,
    registry: UnitRegistry,
    scheduler: Scheduler<TaskKey>,
    /// Commands queued by the pacer, sent one per tick.
    outbound: VecDeque<String>,
    recv_delay: Duration,
    /// When the last byte was received.
    last_rx: Instant,
    /// When the last command was successfully written.
    last_tx: Instant,
    last_clock_sync: Option<Instant>,
    reconnect_attempts: u32,
    last_failure: Option<String>,
    identity: Option<GatewayInfo>,
    event_tx: broadcast::Sender<GatewayEvent>,
}

impl GatewayDriver {
    async fn run(mut self, mut rx: mpsc::Receiver<Request>, cancel: CancellationToken) {
        self.scheduler.arm(TaskKey::MasterTick, Duration::ZERO);

        loop {
            let wake = self.scheduler.next_wake();
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("gateway driver cancelled");
                    break;
                }

                req = rx.recv() => {
                    match req {
                        Some(req) => self.handle_request(req).await,
                        None => {
                            tracing::debug!("client handle dropped, exiting driver");
                            break;
                        }
                    }
                }

                _ = sleep_until_or_park(wake) => {
                    // Drain everything due, in ascending wake order. A
                    // task that fails is logged and the loop continues;
                    // nothing here is allowed to kill the driver.
                    for key in self.scheduler.take_due(Instant::now()) {
                        let result = match key {
                            TaskKey::MasterTick => self.master_tick().await,
                            TaskKey::Receive => self.receive_tick().await,
                        };
                        if let Err(e) = result {
                            tracing::warn!(task = ?key, error = %e, "scheduled task failed");
                        }
                    }
                }
            }
        }

        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close().await;
        }
    }

    async fn handle_request(&mut self, req: Request) {
        match req {
            Request::Connect { reply } => {
                let _ = reply.send(self.ensure_connected().await);
            }
            Request::Action { action, reply } => {
                let _ = reply.send(self.submit_action(action).await);
            }
            Request::Refresh { unit, reply } => {
                let result = self.send_line(&cmd_get(unit, None)).await;
                if result.is_ok() {
                    if let Some(state) = self.registry.get_mut(unit) {
                        state.last_refresh = Some(Instant::now());
                    }
                }
                let _ = reply.send(result);
            }
            Request::Rename { name, reply } => {
                let result = if name.is_empty() || name.len() > 32 || !name.is_ascii() {
                    Err(Error::InvalidParameter(
                        "device name must be 1-32 ASCII characters".into(),
                    ))
                } else {
                    self.send_line(&cmd_cfg_devicename(&name)).await
                };
                let _ = reply.send(result);
            }
            Request::Units { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Request::Unit { id, reply } => {
                let _ = reply.send(self.registry.get(id).cloned());
            }
            Request::Status { reply } => {
                let _ = reply.send(GatewayStatus {
                    connected: self.transport.is_some(),
                    via_proxy: self.via_proxy,
                    failed: self.last_failure.is_some(),
                    detail: self.last_failure.clone(),
                });
            }
            Request::Identity { reply } => {
                let _ = reply.send(self.identity.clone());
            }
        }
    }

    // -----------------------------------------------------------------
    // Master tick: watchdog, reconnect, refresh, pacing, keep-alive
    // -----------------------------------------------------------------

    async fn master_tick(&mut self) -> Result<()> {
        // Re-arm before doing anything so no failure below can stall the
        // loop. A fast re-tick may pull this earlier.
        self.scheduler.arm(TaskKey::MasterTick, self.config.tick_period());

        if self.transport.is_some() {
            let idle = self.last_rx.elapsed();
            let deadline = self.config.watchdog_timeout();
            if idle > deadline {
                tracing::warn!(
                    idle_secs = idle.as_secs(),
                    deadline_secs = deadline.as_secs(),
                    "watchdog expired, forcing connection closed"
                );
                self.drop_connection("no data within watchdog deadline").await;
            }
        }

        if self.transport.is_none() {
            if let Err(e) = self.ensure_connected().await {
                tracing::debug!(error = %e, "reconnect attempt failed, will retry");
                return Ok(());
            }
        }

        // Queue a full-status query for every unit past its refresh
        // interval.
        let now = Instant::now();
        let refresh = self.config.refresh_interval;
        let mut stale: Vec<UnitId> = Vec::new();
        for state in self.registry.iter() {
            let due = state
                .last_refresh
                .map_or(true, |at| now.duration_since(at) >= refresh);
            if due {
                stale.push(state.id);
            }
        }
        for unit in stale {
            self.outbound.push_back(cmd_get(unit, None));
            if let Some(state) = self.registry.get_mut(unit) {
                state.last_refresh = Some(now);
            }
        }

        // Send at most one queued command per tick to avoid saturating a
        // slow link; re-tick almost immediately while more remain.
        if let Some(command) = self.outbound.pop_front() {
            let more = !self.outbound.is_empty();
            self.send_line(&command).await?;
            if more {
                self.scheduler.arm(TaskKey::MasterTick, FAST_TICK);
            }
            return Ok(());
        }

        if self.last_tx.elapsed() >= self.config.ping_interval {
            self.send_line(&cmd_ping()).await?;
            return Ok(());
        }

        if self.config.clock_sync
            && self
                .last_clock_sync
                .map_or(true, |at| at.elapsed() >= CLOCK_SYNC_INTERVAL)
        {
            let stamp = chrono::Local::now().format("%d/%m/%Y %H:%M:%S").to_string();
            self.send_line(&cmd_cfg_datetime(&stamp)).await?;
            self.last_clock_sync = Some(Instant::now());
        }

        Ok(())
    }

    // -----------------------------------------------------------------
    // Receive: adaptive poll, framing, dispatch
    // -----------------------------------------------------------------

    async fn receive_tick(&mut self) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            // Disconnected; the task stays suspended until reconnect.
            return Ok(());
        };

        let mut buf = [0u8; RECV_BUF];
        match transport.receive(&mut buf, RECV_POLL_TIMEOUT).await {
            Ok(n) => {
                self.last_rx = Instant::now();
                self.recv_delay = RECV_DELAY_MIN;
                self.lines.push(&buf[..n]);
                while let Some(line) = self.lines.next_line() {
                    self.dispatch_line(&line).await;
                }
            }
            Err(Error::Timeout) => {
                // Idle: back off geometrically up to the cap.
                self.recv_delay = (self.recv_delay * 2).min(RECV_DELAY_MAX);
            }
            Err(e) => {
                self.drop_connection(&format!("receive failed: {e}")).await;
                return Ok(());
            }
        }

        if self.transport.is_some() {
            self.scheduler.arm_replace(TaskKey::Receive, self.recv_delay);
        }
        Ok(())
    }

    /// Route one complete protocol line. Handlers are pure state updates
    /// over the registry and connection; none of them reads the socket,
    /// so inbound processing can never nest.
    async fn dispatch_line(&mut self, line: &str) {
        let message = match parse_message(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(line, error = %e, "dropping malformed line");
                return;
            }
        };

        match message {
            Message::Id(info) => {
                tracing::debug!(model = %info.model, mac = %info.mac, "gateway identity");
                if !info.mac.is_empty() {
                    self.store.set(keys::GATEWAY_MAC, &info.mac);
                    self.config.mac = Some(info.mac.clone());
                }
                if !info.ip.is_empty() {
                    self.store.set(keys::GATEWAY_IP, &info.ip);
                }
                self.identity = Some(info);
            }
            Message::Info { name, value } => {
                tracing::debug!(name = %name, value = %value, "gateway property");
            }
            Message::Chn {
                unit,
                function,
                value,
            } => {
                for event in self.registry.apply_change(unit, &function, &value) {
                    let _ = self.event_tx.send(event);
                }
            }
            Message::Limits {
                unit,
                function,
                values,
            } => {
                self.registry.apply_limits(unit, &function, &values);
            }
            Message::Ack => {
                tracing::trace!("command acknowledged");
            }
            Message::Err { unit, detail } => {
                let detail = detail.unwrap_or_default();
                tracing::warn!(unit = ?unit, detail = %detail, "gateway rejected command");
                self.last_failure = Some(if detail.is_empty() {
                    "gateway rejected command".to_string()
                } else {
                    format!("gateway rejected command: {detail}")
                });
            }
            Message::Pong { rssi } => {
                if let (Some(identity), Some(rssi)) = (self.identity.as_mut(), rssi) {
                    identity.rssi = Some(rssi);
                }
                tracing::trace!(rssi = ?rssi, "pong");
            }
            Message::Close => {
                tracing::info!("gateway announced session close");
                self.drop_connection("gateway closed the session").await;
            }
            Message::Unknown { line } => {
                tracing::warn!(line = %line, "unknown message type dropped");
            }
        }
    }

    // -----------------------------------------------------------------
    // Command submission and validation
    // -----------------------------------------------------------------

    async fn submit_action(&mut self, action: UnitAction) -> Result<()> {
        // Validation happens against the current limits before any
        // network I/O; a rejected command produces zero outbound bytes.
        let (command, setpoint_unit) = self.validate(&action)?;
        self.send_line(&command).await?;

        // A setpoint change is clamped by the unit itself; query it back
        // right away instead of waiting for the periodic refresh.
        if let Some(unit) = setpoint_unit {
            if let Err(e) = self
                .send_line(&cmd_get(unit, Some(Capability::SetpointTemp.wire_token())))
                .await
            {
                tracing::debug!(error = %e, "setpoint follow-up query failed");
            }
        }
        Ok(())
    }

    /// Check an action against the unit's advertised limits and encode
    /// the wire command. Returns the unit to re-query for setpoints.
    fn validate(&self, action: &UnitAction) -> Result<(String, Option<UnitId>)> {
        match action {
            UnitAction::SetPower { unit, on } => {
                let value = if *on { "ON" } else { "OFF" };
                self.check_limits(*unit, Capability::OnOff, value)?;
                Ok((cmd_set(*unit, Capability::OnOff.wire_token(), value), None))
            }
            UnitAction::SetMode { unit, mode } => match mode.wire_token() {
                // `Off` is a mode externally but power on the wire.
                None => {
                    self.check_limits(*unit, Capability::OnOff, "OFF")?;
                    Ok((cmd_set(*unit, Capability::OnOff.wire_token(), "OFF"), None))
                }
                Some(token) => {
                    self.check_limits(*unit, Capability::Mode, token)?;
                    Ok((cmd_set(*unit, Capability::Mode.wire_token(), token), None))
                }
            },
            UnitAction::SetFanSpeed { unit, speed } => {
                let token = speed.wire_token();
                self.check_limits(*unit, Capability::FanSpeed, &token)?;
                Ok((cmd_set(*unit, Capability::FanSpeed.wire_token(), &token), None))
            }
            UnitAction::StepFanSpeed { unit, direction } => {
                let speed = step_fan_speed(self.registry.get(*unit), *direction)?;
                let token = speed.wire_token();
                self.check_limits(*unit, Capability::FanSpeed, &token)?;
                Ok((cmd_set(*unit, Capability::FanSpeed.wire_token(), &token), None))
            }
            UnitAction::SetSetpoint { unit, setpoint } => {
                let value = setpoint.tenths().to_string();
                self.check_limits(*unit, Capability::SetpointTemp, &value)?;
                Ok((
                    cmd_set(*unit, Capability::SetpointTemp.wire_token(), &value),
                    Some(*unit),
                ))
            }
            UnitAction::SetVane {
                unit,
                axis,
                position,
            } => {
                let capability = Capability::for_vane_axis(*axis);
                let token = position.wire_token();
                self.check_limits(*unit, capability, &token)?;
                Ok((cmd_set(*unit, capability.wire_token(), &token), None))
            }
            UnitAction::StepVane {
                unit,
                axis,
                direction,
            } => {
                let capability = Capability::for_vane_axis(*axis);
                let position = step_vane(self.registry.get(*unit), *axis, *direction)?;
                let token = position.wire_token();
                self.check_limits(*unit, capability, &token)?;
                Ok((cmd_set(*unit, capability.wire_token(), &token), None))
            }
        }
    }

    fn check_limits(&self, unit: UnitId, capability: Capability, value: &str) -> Result<()> {
        match self.registry.get(unit) {
            Some(state) => state.limits.check(capability, value),
            // No data for this unit yet means unconstrained.
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------
    // Connection management
    // -----------------------------------------------------------------

    /// Write one command line, implicitly reconnecting first if the
    /// session is down. A failed reconnect fails the command; nothing is
    /// queued across it.
    async fn send_line(&mut self, command: &str) -> Result<()> {
        if self.transport.is_none() {
            tracing::debug!(command, "send while disconnected, attempting reconnect");
            self.ensure_connected().await?;
        }
        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::NotConnected);
        };

        match transport.send(&encode_command(command)).await {
            Ok(()) => {
                tracing::trace!(command, "sent");
                self.last_tx = Instant::now();
                Ok(())
            }
            // A transient send timeout leaves the socket in place for
            // the next attempt.
            Err(Error::Timeout) => {
                tracing::warn!(command, "send timed out");
                Err(Error::Timeout)
            }
            Err(e) => {
                self.drop_connection(&format!("send failed: {e}")).await;
                Err(e)
            }
        }
    }

    /// Establish the connection if it is not already up: relay proxy
    /// first when configured, then direct, then rediscovery of a moved
    /// gateway.
    async fn ensure_connected(&mut self) -> Result<()> {
        if self.transport.is_some() {
            return Ok(());
        }

        self.reconnect_attempts += 1;
        if self.reconnect_attempts > 1 {
            let _ = self.event_tx.send(GatewayEvent::Reconnecting {
                attempt: self.reconnect_attempts - 1,
            });
        }

        let host = self.config.host.clone();
        match self.dial(&host).await {
            Ok((transport, via_proxy)) => {
                self.install_transport(transport, via_proxy);
                Ok(())
            }
            Err(primary) => {
                tracing::warn!(host = %host, error = %primary, "connect failed");
                if let Some((transport, via_proxy, new_host)) = self.rediscover().await {
                    tracing::info!(host = %new_host, "gateway found at new address");
                    self.store.set(keys::GATEWAY_IP, &new_host);
                    self.config.host = new_host;
                    self.install_transport(transport, via_proxy);
                    Ok(())
                } else {
                    self.last_failure = Some(format!("connect failed: {primary}"));
                    Err(primary)
                }
            }
        }
    }

    /// One connect attempt against a specific host: proxy first when
    /// configured, direct otherwise.
    async fn dial(&self, host: &str) -> Result<(Box<dyn Transport>, bool)> {
        if let Some(proxy) = &self.config.proxy {
            let directive = ProxyDirective {
                target_ip: host.to_string(),
                target_port: self.config.port,
                callback_id: proxy.callback_id.clone(),
                repeat_ms: proxy.repeat_ms,
            };
            match ProxyTransport::negotiate(&proxy.addr, &directive).await {
                Ok(transport) => return Ok((Box::new(transport), true)),
                Err(e) => {
                    tracing::warn!(error = %e, "relay proxy unavailable, falling back to direct");
                }
            }
        }

        let addr = format!("{}:{}", host, self.config.port);
        let transport =
            TcpTransport::connect_with_timeout(&addr, self.config.connect_timeout).await?;
        Ok((Box::new(transport), false))
    }

    /// Ask the address resolver for the gateway's current address and
    /// retry once per candidate.
    async fn rediscover(&mut self) -> Option<(Box<dyn Transport>, bool, String)> {
        let resolver = self.resolver.as_ref()?;
        let mac = self
            .config
            .mac
            .clone()
            .or_else(|| self.store.get(keys::GATEWAY_MAC))?;

        let candidates = match resolver.resolve(&mac).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::debug!(mac = %mac, error = %e, "address resolution failed");
                return None;
            }
        };

        for ip in candidates {
            let host = ip.to_string();
            if host == self.config.host {
                continue;
            }
            match self.dial(&host).await {
                Ok((transport, via_proxy)) => return Some((transport, via_proxy, host)),
                Err(e) => {
                    tracing::debug!(host = %host, error = %e, "candidate address failed");
                }
            }
        }
        None
    }

    fn install_transport(&mut self, transport: Box<dyn Transport>, via_proxy: bool) {
        // Each connection is a new logical run; anything still armed by
        // the previous one is stale and gets dropped unrun.
        self.scheduler.bump_run_stamp();
        self.transport = Some(transport);
        self.via_proxy = via_proxy;
        self.lines = LineBuffer::new();
        self.last_rx = Instant::now();
        self.last_tx = Instant::now();
        self.recv_delay = RECV_DELAY_MIN;
        self.reconnect_attempts = 0;
        self.last_failure = None;

        // Fresh session: re-learn identity and limits, then let the
        // refresh scan requery every unit.
        self.outbound.push_back(cmd_id());
        self.outbound.push_back(cmd_limits(None));
        for state in self.registry.iter_mut() {
            state.last_refresh = None;
        }

        self.scheduler.arm_replace(TaskKey::Receive, self.recv_delay);
        self.scheduler.arm(TaskKey::MasterTick, Duration::ZERO);
        let _ = self.event_tx.send(GatewayEvent::Connected);
    }

    /// Release the socket and clear connection state so the next attempt
    /// starts clean. Queued commands do not survive a disconnect.
    async fn drop_connection(&mut self, reason: &str) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        let _ = transport.close().await;
        self.via_proxy = false;
        self.outbound.clear();
        self.lines = LineBuffer::new();
        self.scheduler.close(&TaskKey::Receive);
        self.last_failure = Some(reason.to_string());
        tracing::info!(reason, "gateway disconnected");
        let _ = self.event_tx.send(GatewayEvent::Disconnected);
    }
}

async fn sleep_until_or_park(wake: Option<Instant>) {
    match wake {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// Compute the next fan speed for a relative step from the last known
/// value.
fn step_fan_speed(state: Option<&UnitState>, direction: StepDirection) -> Result<FanSpeed> {
    let base = match state.and_then(|s| s.fan_speed) {
        Some(FanSpeed::Speed(n)) => i32::from(n),
        // From AUTO (or nothing known) a step up lands on speed 1.
        Some(FanSpeed::Auto) | None => 0,
    };
    let next = match direction {
        StepDirection::Increase => base + 1,
        StepDirection::Decrease => base - 1,
    };
    if next < 1 {
        return Err(Error::InvalidParameter(
            "fan speed already at minimum".into(),
        ));
    }
    if next > i32::from(u8::MAX) {
        return Err(Error::InvalidParameter("fan speed already at maximum".into()));
    }
    Ok(FanSpeed::Speed(next as u8))
}

/// Compute the next vane position for a relative step. Past the extreme
/// end of an axis the position becomes `SWING` when the unit supports
/// it.
fn step_vane(
    state: Option<&UnitState>,
    axis: VaneAxis,
    direction: StepDirection,
) -> Result<VanePosition> {
    let current = state.and_then(|s| match axis {
        VaneAxis::Vertical => s.vane_vertical,
        VaneAxis::Horizontal => s.vane_horizontal,
    });
    let base = match current {
        Some(VanePosition::Position(n)) => i32::from(n),
        // From AUTO/SWING (or nothing known) a step lands on position 1.
        _ => 0,
    };
    let next = match direction {
        StepDirection::Increase => base + 1,
        StepDirection::Decrease => base - 1,
    };

    let capability = Capability::for_vane_axis(axis);
    let limits = state.and_then(|s| s.limits.get(capability));

    if next >= 1 && i32::from(u8::MAX) >= next {
        let allowed = limits.map_or(true, |l| l.allows(&next.to_string()));
        if allowed {
            return Ok(VanePosition::Position(next as u8));
        }
    }

    // Off the end of the axis: sweep when supported.
    let swing_ok = limits.map_or(false, |l| l.allows("SWING"));
    if swing_ok {
        Ok(VanePosition::Swing)
    } else {
        Err(Error::InvalidParameter(format!(
            "{axis} vane already at end of travel"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wmplib_core::limits::Limits;

    fn unit_with(
        fan: Option<FanSpeed>,
        vane: Option<VanePosition>,
        limit_values: &[&str],
    ) -> UnitState {
        let mut registry = UnitRegistry::new();
        let state = registry.provision(UnitId::SINGLE);
        state.fan_speed = fan;
        state.vane_vertical = vane;
        if !limit_values.is_empty() {
            let values: Vec<String> = limit_values.iter().map(|s| s.to_string()).collect();
            state.limits.insert(Capability::FanSpeed, Limits::from_values(&values));
            state
                .limits
                .insert(Capability::VaneUpDown, Limits::from_values(&values));
        }
        state.clone()
    }

    #[test]
    fn fan_step_up_from_known_speed() {
        let state = unit_with(Some(FanSpeed::Speed(2)), None, &[]);
        let next = step_fan_speed(Some(&state), StepDirection::Increase).unwrap();
        assert_eq!(next, FanSpeed::Speed(3));
    }

    #[test]
    fn fan_step_down_below_minimum_rejected() {
        let state = unit_with(Some(FanSpeed::Speed(1)), None, &[]);
        let err = step_fan_speed(Some(&state), StepDirection::Decrease).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn fan_step_up_from_auto_lands_on_one() {
        let state = unit_with(Some(FanSpeed::Auto), None, &[]);
        let next = step_fan_speed(Some(&state), StepDirection::Increase).unwrap();
        assert_eq!(next, FanSpeed::Speed(1));
    }

    #[test]
    fn vane_step_within_limits() {
        let state = unit_with(None, Some(VanePosition::Position(3)), &["AUTO", "1", "2", "3", "4", "SWING"]);
        let next = step_vane(Some(&state), VaneAxis::Vertical, StepDirection::Increase).unwrap();
        assert_eq!(next, VanePosition::Position(4));
    }

    #[test]
    fn vane_step_past_end_becomes_swing() {
        let state = unit_with(None, Some(VanePosition::Position(4)), &["AUTO", "1", "2", "3", "4", "SWING"]);
        let next = step_vane(Some(&state), VaneAxis::Vertical, StepDirection::Increase).unwrap();
        assert_eq!(next, VanePosition::Swing);
    }

    #[test]
    fn vane_step_past_end_without_swing_rejected() {
        let state = unit_with(None, Some(VanePosition::Position(4)), &["AUTO", "1", "2", "3", "4"]);
        let err =
            step_vane(Some(&state), VaneAxis::Vertical, StepDirection::Increase).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn vane_step_below_one_becomes_swing_when_supported() {
        let state = unit_with(None, Some(VanePosition::Position(1)), &["1", "2", "SWING"]);
        let next = step_vane(Some(&state), VaneAxis::Vertical, StepDirection::Decrease).unwrap();
        assert_eq!(next, VanePosition::Swing);
    }
}
