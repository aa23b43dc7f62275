//! The public handle to a running gateway driver.
//!
//! [`GatewayClient`] is the only surface external callers touch: command
//! submission per supported action, unit snapshots, a status/failure
//! flag, and the event subscription. Every method is a round trip to the
//! driver task over a channel, so callers never block on the network --
//! the reply arrives when the driver has finished the (bounded) work.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wmplib_core::error::{Error, Result};
use wmplib_core::events::GatewayEvent;
use wmplib_core::types::{
    FanSpeed, GatewayInfo, OperatingMode, StepDirection, Temperature, TemperatureScale, UnitId,
    VaneAxis, VanePosition,
};

use crate::driver::{Request, UnitAction};
use crate::state::UnitState;

/// Ceiling on one request round trip, covering a worst-case implicit
/// reconnect (proxy handshake + direct dial + rediscovery).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection status and failure flag for one gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayStatus {
    /// Whether the TCP session is currently up.
    pub connected: bool,
    /// Whether the session runs through the relay proxy.
    pub via_proxy: bool,
    /// Whether the most recent failure is still standing.
    pub failed: bool,
    /// Human-readable detail of the standing failure, if any.
    pub detail: Option<String>,
}

/// Handle to a running gateway driver.
///
/// Cheap operations (snapshots, status) and command submission share the
/// same channel; commands are serialized in arrival order by the driver,
/// which sends at most one line at a time per connection.
pub struct GatewayClient {
    tx: mpsc::Sender<Request>,
    event_tx: broadcast::Sender<GatewayEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    scale: TemperatureScale,
}

impl GatewayClient {
    pub(crate) fn new(
        tx: mpsc::Sender<Request>,
        event_tx: broadcast::Sender<GatewayEvent>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
        scale: TemperatureScale,
    ) -> Self {
        Self {
            tx,
            event_tx,
            cancel,
            task,
            scale,
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::NotConnected)?;
        match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn action(&self, action: UnitAction) -> Result<()> {
        self.request(|reply| Request::Action { action, reply })
            .await?
    }

    /// Eagerly establish the connection (used by the builder).
    pub(crate) async fn establish(&self) -> Result<()> {
        self.request(|reply| Request::Connect { reply }).await?
    }

    /// Switch a unit on or off.
    pub async fn set_power(&self, unit: UnitId, on: bool) -> Result<()> {
        self.action(UnitAction::SetPower { unit, on }).await
    }

    /// Set a unit's operating mode. [`OperatingMode::Off`] powers the
    /// unit down, matching the externally visible model.
    pub async fn set_mode(&self, unit: UnitId, mode: OperatingMode) -> Result<()> {
        self.action(UnitAction::SetMode { unit, mode }).await
    }

    /// Set a unit's fan speed.
    pub async fn set_fan_speed(&self, unit: UnitId, speed: FanSpeed) -> Result<()> {
        self.action(UnitAction::SetFanSpeed { unit, speed }).await
    }

    /// Step the fan one speed faster.
    pub async fn fan_speed_up(&self, unit: UnitId) -> Result<()> {
        self.action(UnitAction::StepFanSpeed {
            unit,
            direction: StepDirection::Increase,
        })
        .await
    }

    /// Step the fan one speed slower.
    pub async fn fan_speed_down(&self, unit: UnitId) -> Result<()> {
        self.action(UnitAction::StepFanSpeed {
            unit,
            direction: StepDirection::Decrease,
        })
        .await
    }

    /// Set a unit's setpoint temperature. The unit may clamp the value;
    /// the driver re-queries the setpoint right after, so the registry
    /// reflects the clamped result promptly.
    pub async fn set_setpoint(&self, unit: UnitId, setpoint: Temperature) -> Result<()> {
        self.action(UnitAction::SetSetpoint { unit, setpoint }).await
    }

    /// Set a vane to an absolute position.
    pub async fn set_vane(
        &self,
        unit: UnitId,
        axis: VaneAxis,
        position: VanePosition,
    ) -> Result<()> {
        self.action(UnitAction::SetVane {
            unit,
            axis,
            position,
        })
        .await
    }

    /// Tilt the up/down vane one step up.
    pub async fn vane_up(&self, unit: UnitId) -> Result<()> {
        self.step_vane(unit, VaneAxis::Vertical, StepDirection::Decrease)
            .await
    }

    /// Tilt the up/down vane one step down.
    pub async fn vane_down(&self, unit: UnitId) -> Result<()> {
        self.step_vane(unit, VaneAxis::Vertical, StepDirection::Increase)
            .await
    }

    /// Swing the left/right vane one step left.
    pub async fn vane_left(&self, unit: UnitId) -> Result<()> {
        self.step_vane(unit, VaneAxis::Horizontal, StepDirection::Decrease)
            .await
    }

    /// Swing the left/right vane one step right.
    pub async fn vane_right(&self, unit: UnitId) -> Result<()> {
        self.step_vane(unit, VaneAxis::Horizontal, StepDirection::Increase)
            .await
    }

    async fn step_vane(
        &self,
        unit: UnitId,
        axis: VaneAxis,
        direction: StepDirection,
    ) -> Result<()> {
        self.action(UnitAction::StepVane {
            unit,
            axis,
            direction,
        })
        .await
    }

    /// Request an immediate full-status refresh of one unit.
    pub async fn refresh(&self, unit: UnitId) -> Result<()> {
        self.request(|reply| Request::Refresh { unit, reply }).await?
    }

    /// Rename the gateway (1-32 ASCII characters).
    pub async fn rename(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.request(|reply| Request::Rename { name, reply }).await?
    }

    /// Snapshot of every known unit, in id order.
    pub async fn units(&self) -> Result<Vec<UnitState>> {
        self.request(|reply| Request::Units { reply }).await
    }

    /// Snapshot of one unit.
    pub async fn unit(&self, id: UnitId) -> Result<Option<UnitState>> {
        self.request(|reply| Request::Unit { id, reply }).await
    }

    /// Connection status and failure flag.
    pub async fn status(&self) -> Result<GatewayStatus> {
        self.request(|reply| Request::Status { reply }).await
    }

    /// The gateway's last reported identity, if it has answered `ID` yet.
    pub async fn identity(&self) -> Result<Option<GatewayInfo>> {
        self.request(|reply| Request::Identity { reply }).await
    }

    /// Subscribe to state-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.event_tx.subscribe()
    }

    /// The temperature scale of the externally visible model.
    pub fn temperature_scale(&self) -> TemperatureScale {
        self.scale
    }

    /// Shut the driver down and release the connection.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}
