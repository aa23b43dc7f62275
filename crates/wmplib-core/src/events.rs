//! Asynchronous gateway event types.
//!
//! Events are emitted by the gateway driver through a [`tokio::sync::broadcast`]
//! channel whenever an inbound protocol message changes unit or connection
//! state. Host integrations subscribe to these for real-time updates instead
//! of polling the unit registry.

use crate::types::{
    FanSpeed, OperatingMode, Temperature, UnitId, VaneAxis, VanePosition,
};

/// An event emitted by the gateway driver when state changes.
///
/// Delivered on a best-effort basis through a bounded broadcast channel;
/// slow consumers may miss events during bursts (e.g. a full-status refresh
/// answering with one `CHN` per function).
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// The TCP session to the gateway was established.
    Connected,

    /// The TCP session was lost or force-closed.
    Disconnected,

    /// A reconnect attempt is in progress.
    Reconnecting {
        /// The reconnection attempt number (1-based).
        attempt: u32,
    },

    /// A unit was switched on or off.
    PowerChanged {
        /// The unit that changed.
        unit: UnitId,
        /// `true` if the unit is now running.
        on: bool,
    },

    /// A unit's externally visible operating mode changed.
    ModeChanged {
        /// The unit that changed.
        unit: UnitId,
        /// The new visible mode (`Off` when the unit powers down).
        mode: OperatingMode,
    },

    /// A unit's fan speed changed.
    FanSpeedChanged {
        /// The unit that changed.
        unit: UnitId,
        /// The new fan speed.
        speed: FanSpeed,
    },

    /// A unit's vane position changed on one axis.
    VaneChanged {
        /// The unit that changed.
        unit: UnitId,
        /// Which louver axis moved.
        axis: VaneAxis,
        /// The new position.
        position: VanePosition,
    },

    /// A unit's setpoint temperature changed.
    SetpointChanged {
        /// The unit that changed.
        unit: UnitId,
        /// The new setpoint.
        setpoint: Temperature,
    },

    /// A unit reported a new ambient temperature reading.
    AmbientChanged {
        /// The unit that reported.
        unit: UnitId,
        /// The new reading.
        ambient: Temperature,
    },

    /// A unit reported an error status or error code.
    UnitError {
        /// The unit that reported.
        unit: UnitId,
        /// The `ERRSTATUS` value, verbatim.
        status: Option<String>,
        /// The most recent `ERRCODE` value, if any.
        code: Option<String>,
    },
}
