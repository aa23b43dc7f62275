//! Cached per-unit state, built entirely from inbound protocol messages.
//!
//! The gateway pushes `CHN` notifications for every state change, so the
//! registry here is the unit of truth external callers read; `get_*`
//! paths never touch the network. All mutation happens from the driver
//! task's dispatcher, which feeds each change through [`UnitRegistry`]
//! and broadcasts the returned events.
//!
//! # Power/mode folding
//!
//! On the wire, power (`ONOFF`) and mode (`MODE`) are orthogonal; the
//! external model folds them, with `Off` as a mode. The registry keeps
//! the last concrete `MODE` value even while a unit is off, because the
//! gateway does not guarantee `ONOFF`/`MODE` ordering: a `MODE` arriving
//! while the unit is off updates only the remembered mode, and the next
//! `ONOFF,ON` restores it into the visible mode.

use std::collections::{BTreeMap, VecDeque};

use tokio::time::Instant;

use wmplib_core::events::GatewayEvent;
use wmplib_core::limits::{LimitSet, Limits};
use wmplib_core::types::{
    Capability, FanSpeed, OperatingMode, Temperature, UnitId, VaneAxis, VanePosition,
};

/// Highest unit number auto-provisioned from inbound data. Messages for
/// ids beyond this are dropped as malformed rather than growing the table.
const MAX_UNIT_INDEX: u8 = 32;

/// Bounded ring of the most recent `ERRCODE` values.
const ERROR_RING_CAP: usize = 10;

/// Derived state of one air-handling unit.
#[derive(Debug, Clone)]
pub struct UnitState {
    /// Unit number within the gateway.
    pub id: UnitId,
    /// Whether the unit is running; `None` until first reported.
    pub power: Option<bool>,
    /// Last concrete operating mode reported by the wire, retained
    /// across power-off.
    pub last_mode: Option<OperatingMode>,
    /// Current fan speed.
    pub fan_speed: Option<FanSpeed>,
    /// Up/down vane position.
    pub vane_vertical: Option<VanePosition>,
    /// Left/right vane position.
    pub vane_horizontal: Option<VanePosition>,
    /// Setpoint temperature.
    pub setpoint: Option<Temperature>,
    /// Ambient temperature at the unit.
    pub ambient: Option<Temperature>,
    /// `ERRSTATUS` value, verbatim.
    pub error_status: Option<String>,
    /// Ring of the last `ERRCODE` values, oldest first.
    pub error_codes: VecDeque<String>,
    /// Advertised limits for this unit.
    pub limits: LimitSet,
    /// When a full-status refresh was last requested for this unit.
    pub last_refresh: Option<Instant>,
}

impl UnitState {
    fn new(id: UnitId) -> Self {
        Self {
            id,
            power: None,
            last_mode: None,
            fan_speed: None,
            vane_vertical: None,
            vane_horizontal: None,
            setpoint: None,
            ambient: None,
            error_status: None,
            error_codes: VecDeque::new(),
            limits: LimitSet::new(),
            last_refresh: None,
        }
    }

    /// The externally visible operating mode: `Off` while the unit is
    /// powered down, otherwise the last concrete mode.
    pub fn visible_mode(&self) -> Option<OperatingMode> {
        match self.power {
            Some(false) => Some(OperatingMode::Off),
            _ => self.last_mode,
        }
    }

    /// The most recent error code, if any.
    pub fn last_error_code(&self) -> Option<&str> {
        self.error_codes.back().map(String::as_str)
    }

    fn push_error_code(&mut self, code: String) {
        if self.error_codes.len() == ERROR_RING_CAP {
            self.error_codes.pop_front();
        }
        self.error_codes.push_back(code);
    }
}

/// All units known for one gateway, keyed by unit number.
///
/// Units are created when the gateway first reports data for their id or
/// when provisioned up front; they are never deleted while the gateway
/// exists.
#[derive(Debug, Default)]
pub struct UnitRegistry {
    units: BTreeMap<UnitId, UnitState>,
}

impl UnitRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a unit up front (before the gateway reports it).
    pub fn provision(&mut self, id: UnitId) -> &mut UnitState {
        self.units.entry(id).or_insert_with(|| UnitState::new(id))
    }

    /// Look up a unit.
    pub fn get(&self, id: UnitId) -> Option<&UnitState> {
        self.units.get(&id)
    }

    /// Look up a unit mutably.
    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut UnitState> {
        self.units.get_mut(&id)
    }

    /// Iterate all units in id order.
    pub fn iter(&self) -> impl Iterator<Item = &UnitState> {
        self.units.values()
    }

    /// Iterate all units mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut UnitState> {
        self.units.values_mut()
    }

    /// Number of known units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether no unit has been seen or provisioned yet.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Snapshot of every unit, for handing across the driver boundary.
    pub fn snapshot(&self) -> Vec<UnitState> {
        self.units.values().cloned().collect()
    }

    /// Resolve the target of an inbound message: an explicit unit number,
    /// or the implicit single unit when absent. Returns `None` (dropping
    /// the message) for unit numbers outside the sane range.
    fn resolve(&mut self, unit: Option<UnitId>) -> Option<&mut UnitState> {
        let id = unit.unwrap_or(UnitId::SINGLE);
        if id.index() == 0 || id.index() > MAX_UNIT_INDEX {
            tracing::warn!(unit = %id, "message for implausible unit id dropped");
            return None;
        }
        Some(self.provision(id))
    }

    /// Apply a `CHN` state-change notification.
    ///
    /// Pure state update; returns the events to broadcast. Unknown
    /// functions and unparseable values are logged and dropped, never
    /// fatal.
    pub fn apply_change(
        &mut self,
        unit: Option<UnitId>,
        function: &str,
        value: &str,
    ) -> Vec<GatewayEvent> {
        let Some(state) = self.resolve(unit) else {
            return Vec::new();
        };
        let id = state.id;

        let capability = match function.parse::<Capability>() {
            Ok(cap) => cap,
            Err(_) => {
                tracing::debug!(unit = %id, function, "unknown function in CHN dropped");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        match capability {
            Capability::OnOff => {
                let on = value.eq_ignore_ascii_case("ON");
                if !on && !value.eq_ignore_ascii_case("OFF") {
                    tracing::debug!(unit = %id, value, "bad ONOFF value dropped");
                    return events;
                }
                let before = state.visible_mode();
                if state.power != Some(on) {
                    state.power = Some(on);
                    events.push(GatewayEvent::PowerChanged { unit: id, on });
                    // Power flips move the visible mode between Off and
                    // the remembered concrete mode.
                    let after = state.visible_mode();
                    if let Some(mode) = after {
                        if before != after {
                            events.push(GatewayEvent::ModeChanged { unit: id, mode });
                        }
                    }
                }
            }
            Capability::Mode => {
                let mode = match value.parse::<OperatingMode>() {
                    Ok(OperatingMode::Off) | Err(_) => {
                        tracing::debug!(unit = %id, value, "bad MODE value dropped");
                        return events;
                    }
                    Ok(mode) => mode,
                };
                let was_visible = state.visible_mode();
                state.last_mode = Some(mode);
                // Only surfaces while the unit is not off; the remembered
                // mode is updated unconditionally above.
                if state.power != Some(false) && was_visible != Some(mode) {
                    events.push(GatewayEvent::ModeChanged { unit: id, mode });
                }
            }
            Capability::SetpointTemp => match value.parse::<i32>().ok().and_then(Temperature::from_wire) {
                Some(setpoint) => {
                    if state.setpoint != Some(setpoint) {
                        state.setpoint = Some(setpoint);
                        events.push(GatewayEvent::SetpointChanged { unit: id, setpoint });
                    }
                }
                None => {
                    tracing::debug!(unit = %id, value, "SETPTEMP outside sane envelope dropped");
                }
            },
            Capability::AmbientTemp => match value.parse::<i32>().ok().and_then(Temperature::from_wire) {
                Some(ambient) => {
                    if state.ambient != Some(ambient) {
                        state.ambient = Some(ambient);
                        events.push(GatewayEvent::AmbientChanged { unit: id, ambient });
                    }
                }
                None => {
                    tracing::debug!(unit = %id, value, "AMBTEMP outside sane envelope dropped");
                }
            },
            Capability::FanSpeed => match value.parse::<FanSpeed>() {
                Ok(speed) => {
                    if state.fan_speed != Some(speed) {
                        state.fan_speed = Some(speed);
                        events.push(GatewayEvent::FanSpeedChanged { unit: id, speed });
                    }
                }
                Err(_) => {
                    tracing::debug!(unit = %id, value, "bad FANSP value dropped");
                }
            },
            Capability::VaneUpDown | Capability::VaneLeftRight => {
                let axis = if capability == Capability::VaneUpDown {
                    VaneAxis::Vertical
                } else {
                    VaneAxis::Horizontal
                };
                match value.parse::<VanePosition>() {
                    Ok(position) => {
                        let slot = match axis {
                            VaneAxis::Vertical => &mut state.vane_vertical,
                            VaneAxis::Horizontal => &mut state.vane_horizontal,
                        };
                        if *slot != Some(position) {
                            *slot = Some(position);
                            events.push(GatewayEvent::VaneChanged {
                                unit: id,
                                axis,
                                position,
                            });
                        }
                    }
                    Err(_) => {
                        tracing::debug!(unit = %id, value, axis = %axis, "bad vane value dropped");
                    }
                }
            }
            Capability::ErrStatus => {
                state.error_status = Some(value.to_string());
                events.push(GatewayEvent::UnitError {
                    unit: id,
                    status: Some(value.to_string()),
                    code: state.last_error_code().map(str::to_string),
                });
            }
            Capability::ErrCode => {
                state.push_error_code(value.to_string());
                events.push(GatewayEvent::UnitError {
                    unit: id,
                    status: state.error_status.clone(),
                    code: Some(value.to_string()),
                });
            }
        }
        events
    }

    /// Apply a `LIMITS` advertisement.
    ///
    /// A unit-scoped advertisement updates that unit. A gateway-scoped
    /// one (no unit number) is fanned out to every known unit -- the
    /// protocol reports limits per gateway even though capabilities are
    /// plausibly per-unit, so per-unit storage is kept authoritative and
    /// the fan-out is logged.
    pub fn apply_limits(&mut self, unit: Option<UnitId>, function: &str, values: &[String]) {
        let capability = match function.parse::<Capability>() {
            Ok(cap) => cap,
            Err(_) => {
                tracing::debug!(function, "unknown function in LIMITS dropped");
                return;
            }
        };
        let limits = Limits::from_values(values);

        match unit {
            Some(id) => {
                let Some(state) = self.resolve(Some(id)) else {
                    return;
                };
                state.limits.insert(capability, limits);
            }
            None => {
                if self.units.is_empty() {
                    // Limits usually arrive right after connect, before
                    // the first unit data; seed the implicit unit.
                    self.provision(UnitId::SINGLE);
                }
                tracing::debug!(
                    capability = %capability,
                    units = self.units.len(),
                    "gateway-scoped LIMITS fanned out to all units"
                );
                for state in self.units.values_mut() {
                    state.limits.insert(capability, limits.clone());
                }
            }
        }
    }
}
