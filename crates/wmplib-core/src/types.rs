//! Core types used throughout wmplib.
//!
//! These types form the externally visible model of a WMP gateway and its
//! air-handling units. Wire tokens are uppercase ASCII; every `FromStr`
//! here is case-insensitive so that values read back from a host attribute
//! store parse the same way as values off the wire.

use std::fmt;
use std::str::FromStr;

/// Identifier of one air-handling unit behind a gateway.
///
/// Unit numbers are small positive integers, unique within their gateway.
/// Single-unit gateways omit the unit number on the wire; such messages
/// address [`UnitId::SINGLE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u8);

impl UnitId {
    /// The implicit unit of a single-unit gateway.
    pub const SINGLE: UnitId = UnitId(1);

    /// Create a `UnitId` from a raw unit number.
    pub fn from_index(index: u8) -> Self {
        UnitId(index)
    }

    /// Return the raw unit number.
    pub fn index(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Operating mode of an air-handling unit, in the externally visible model.
///
/// The WMP wire protocol treats power (`ONOFF`) and mode (`MODE`) as
/// orthogonal functions; the external model folds them together, so `Off`
/// is a mode here even though it never appears as a `MODE` wire value.
/// The unit's last concrete mode is remembered separately so that turning
/// the unit back on restores it (see the unit registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingMode {
    /// Unit is powered off. Externally a mode, never a `MODE` wire token.
    Off,
    /// Automatic heat/cool changeover.
    Auto,
    /// Heating.
    Heat,
    /// Dehumidify.
    Dry,
    /// Fan only, no conditioning.
    Fan,
    /// Cooling.
    Cool,
}

impl OperatingMode {
    /// The wire token for this mode, or `None` for [`OperatingMode::Off`]
    /// (power is commanded through `ONOFF`, not `MODE`).
    pub fn wire_token(&self) -> Option<&'static str> {
        match self {
            OperatingMode::Off => None,
            OperatingMode::Auto => Some("AUTO"),
            OperatingMode::Heat => Some("HEAT"),
            OperatingMode::Dry => Some("DRY"),
            OperatingMode::Fan => Some("FAN"),
            OperatingMode::Cool => Some("COOL"),
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperatingMode::Off => "off",
            OperatingMode::Auto => "auto",
            OperatingMode::Heat => "heat",
            OperatingMode::Dry => "dry",
            OperatingMode::Fan => "fan",
            OperatingMode::Cool => "cool",
        };
        write!(f, "{s}")
    }
}

/// Error returned when a string cannot be parsed into an [`OperatingMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseModeError(pub String);

impl fmt::Display for ParseModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown operating mode: {}", self.0)
    }
}

impl std::error::Error for ParseModeError {}

impl FromStr for OperatingMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OFF" => Ok(OperatingMode::Off),
            "AUTO" => Ok(OperatingMode::Auto),
            "HEAT" => Ok(OperatingMode::Heat),
            "DRY" => Ok(OperatingMode::Dry),
            "FAN" | "VENT" => Ok(OperatingMode::Fan),
            "COOL" => Ok(OperatingMode::Cool),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// Fan speed of an air-handling unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FanSpeed {
    /// Speed chosen by the unit.
    Auto,
    /// A fixed numeric speed, 1-based.
    Speed(u8),
}

impl FanSpeed {
    /// The wire token for this speed (`AUTO` or the decimal number).
    pub fn wire_token(&self) -> String {
        match self {
            FanSpeed::Auto => "AUTO".to_string(),
            FanSpeed::Speed(n) => n.to_string(),
        }
    }
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanSpeed::Auto => write!(f, "auto"),
            FanSpeed::Speed(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for FanSpeed {
    type Err = ParseModeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("AUTO") {
            return Ok(FanSpeed::Auto);
        }
        s.parse::<u8>()
            .map(FanSpeed::Speed)
            .map_err(|_| ParseModeError(s.to_string()))
    }
}

/// Position of an air-direction vane on one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VanePosition {
    /// Position chosen by the unit.
    Auto,
    /// A fixed numeric position, 1-based.
    Position(u8),
    /// Continuous sweep across the axis.
    Swing,
}

impl VanePosition {
    /// The wire token for this position (`AUTO`, `SWING`, or the number).
    pub fn wire_token(&self) -> String {
        match self {
            VanePosition::Auto => "AUTO".to_string(),
            VanePosition::Position(n) => n.to_string(),
            VanePosition::Swing => "SWING".to_string(),
        }
    }
}

impl fmt::Display for VanePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VanePosition::Auto => write!(f, "auto"),
            VanePosition::Position(n) => write!(f, "{n}"),
            VanePosition::Swing => write!(f, "swing"),
        }
    }
}

impl FromStr for VanePosition {
    type Err = ParseModeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("AUTO") {
            return Ok(VanePosition::Auto);
        }
        if s.eq_ignore_ascii_case("SWING") {
            return Ok(VanePosition::Swing);
        }
        s.parse::<u8>()
            .map(VanePosition::Position)
            .map_err(|_| ParseModeError(s.to_string()))
    }
}

/// The two vane axes a unit may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaneAxis {
    /// Up/down louver (`VANEUD`).
    Vertical,
    /// Left/right louver (`VANELR`).
    Horizontal,
}

impl fmt::Display for VaneAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaneAxis::Vertical => write!(f, "vertical"),
            VaneAxis::Horizontal => write!(f, "horizontal"),
        }
    }
}

/// Direction of a relative fan-speed or vane step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    /// Towards position 1 (vane up / vane left / fan slower).
    Decrease,
    /// Away from position 1 (vane down / vane right / fan faster).
    Increase,
}

/// Temperature scale used for the externally visible model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemperatureScale {
    /// Degrees Celsius.
    #[default]
    Celsius,
    /// Degrees Fahrenheit.
    Fahrenheit,
}

impl FromStr for TemperatureScale {
    type Err = ParseModeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "C" | "CELSIUS" => Ok(TemperatureScale::Celsius),
            "F" | "FAHRENHEIT" => Ok(TemperatureScale::Fahrenheit),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// A temperature, stored in tenths of a degree Celsius as transmitted by
/// the WMP protocol (`SETPTEMP`/`AMBTEMP` values).
///
/// The gateway reports a large sentinel value when a unit has no reading;
/// [`Temperature::from_wire`] rejects the sentinel and anything outside a
/// sane envelope instead of applying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Temperature(i32);

impl Temperature {
    /// Smallest wire value accepted as a real reading (-100.0 C).
    const MIN_TENTHS: i32 = -1000;
    /// Largest wire value accepted as a real reading (100.0 C).
    const MAX_TENTHS: i32 = 1000;

    /// Construct from tenths of a degree Celsius.
    pub fn from_tenths(tenths: i32) -> Self {
        Temperature(tenths)
    }

    /// Construct from whole degrees Celsius.
    pub fn from_celsius(deg: f64) -> Self {
        Temperature((deg * 10.0).round() as i32)
    }

    /// Construct from whole degrees Fahrenheit.
    pub fn from_fahrenheit(deg: f64) -> Self {
        Self::from_celsius((deg - 32.0) * 5.0 / 9.0)
    }

    /// Parse a raw wire value, rejecting the "no data" sentinel and
    /// readings outside the sane envelope.
    pub fn from_wire(raw: i32) -> Option<Self> {
        if (Self::MIN_TENTHS..=Self::MAX_TENTHS).contains(&raw) {
            Some(Temperature(raw))
        } else {
            None
        }
    }

    /// Tenths of a degree Celsius, the wire representation.
    pub fn tenths(&self) -> i32 {
        self.0
    }

    /// Degrees Celsius.
    pub fn celsius(&self) -> f64 {
        self.0 as f64 / 10.0
    }

    /// Degrees Fahrenheit.
    pub fn fahrenheit(&self) -> f64 {
        self.celsius() * 9.0 / 5.0 + 32.0
    }

    /// Degrees in the given scale.
    pub fn in_scale(&self, scale: TemperatureScale) -> f64 {
        match scale {
            TemperatureScale::Celsius => self.celsius(),
            TemperatureScale::Fahrenheit => self.fahrenheit(),
        }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.celsius())
    }
}

/// A WMP capability (function) name, as carried by `CHN`, `LIMITS`, `GET`
/// and `SET` lines.
///
/// This is a closed enum: an unrecognised wire token parses to an error
/// rather than a stringly-typed catch-all, so dispatch sites handle the
/// unknown case in one explicit branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Unit power (`ONOFF`).
    OnOff,
    /// Operating mode (`MODE`).
    Mode,
    /// Setpoint temperature in tenths of a degree C (`SETPTEMP`).
    SetpointTemp,
    /// Fan speed (`FANSP`).
    FanSpeed,
    /// Up/down vane position (`VANEUD`).
    VaneUpDown,
    /// Left/right vane position (`VANELR`).
    VaneLeftRight,
    /// Ambient temperature in tenths of a degree C (`AMBTEMP`).
    AmbientTemp,
    /// Unit error status flag (`ERRSTATUS`).
    ErrStatus,
    /// Unit error code (`ERRCODE`).
    ErrCode,
}

impl Capability {
    /// The wire token for this capability.
    pub fn wire_token(&self) -> &'static str {
        match self {
            Capability::OnOff => "ONOFF",
            Capability::Mode => "MODE",
            Capability::SetpointTemp => "SETPTEMP",
            Capability::FanSpeed => "FANSP",
            Capability::VaneUpDown => "VANEUD",
            Capability::VaneLeftRight => "VANELR",
            Capability::AmbientTemp => "AMBTEMP",
            Capability::ErrStatus => "ERRSTATUS",
            Capability::ErrCode => "ERRCODE",
        }
    }

    /// The capability controlling the given vane axis.
    pub fn for_vane_axis(axis: VaneAxis) -> Capability {
        match axis {
            VaneAxis::Vertical => Capability::VaneUpDown,
            VaneAxis::Horizontal => Capability::VaneLeftRight,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_token())
    }
}

/// Error returned when a wire token is not a known [`Capability`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCapabilityError(pub String);

impl fmt::Display for ParseCapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown capability: {}", self.0)
    }
}

impl std::error::Error for ParseCapabilityError {}

impl FromStr for Capability {
    type Err = ParseCapabilityError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONOFF" => Ok(Capability::OnOff),
            "MODE" => Ok(Capability::Mode),
            "SETPTEMP" => Ok(Capability::SetpointTemp),
            "FANSP" => Ok(Capability::FanSpeed),
            "VANEUD" => Ok(Capability::VaneUpDown),
            "VANELR" => Ok(Capability::VaneLeftRight),
            "AMBTEMP" => Ok(Capability::AmbientTemp),
            "ERRSTATUS" => Ok(Capability::ErrStatus),
            "ERRCODE" => Ok(Capability::ErrCode),
            other => Err(ParseCapabilityError(other.to_string())),
        }
    }
}

/// Gateway identity, parsed from an `ID:` response or a discovery reply.
///
/// Wire layout: `<model>,<mac>,<ip>,<protocol>,<fw>,<rssi>,<name>,<flags>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GatewayInfo {
    /// Gateway model string (e.g. `WMP-1`).
    pub model: String,
    /// Hardware MAC address, as printed by the gateway (no separators).
    pub mac: String,
    /// IP address the gateway believes it has.
    pub ip: String,
    /// Protocol tag; always `ASCII` for WMP gateways.
    pub protocol: String,
    /// Firmware version string.
    pub firmware: String,
    /// Wi-Fi signal strength in dBm, when reported.
    pub rssi: Option<i32>,
    /// User-assigned gateway name.
    pub name: String,
    /// Vendor flags field, stored verbatim.
    pub flags: String,
}

impl GatewayInfo {
    /// Parse the comma-separated payload of an `ID:` line.
    ///
    /// Trailing fields are optional; fewer than four fields is malformed.
    pub fn parse(payload: &str) -> std::result::Result<Self, ParseModeError> {
        let fields: Vec<&str> = payload.split(',').map(str::trim).collect();
        if fields.len() < 4 {
            return Err(ParseModeError(payload.to_string()));
        }
        let field = |i: usize| fields.get(i).copied().unwrap_or("").to_string();
        Ok(GatewayInfo {
            model: field(0),
            mac: field(1),
            ip: field(2),
            protocol: field(3),
            firmware: field(4),
            rssi: fields.get(5).and_then(|s| s.parse().ok()),
            name: field(6),
            flags: field(7),
        })
    }
}

/// Normalize a MAC address for comparison: strip separators, lowercase.
///
/// Gateways print MACs without separators; host attribute stores and
/// neighbor tables use `:` or `-`.
pub fn normalize_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
