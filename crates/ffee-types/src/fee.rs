//! Decoded F-FEE hardware state: DEB operating mode, AEB status and the
//! DTC IN_MOD routing fields.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::FeeError;

/// Accumulated OUTBUFF overflow counters, one per DTC IN_MOD channel.
pub type Outbuff = [u32; 8];

/// Position in DTC IN_MOD order for each `OUTBUFF_x` flag (index `x - 1`).
pub const OUTBUFF_TO_DTC: [usize; 8] = [0, 2, 1, 3, 4, 6, 5, 7];

// ────────────────────────────────────────────────────────────────────────────
// DEB
// ────────────────────────────────────────────────────────────────────────────

/// Global operating mode of the DEB as reported in `STATUS/OPER_MOD`.
///
/// Values outside the documented set are kept as [`DebMode::Unknown`] so the
/// raw code survives for logging; no mode indicator is associated with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebMode {
    FullImage,
    FullImagePattern,
    Windowing,
    WindowingPattern,
    Standby,
    On,
    Unknown(u8),
}

impl DebMode {
    /// Every mode that has an indicator, in display order.
    pub const KNOWN: [DebMode; 6] = [
        DebMode::On,
        DebMode::Standby,
        DebMode::FullImage,
        DebMode::FullImagePattern,
        DebMode::Windowing,
        DebMode::WindowingPattern,
    ];

    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => DebMode::FullImage,
            1 => DebMode::FullImagePattern,
            2 => DebMode::Windowing,
            3 => DebMode::WindowingPattern,
            6 => DebMode::Standby,
            7 => DebMode::On,
            other => DebMode::Unknown(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            DebMode::FullImage => 0,
            DebMode::FullImagePattern => 1,
            DebMode::Windowing => 2,
            DebMode::WindowingPattern => 3,
            DebMode::Standby => 6,
            DebMode::On => 7,
            DebMode::Unknown(raw) => raw,
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, DebMode::Unknown(_))
    }
}

impl fmt::Display for DebMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebMode::FullImage => write!(f, "FULL_IMAGE"),
            DebMode::FullImagePattern => write!(f, "FULL_IMAGE_PATTERN"),
            DebMode::Windowing => write!(f, "WINDOWING"),
            DebMode::WindowingPattern => write!(f, "WINDOWING_PATTERN"),
            DebMode::Standby => write!(f, "STANDBY"),
            DebMode::On => write!(f, "ON"),
            DebMode::Unknown(raw) => write!(f, "UNKNOWN({raw})"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// AEB
// ────────────────────────────────────────────────────────────────────────────

/// One of the four analogue electronics boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AebUnit {
    Aeb1,
    Aeb2,
    Aeb3,
    Aeb4,
}

impl AebUnit {
    pub const ALL: [AebUnit; 4] = [AebUnit::Aeb1, AebUnit::Aeb2, AebUnit::Aeb3, AebUnit::Aeb4];

    /// `1..=4` → unit.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(AebUnit::Aeb1),
            2 => Some(AebUnit::Aeb2),
            3 => Some(AebUnit::Aeb3),
            4 => Some(AebUnit::Aeb4),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            AebUnit::Aeb1 => 1,
            AebUnit::Aeb2 => 2,
            AebUnit::Aeb3 => 3,
            AebUnit::Aeb4 => 4,
        }
    }

    /// Zero-based position, convenient for per-unit arrays.
    pub fn index(self) -> usize {
        usize::from(self.number() - 1)
    }
}

impl fmt::Display for AebUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AEB{}", self.number())
    }
}

impl FromStr for AebUnit {
    type Err = FeeError;

    /// Accepts `AEB1`..`AEB4`, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        upper
            .strip_prefix("AEB")
            .and_then(|n| n.parse::<u8>().ok())
            .and_then(AebUnit::from_number)
            .ok_or_else(|| FeeError::Decode(format!("not an AEB unit id: '{s}'")))
    }
}

/// Mutually-exclusive operating sub-states of an AEB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AebSubState {
    Init,
    PowerUp,
    PowerDown,
    Config,
    Image,
    Pattern,
}

impl AebSubState {
    pub const ALL: [AebSubState; 6] = [
        AebSubState::Init,
        AebSubState::PowerUp,
        AebSubState::PowerDown,
        AebSubState::Config,
        AebSubState::Image,
        AebSubState::Pattern,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            AebSubState::Init => "init",
            AebSubState::PowerUp => "power_up",
            AebSubState::PowerDown => "power_down",
            AebSubState::Config => "config",
            AebSubState::Image => "image",
            AebSubState::Pattern => "pattern",
        }
    }
}

/// Raw `STATUS/AEB_STATUS` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AebStatus {
    Off,
    Init,
    Config,
    Image,
    PowerDown,
    PowerUp,
    Pattern,
    Failure,
    Unknown(u8),
}

impl AebStatus {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => AebStatus::Off,
            1 => AebStatus::Init,
            2 => AebStatus::Config,
            3 => AebStatus::Image,
            4 => AebStatus::PowerDown,
            5 => AebStatus::PowerUp,
            6 => AebStatus::Pattern,
            7 => AebStatus::Failure,
            other => AebStatus::Unknown(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            AebStatus::Off => 0,
            AebStatus::Init => 1,
            AebStatus::Config => 2,
            AebStatus::Image => 3,
            AebStatus::PowerDown => 4,
            AebStatus::PowerUp => 5,
            AebStatus::Pattern => 6,
            AebStatus::Failure => 7,
            AebStatus::Unknown(raw) => raw,
        }
    }

    /// The sub-state this status activates, if any.
    pub fn sub_state(self) -> Option<AebSubState> {
        match self {
            AebStatus::Init => Some(AebSubState::Init),
            AebStatus::Config => Some(AebSubState::Config),
            AebStatus::Image => Some(AebSubState::Image),
            AebStatus::PowerDown => Some(AebSubState::PowerDown),
            AebStatus::PowerUp => Some(AebSubState::PowerUp),
            AebStatus::Pattern => Some(AebSubState::Pattern),
            AebStatus::Off | AebStatus::Failure | AebStatus::Unknown(_) => None,
        }
    }
}

impl fmt::Display for AebStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AebStatus::Off => write!(f, "OFF"),
            AebStatus::Init => write!(f, "INIT"),
            AebStatus::Config => write!(f, "CONFIG"),
            AebStatus::Image => write!(f, "IMAGE"),
            AebStatus::PowerDown => write!(f, "POWER_DOWN"),
            AebStatus::PowerUp => write!(f, "POWER_UP"),
            AebStatus::Pattern => write!(f, "PATTERN"),
            AebStatus::Failure => write!(f, "FAILURE"),
            AebStatus::Unknown(raw) => write!(f, "UNKNOWN({raw})"),
        }
    }
}

/// Which indicator of an AEB an [`AebStateKey`] addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AebIndicator {
    /// The power latch.
    OnOff,
    Sub(AebSubState),
}

/// `aeb{n}_{suffix}` key carried by `AebStateChanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AebStateKey {
    pub unit: AebUnit,
    pub indicator: AebIndicator,
}

impl AebStateKey {
    pub fn on_off(unit: AebUnit) -> Self {
        Self {
            unit,
            indicator: AebIndicator::OnOff,
        }
    }

    pub fn sub_state(unit: AebUnit, sub: AebSubState) -> Self {
        Self {
            unit,
            indicator: AebIndicator::Sub(sub),
        }
    }
}

impl fmt::Display for AebStateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self.indicator {
            AebIndicator::OnOff => "onoff",
            AebIndicator::Sub(sub) => sub.suffix(),
        };
        write!(f, "aeb{}_{}", self.unit.number(), suffix)
    }
}

impl FromStr for AebStateKey {
    type Err = FeeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || FeeError::Decode(format!("not an AEB state key: '{s}'"));
        let (unit, suffix) = s.split_once('_').ok_or_else(bad)?;
        let unit: AebUnit = unit.parse().map_err(|_| bad())?;
        let indicator = if suffix == "onoff" {
            AebIndicator::OnOff
        } else {
            AebSubState::ALL
                .into_iter()
                .find(|sub| sub.suffix() == suffix)
                .map(AebIndicator::Sub)
                .ok_or_else(bad)?
        };
        Ok(Self { unit, indicator })
    }
}

impl TryFrom<String> for AebStateKey {
    type Error = FeeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AebStateKey> for String {
    fn from(key: AebStateKey) -> Self {
        key.to_string()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DTC IN_MOD
// ────────────────────────────────────────────────────────────────────────────

/// CCD side served by a SpaceWire path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CcdSide {
    E,
    F,
}

/// One selected physical path: field `T{channel}` with value `value` routes
/// SpaceWire link `link` to `unit`/`side`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpwPath {
    pub channel: u8,
    pub value: u8,
    pub link: u8,
    pub unit: AebUnit,
    pub side: CcdSide,
}

impl SpwPath {
    /// Label in the `T1-010` style used on the routing grid.
    pub fn label(&self) -> String {
        format!("T{}-{:03b}", self.channel, self.value)
    }
}

const fn path(channel: u8, value: u8, link: u8, unit: AebUnit, side: CcdSide) -> SpwPath {
    SpwPath {
        channel,
        value,
        link,
        unit,
        side,
    }
}

/// Every (field, value) combination that selects a physical path.
const ROUTING: [SpwPath; 12] = [
    path(0, 1, 1, AebUnit::Aeb1, CcdSide::F),
    path(1, 1, 1, AebUnit::Aeb1, CcdSide::E),
    path(1, 2, 1, AebUnit::Aeb2, CcdSide::F),
    path(2, 1, 2, AebUnit::Aeb2, CcdSide::F),
    path(2, 2, 2, AebUnit::Aeb1, CcdSide::E),
    path(3, 1, 2, AebUnit::Aeb2, CcdSide::E),
    path(4, 1, 3, AebUnit::Aeb3, CcdSide::F),
    path(5, 1, 3, AebUnit::Aeb3, CcdSide::E),
    path(5, 2, 3, AebUnit::Aeb4, CcdSide::F),
    path(6, 1, 4, AebUnit::Aeb4, CcdSide::F),
    path(6, 2, 4, AebUnit::Aeb3, CcdSide::E),
    path(7, 1, 4, AebUnit::Aeb4, CcdSide::E),
];

/// The eight `T{n}_IN_MOD` fields.  `0` means the channel is inactive,
/// `1`/`2` select the first or second physical path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DtcInMod {
    pub fields: [u8; 8],
}

impl DtcInMod {
    pub fn new(fields: [u8; 8]) -> Self {
        Self { fields }
    }

    /// Value of `T{channel}`; `None` for channels outside `0..8`.
    pub fn field(&self, channel: usize) -> Option<u8> {
        self.fields.get(channel).copied()
    }

    /// Paths selected by the current field values.  Values that select no
    /// wired path (e.g. `T0 = 2`) contribute nothing.
    pub fn active_paths(&self) -> Vec<SpwPath> {
        ROUTING
            .iter()
            .filter(|p| self.fields[usize::from(p.channel)] == p.value)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deb_mode_raw_mapping() {
        for mode in DebMode::KNOWN {
            assert_eq!(DebMode::from_raw(mode.raw()), mode);
        }
        assert_eq!(DebMode::from_raw(7), DebMode::On);
        assert_eq!(DebMode::from_raw(4), DebMode::Unknown(4));
        assert!(!DebMode::from_raw(5).is_known());
    }

    #[test]
    fn aeb_unit_parses_case_insensitively() {
        assert_eq!("AEB3".parse::<AebUnit>().unwrap(), AebUnit::Aeb3);
        assert_eq!("aeb1".parse::<AebUnit>().unwrap(), AebUnit::Aeb1);
        assert!("AEB5".parse::<AebUnit>().is_err());
        assert!("DEB".parse::<AebUnit>().is_err());
    }

    #[test]
    fn aeb_state_key_string_form() {
        let key = AebStateKey::sub_state(AebUnit::Aeb2, AebSubState::PowerUp);
        assert_eq!(key.to_string(), "aeb2_power_up");
        assert_eq!("aeb2_power_up".parse::<AebStateKey>().unwrap(), key);
        assert_eq!(
            "aeb4_onoff".parse::<AebStateKey>().unwrap(),
            AebStateKey::on_off(AebUnit::Aeb4)
        );
        assert!("aeb2_warp".parse::<AebStateKey>().is_err());
    }

    #[test]
    fn aeb_state_key_serializes_as_string() {
        let key = AebStateKey::sub_state(AebUnit::Aeb1, AebSubState::Config);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#""aeb1_config""#);
        let back: AebStateKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn aeb_status_sub_state() {
        assert_eq!(AebStatus::from_raw(3).sub_state(), Some(AebSubState::Image));
        assert_eq!(AebStatus::Off.sub_state(), None);
        assert_eq!(AebStatus::from_raw(9), AebStatus::Unknown(9));
    }

    #[test]
    fn dtc_in_mod_active_paths() {
        let dtc = DtcInMod::new([1, 2, 0, 1, 0, 0, 2, 1]);
        let labels: Vec<String> = dtc.active_paths().iter().map(SpwPath::label).collect();
        assert_eq!(labels, vec!["T0-001", "T1-010", "T3-001", "T6-010", "T7-001"]);

        let t1 = dtc.active_paths()[1];
        assert_eq!((t1.link, t1.unit, t1.side), (1, AebUnit::Aeb2, CcdSide::F));
    }

    #[test]
    fn dtc_in_mod_unwired_value_selects_nothing() {
        let dtc = DtcInMod::new([2, 0, 0, 0, 0, 0, 0, 0]);
        assert!(dtc.active_paths().is_empty());
        assert_eq!(dtc.field(0), Some(2));
        assert_eq!(dtc.field(8), None);
    }
}
