//! Command targets, their operation tables, and one builder per user
//! action.

use ffee_types::{AebSubState, AebUnit, Command, FeeError};
use serde_json::{Value, json};

use crate::endpoint::OperationSpec;

/// The F-CAM DPU control server.
pub const DPU: &str = "DPU";
/// The configuration manager control server.
pub const CM_CS: &str = "CM_CS";

pub const DEB_SET_ON_MODE: &str = "deb_set_on_mode";
pub const DEB_SET_IMMEDIATE_ON: &str = "deb_set_immediate_on";
pub const DEB_SET_STANDBY_MODE: &str = "deb_set_standby_mode";
pub const DEB_SET_FULL_IMAGE_MODE: &str = "deb_set_full_image_mode";
pub const DEB_SET_FULL_IMAGE_PATTERN_MODE: &str = "deb_set_full_image_pattern_mode";
pub const DEB_SET_AEB_POWER_ON: &str = "deb_set_aeb_power_on";
pub const DEB_SET_AEB_POWER_OFF: &str = "deb_set_aeb_power_off";
pub const AEB_SET_INIT_MODE: &str = "aeb_set_init_mode";
pub const AEB_SET_CONFIG_MODE: &str = "aeb_set_config_mode";
pub const AEB_SET_IMAGE_MODE: &str = "aeb_set_image_mode";
pub const SET_FPGA_DEFAULTS: &str = "set_fpga_defaults";
pub const END_OBSERVATION: &str = "end_observation";

pub fn dpu_operations() -> Vec<OperationSpec> {
    vec![
        OperationSpec::new(DEB_SET_ON_MODE, 0),
        OperationSpec::new(DEB_SET_IMMEDIATE_ON, 0),
        OperationSpec::new(DEB_SET_STANDBY_MODE, 0),
        OperationSpec::new(DEB_SET_FULL_IMAGE_MODE, 0),
        OperationSpec::new(DEB_SET_FULL_IMAGE_PATTERN_MODE, 0),
        OperationSpec::new(DEB_SET_AEB_POWER_ON, 4),
        OperationSpec::new(DEB_SET_AEB_POWER_OFF, 4),
        OperationSpec::new(AEB_SET_INIT_MODE, 1),
        OperationSpec::new(AEB_SET_CONFIG_MODE, 1),
        OperationSpec::new(AEB_SET_IMAGE_MODE, 1),
        OperationSpec::new(SET_FPGA_DEFAULTS, 1),
    ]
}

pub fn cm_operations() -> Vec<OperationSpec> {
    vec![OperationSpec::new(END_OBSERVATION, 0)]
}

// ────────────────────────────────────────────────────────────────────────────
// Builders
// ────────────────────────────────────────────────────────────────────────────

pub fn deb_on() -> Command {
    Command::new(DPU, DEB_SET_ON_MODE)
}

pub fn deb_immediate_on() -> Command {
    Command::new(DPU, DEB_SET_IMMEDIATE_ON)
}

pub fn deb_standby() -> Command {
    Command::new(DPU, DEB_SET_STANDBY_MODE)
}

pub fn deb_full_image() -> Command {
    Command::new(DPU, DEB_SET_FULL_IMAGE_MODE)
}

pub fn deb_full_image_pattern() -> Command {
    Command::new(DPU, DEB_SET_FULL_IMAGE_PATTERN_MODE)
}

/// Power one AEB on or off.  The argument vector is one-hot: `[0, 1, 0, 0]`
/// addresses AEB2.
pub fn aeb_power(unit: AebUnit, on: bool) -> Command {
    let op = if on {
        DEB_SET_AEB_POWER_ON
    } else {
        DEB_SET_AEB_POWER_OFF
    };
    Command::new(DPU, op).with_args(
        AebUnit::ALL
            .into_iter()
            .map(|u| json!(if u == unit { 1 } else { 0 })),
    )
}

/// Power on/off with an explicit per-unit selection.
pub fn aeb_power_mask(mask: [bool; 4], on: bool) -> Command {
    let op = if on {
        DEB_SET_AEB_POWER_ON
    } else {
        DEB_SET_AEB_POWER_OFF
    };
    Command::new(DPU, op).with_args(mask.into_iter().map(Value::Bool))
}

/// Put one AEB into `mode`.
///
/// # Errors
///
/// [`FeeError::InvalidArguments`] for sub-states that cannot be commanded
/// (PATTERN is not implemented on the DPU; POWER_UP/POWER_DOWN are
/// transitional).
pub fn aeb_mode(unit: AebUnit, mode: AebSubState) -> Result<Command, FeeError> {
    let op = match mode {
        AebSubState::Init => AEB_SET_INIT_MODE,
        AebSubState::Config => AEB_SET_CONFIG_MODE,
        AebSubState::Image => AEB_SET_IMAGE_MODE,
        AebSubState::Pattern => {
            return Err(FeeError::InvalidArguments(
                "AEB Pattern mode not yet implemented".into(),
            ));
        }
        AebSubState::PowerUp | AebSubState::PowerDown => {
            return Err(FeeError::InvalidArguments(format!(
                "{} is not a commandable AEB mode",
                mode.suffix()
            )));
        }
    };
    Ok(Command::new(DPU, op).with_args([json!(unit.to_string())]))
}

/// Load FPGA defaults on the DEB (`None`) or on one AEB.
pub fn fpga_defaults(unit: Option<AebUnit>) -> Command {
    let target = unit.map_or_else(|| "DEB".to_string(), |u| u.to_string());
    Command::new(DPU, SET_FPGA_DEFAULTS).with_args([json!(target)])
}

pub fn end_observation() -> Command {
    Command::new(CM_CS, END_OBSERVATION)
}
