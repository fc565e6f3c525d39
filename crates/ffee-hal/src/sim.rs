//! [`SimFee`] – in-process F-FEE for tests and the `simulate` console mode.
//!
//! Provides command connectors for the `DPU` and `CM_CS` targets whose
//! sessions mutate a shared hardware model, and produces the telemetry
//! frames (housekeeping, register map, timecode) that a real DPU would
//! publish for that model.
//!
//! # Stub behaviour
//!
//! | Operation | Effect |
//! |---|---|
//! | `deb_set_*_mode`, `deb_set_immediate_on` | Sets the DEB mode. |
//! | `deb_set_aeb_power_on` | Powers the selected AEBs; they report INIT. |
//! | `deb_set_aeb_power_off` | Unpowers the selected AEBs; they report OFF. |
//! | `aeb_set_{init,config,image}_mode` | Sets the AEB status; fails if unpowered. |
//! | `set_fpga_defaults`, `end_observation` | Recorded only. |

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use ffee_types::frame::{AEB_HK_COMMAND, DEB_HK_COMMAND};
use ffee_types::{
    AebStatus, AebUnit, Command, DebMode, FeeError, FieldMap, Frame, HousekeepingRecord,
    MessageKind,
};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::endpoint::{Connector, OperationSpec, Session};
use crate::operations::{self, CM_CS, DPU};

#[derive(Debug)]
struct SimState {
    deb_mode: DebMode,
    aeb_status: [AebStatus; 4],
    aeb_power: [bool; 4],
    dtc_in_mod: [u8; 8],
    /// OUTBUFF_1..8 flags reported by the next DEB housekeeping frame.
    pending_overflow: [u32; 8],
    refuse_connections: bool,
    connect_attempts: Vec<Instant>,
    calls: Vec<Command>,
    timecode: u64,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            deb_mode: DebMode::On,
            aeb_status: [AebStatus::Off; 4],
            aeb_power: [false; 4],
            dtc_in_mod: [0; 8],
            pending_overflow: [0; 8],
            refuse_connections: false,
            connect_attempts: Vec::new(),
            calls: Vec::new(),
            timecode: 0,
        }
    }
}

/// Shared simulated front-end.  Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimFee {
    state: Arc<Mutex<SimState>>,
}

impl SimFee {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dpu_connector(&self) -> SimConnector {
        SimConnector {
            fee: self.clone(),
            target: DPU,
            operations: operations::dpu_operations(),
        }
    }

    pub fn cm_connector(&self) -> SimConnector {
        SimConnector {
            fee: self.clone(),
            target: CM_CS,
            operations: operations::cm_operations(),
        }
    }

    /// While `true`, every `connect` fails with `ConnectionUnavailable`.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Instants of every connect attempt, refused or not.
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.lock().connect_attempts.clone()
    }

    /// Every command executed so far, in execution order.
    pub fn calls(&self) -> Vec<Command> {
        self.lock().calls.clone()
    }

    pub fn deb_mode(&self) -> DebMode {
        self.lock().deb_mode
    }

    pub fn set_deb_mode(&self, mode: DebMode) {
        self.lock().deb_mode = mode;
    }

    pub fn aeb_status(&self, unit: AebUnit) -> AebStatus {
        self.lock().aeb_status[unit.index()]
    }

    pub fn set_aeb_status(&self, unit: AebUnit, status: AebStatus) {
        self.lock().aeb_status[unit.index()] = status;
    }

    pub fn aeb_powered(&self, unit: AebUnit) -> bool {
        self.lock().aeb_power[unit.index()]
    }

    pub fn set_dtc_in_mod(&self, fields: [u8; 8]) {
        self.lock().dtc_in_mod = fields;
    }

    /// Raise OUTBUFF flags (`OUTBUFF_1` is index 0) for the next DEB
    /// housekeeping frame only.
    pub fn inject_overflow(&self, flags: [u32; 8]) {
        self.lock().pending_overflow = flags;
    }

    // ── Telemetry ───────────────────────────────────────────────────────────

    /// DEB housekeeping (`SYNC_HK_DATA`).  Consumes injected overflow flags.
    pub fn deb_hk_frame(&self) -> Result<Frame, FeeError> {
        let (mode, overflow) = {
            let mut state = self.lock();
            let overflow = std::mem::take(&mut state.pending_overflow);
            (state.deb_mode, overflow)
        };
        let mut data = FieldMap::new().with("STATUS", "OPER_MOD", u32::from(mode.raw()));
        for (i, flag) in overflow.iter().enumerate() {
            data.insert("OVF", format!("OUTBUFF_{}", i + 1), *flag);
        }
        hk_frame(DEB_HK_COMMAND, vec!["DEB".into()], &data)
    }

    /// AEB housekeeping (`SYNC_HK_DATA`) for one unit.
    pub fn aeb_hk_frame(&self, unit: AebUnit) -> Result<Frame, FeeError> {
        let status = self.aeb_status(unit);
        let data = FieldMap::new().with("STATUS", "AEB_STATUS", u32::from(status.raw()));
        hk_frame(AEB_HK_COMMAND, vec![unit.to_string()], &data)
    }

    /// `F_FEE_REGISTER_MAP` with the DTC IN_MOD fields.
    pub fn register_map_frame(&self) -> Result<Frame, FeeError> {
        let fields = self.lock().dtc_in_mod;
        let mut map = FieldMap::new();
        for (n, value) in fields.iter().enumerate() {
            let block = if n < 4 {
                "DEB_DTC_IN_MOD_2"
            } else {
                "DEB_DTC_IN_MOD_1"
            };
            map.insert(block, format!("T{n}_IN_MOD"), u32::from(*value));
        }
        Frame::from_json(MessageKind::F_FEE_REGISTER_MAP, &map)
    }

    /// `SYNC_TIMECODE` heartbeat with an increasing counter.
    pub fn timecode_frame(&self) -> Result<Frame, FeeError> {
        let timecode = {
            let mut state = self.lock();
            state.timecode += 1;
            state.timecode
        };
        Frame::from_json(MessageKind::SYNC_TIMECODE, &json!({ "timecode": timecode }))
    }

    /// One full publication cycle: register map, DEB and AEB housekeeping.
    pub fn telemetry_cycle(&self) -> Result<Vec<Frame>, FeeError> {
        let mut frames = vec![self.register_map_frame()?, self.deb_hk_frame()?];
        for unit in AebUnit::ALL {
            frames.push(self.aeb_hk_frame(unit)?);
        }
        Ok(frames)
    }

    // ── Command model ───────────────────────────────────────────────────────

    fn apply(&self, target: &str, operation: &str, args: &[Value]) -> Result<Value, FeeError> {
        let mut state = self.lock();
        state
            .calls
            .push(Command::new(target, operation).with_args(args.iter().cloned()));

        match operation {
            operations::DEB_SET_ON_MODE | operations::DEB_SET_IMMEDIATE_ON => {
                state.deb_mode = DebMode::On;
            }
            operations::DEB_SET_STANDBY_MODE => state.deb_mode = DebMode::Standby,
            operations::DEB_SET_FULL_IMAGE_MODE => state.deb_mode = DebMode::FullImage,
            operations::DEB_SET_FULL_IMAGE_PATTERN_MODE => {
                state.deb_mode = DebMode::FullImagePattern;
            }
            operations::DEB_SET_AEB_POWER_ON | operations::DEB_SET_AEB_POWER_OFF => {
                let on = operation == operations::DEB_SET_AEB_POWER_ON;
                for (i, arg) in args.iter().enumerate().take(4) {
                    if truthy(arg)? {
                        state.aeb_power[i] = on;
                        state.aeb_status[i] = if on { AebStatus::Init } else { AebStatus::Off };
                    }
                }
            }
            operations::AEB_SET_INIT_MODE
            | operations::AEB_SET_CONFIG_MODE
            | operations::AEB_SET_IMAGE_MODE => {
                let unit: AebUnit = args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| FeeError::InvalidArguments("expected an AEB id".into()))?
                    .parse()?;
                if !state.aeb_power[unit.index()] {
                    return Err(FeeError::Remote {
                        target: target.to_string(),
                        operation: operation.to_string(),
                        message: format!("{unit} is not powered"),
                    });
                }
                state.aeb_status[unit.index()] = match operation {
                    operations::AEB_SET_INIT_MODE => AebStatus::Init,
                    operations::AEB_SET_CONFIG_MODE => AebStatus::Config,
                    _ => AebStatus::Image,
                };
            }
            operations::SET_FPGA_DEFAULTS | operations::END_OBSERVATION => {}
            other => {
                return Err(FeeError::UnknownOperation {
                    target: target.to_string(),
                    operation: other.to_string(),
                });
            }
        }
        Ok(json!("OK"))
    }
}

fn hk_frame(command: &str, units: Vec<String>, data: &FieldMap) -> Result<Frame, FeeError> {
    let record = HousekeepingRecord {
        command: command.to_string(),
        units,
        data: serde_json::to_value(data)?,
        timestamp: Utc::now(),
    };
    Frame::from_json(MessageKind::SYNC_HK_DATA, &record)
}

fn truthy(value: &Value) -> Result<bool, FeeError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        other => Err(FeeError::InvalidArguments(format!(
            "expected a bool or 0/1, got {other}"
        ))),
    }
}

/// Connector for one simulated target.
pub struct SimConnector {
    fee: SimFee,
    target: &'static str,
    operations: Vec<OperationSpec>,
}

#[async_trait]
impl Connector for SimConnector {
    fn target(&self) -> &str {
        self.target
    }

    fn operations(&self) -> Vec<OperationSpec> {
        self.operations.clone()
    }

    async fn connect(&self) -> Result<Box<dyn Session>, FeeError> {
        let refuse = {
            let mut state = self.fee.lock();
            state.connect_attempts.push(Instant::now());
            state.refuse_connections
        };
        if refuse {
            return Err(FeeError::ConnectionUnavailable {
                target: self.target.to_string(),
                details: "simulated control server is down".into(),
            });
        }
        Ok(Box::new(SimSession {
            fee: self.fee.clone(),
            target: self.target,
        }))
    }
}

struct SimSession {
    fee: SimFee,
    target: &'static str,
}

#[async_trait]
impl Session for SimSession {
    async fn call(
        &mut self,
        operation: &str,
        args: &[Value],
        _kwargs: &Map<String, Value>,
    ) -> Result<Value, FeeError> {
        if self.fee.lock().refuse_connections {
            return Err(FeeError::ConnectionLost {
                target: self.target.to_string(),
                details: "simulated control server went away".into(),
            });
        }
        debug!(target = %self.target, operation = %operation, "Simulated call");
        self.fee.apply(self.target, operation, args)
    }

    async fn close(&mut self) {}
}
