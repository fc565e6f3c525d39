//! Timed command sequences triggered by a single user action.
//!
//! A sequence is plain data ([`Step`]s) executed by [`run_sequence`] on the
//! presentation runtime.  It only enqueues commands; execution order is
//! still owned by the dispatcher.

use std::time::Duration;

use ffee_hal::operations;
use ffee_middleware::{CommandQueue, EventBus};
use ffee_types::{AebSubState, AebUnit, Command, EventPayload, FeeError};
use tracing::{debug, info};

use crate::worker::{CancelToken, sleep_or_cancel};

/// Time the AEBs are left in INIT by IMMEDIATE ON before power-off.
pub const IMMEDIATE_ON_SETTLE: Duration = Duration::from_secs(6);
/// Spacing of the FPGA defaults sequence.
pub const FPGA_DEFAULTS_STEP: Duration = Duration::from_millis(2500);

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Put(Command),
    /// Operator notification.
    Note(String),
    Wait(Duration),
}

/// IMMEDIATE ON: DEB immediate-on, every AEB to INIT, wait `settle`, power
/// all AEBs off.
pub fn immediate_on(settle: Duration) -> Result<Vec<Step>, FeeError> {
    let mut steps = vec![Step::Put(operations::deb_immediate_on())];
    for unit in AebUnit::ALL {
        steps.push(Step::Put(operations::aeb_mode(unit, AebSubState::Init)?));
    }
    steps.push(Step::Wait(settle));
    steps.push(Step::Put(operations::aeb_power_mask([true; 4], false)));
    Ok(steps)
}

/// SET FPGA DEFAULTS: DEB defaults, staged AEB power-on one unit per `step`,
/// then the defaults of every AEB.
pub fn fpga_defaults(step: Duration) -> Vec<Step> {
    let mut steps = vec![
        Step::Note("Set FPGA defaults for the DEB".into()),
        Step::Put(operations::fpga_defaults(None)),
        Step::Wait(step),
        Step::Note("Power ON all AEBs".into()),
    ];
    let mut mask = [false; 4];
    for unit in AebUnit::ALL {
        mask[unit.index()] = true;
        steps.push(Step::Put(operations::aeb_power_mask(mask, true)));
        steps.push(Step::Wait(step));
    }
    for unit in AebUnit::ALL {
        steps.push(Step::Note(format!("Set FPGA defaults for the {unit}")));
        steps.push(Step::Put(operations::fpga_defaults(Some(unit))));
    }
    steps
}

/// Execute `steps`.  Returns `false` if cancelled part-way; commands already
/// enqueued stay queued.
pub async fn run_sequence(
    name: &str,
    steps: Vec<Step>,
    queue: &CommandQueue,
    bus: &EventBus,
    token: &CancelToken,
) -> bool {
    info!(sequence = %name, steps = steps.len(), "Sequence started");
    for step in steps {
        match step {
            Step::Put(command) => {
                debug!(sequence = %name, command = %command, "Enqueue");
                queue.put(command);
            }
            Step::Note(message) => {
                if bus.post(EventPayload::LogRetrieved(message)).is_err() {
                    debug!(sequence = %name, "Event dropped");
                }
            }
            Step::Wait(duration) => {
                if sleep_or_cancel(token, duration).await {
                    info!(sequence = %name, "Sequence cancelled");
                    return false;
                }
            }
        }
    }
    info!(sequence = %name, "Sequence finished");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffee_middleware::event_bus;
    use serde_json::json;

    fn drain(queue: &CommandQueue) -> Vec<Command> {
        std::iter::from_fn(|| queue.get_nowait()).collect()
    }

    #[test]
    fn immediate_on_shape() -> Result<(), FeeError> {
        let steps = immediate_on(IMMEDIATE_ON_SETTLE)?;
        assert_eq!(steps.len(), 7);
        assert_eq!(steps[5], Step::Wait(Duration::from_secs(6)));
        let Step::Put(last) = &steps[6] else {
            panic!("expected a command");
        };
        assert_eq!(last.operation(), operations::DEB_SET_AEB_POWER_OFF);
        assert_eq!(last.args(), vec![json!(true); 4].as_slice());
        Ok(())
    }

    #[test]
    fn fpga_defaults_powers_up_one_unit_at_a_time() {
        let masks: Vec<_> = fpga_defaults(FPGA_DEFAULTS_STEP)
            .into_iter()
            .filter_map(|s| match s {
                Step::Put(c) if c.operation() == operations::DEB_SET_AEB_POWER_ON => {
                    Some(c.args().iter().filter(|a| **a == json!(true)).count())
                }
                _ => None,
            })
            .collect();
        assert_eq!(masks, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn run_enqueues_in_order() -> Result<(), FeeError> {
        let queue = CommandQueue::new();
        let (bus, mut sink) = event_bus();
        let token = CancelToken::new();

        let done = run_sequence(
            "fpga-defaults",
            fpga_defaults(Duration::from_millis(5)),
            &queue,
            &bus,
            &token,
        )
        .await;
        assert!(done);

        let commands = drain(&queue);
        assert_eq!(commands.len(), 9);
        assert_eq!(commands[0], operations::fpga_defaults(None));
        assert_eq!(commands[8], operations::fpga_defaults(Some(AebUnit::Aeb4)));
        assert_eq!(sink.drain().len(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn cancel_stops_before_the_next_step() -> Result<(), FeeError> {
        let queue = CommandQueue::new();
        let (bus, _sink) = event_bus();
        let token = CancelToken::new();
        token.cancel();

        let done = run_sequence(
            "immediate-on",
            immediate_on(IMMEDIATE_ON_SETTLE)?,
            &queue,
            &bus,
            &token,
        )
        .await;
        assert!(!done);
        assert_eq!(queue.len(), 5);
        Ok(())
    }
}
