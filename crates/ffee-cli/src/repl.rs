//! REPL – Read-Eval-Print Loop of the headless console.
//!
//! Supported slash-commands:
//!   /help                 – show this list
//!   /status               – print the current indicators
//!   /commanding           – enable / disable commanding
//!   /deb <mode>           – on, standby, full-image, full-image-pattern, immediate-on
//!   /aeb <1-4> <action>   – on, off, init, config, image, pattern
//!   /fpga-defaults        – load FPGA defaults on the DEB and all AEBs
//!   /end-observation      – end the running observation
//!   /reset-errors         – zero the frame error counters
//!   /quit | /exit         – shut down and exit
//!
//! Events from the background workers are printed between prompts.

use colored::Colorize;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ffee_hal::operations;
use ffee_kernel::{ConsoleState, Notice, Severity};
use ffee_middleware::EventSink;
use ffee_runtime::sequences::{self, FPGA_DEFAULTS_STEP, IMMEDIATE_ON_SETTLE};
use ffee_runtime::worker::POLL_STEP;
use ffee_runtime::{Console, Step};
use ffee_types::{AebSubState, AebUnit, Command, Event, FeeError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// What one input line asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplAction {
    Nothing,
    Help,
    Status,
    ToggleCommanding,
    Submit(Command),
    Sequence { name: &'static str, steps: Vec<Step> },
    ResetErrors,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    Unknown(String),
    Usage(&'static str),
    /// Understood but not commandable.
    Rejected(FeeError),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Unknown(cmd) => write!(f, "Unknown command: '{cmd}'"),
            ParseError::Usage(usage) => write!(f, "Usage: {usage}"),
            ParseError::Rejected(FeeError::InvalidArguments(msg)) => f.write_str(msg),
            ParseError::Rejected(e) => write!(f, "{e}"),
        }
    }
}

const DEB_USAGE: &str = "/deb <on|standby|full-image|full-image-pattern|immediate-on>";
const AEB_USAGE: &str = "/aeb <1-4> <on|off|init|config|image|pattern>";

pub fn parse(line: &str) -> Result<ReplAction, ParseError> {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Ok(ReplAction::Nothing);
    };
    let args: Vec<&str> = words.collect();

    match (cmd, args.as_slice()) {
        ("/help", []) => Ok(ReplAction::Help),
        ("/status", []) => Ok(ReplAction::Status),
        ("/commanding", []) => Ok(ReplAction::ToggleCommanding),
        ("/deb", [mode]) => parse_deb(mode),
        ("/deb", _) => Err(ParseError::Usage(DEB_USAGE)),
        ("/aeb", [unit, action]) => parse_aeb(unit, action),
        ("/aeb", _) => Err(ParseError::Usage(AEB_USAGE)),
        ("/fpga-defaults", []) => Ok(ReplAction::Sequence {
            name: "fpga-defaults",
            steps: sequences::fpga_defaults(FPGA_DEFAULTS_STEP),
        }),
        ("/end-observation", []) => Ok(ReplAction::Submit(operations::end_observation())),
        ("/reset-errors", []) => Ok(ReplAction::ResetErrors),
        ("/quit" | "/exit", []) => Ok(ReplAction::Quit),
        _ => Err(ParseError::Unknown(line.trim().to_string())),
    }
}

fn parse_deb(mode: &str) -> Result<ReplAction, ParseError> {
    let command = match mode {
        "on" => operations::deb_on(),
        "standby" => operations::deb_standby(),
        "full-image" => operations::deb_full_image(),
        "full-image-pattern" => operations::deb_full_image_pattern(),
        "immediate-on" => {
            let steps = sequences::immediate_on(IMMEDIATE_ON_SETTLE).map_err(ParseError::Rejected)?;
            return Ok(ReplAction::Sequence {
                name: "immediate-on",
                steps,
            });
        }
        _ => return Err(ParseError::Usage(DEB_USAGE)),
    };
    Ok(ReplAction::Submit(command))
}

fn parse_aeb(unit: &str, action: &str) -> Result<ReplAction, ParseError> {
    let unit = unit
        .parse::<u8>()
        .ok()
        .and_then(AebUnit::from_number)
        .or_else(|| unit.parse::<AebUnit>().ok())
        .ok_or(ParseError::Usage(AEB_USAGE))?;
    let command = match action {
        "on" => operations::aeb_power(unit, true),
        "off" => operations::aeb_power(unit, false),
        "init" => aeb_mode(unit, AebSubState::Init)?,
        "config" => aeb_mode(unit, AebSubState::Config)?,
        "image" => aeb_mode(unit, AebSubState::Image)?,
        "pattern" => aeb_mode(unit, AebSubState::Pattern)?,
        _ => return Err(ParseError::Usage(AEB_USAGE)),
    };
    Ok(ReplAction::Submit(command))
}

fn aeb_mode(unit: AebUnit, mode: AebSubState) -> Result<Command, ParseError> {
    operations::aeb_mode(unit, mode).map_err(ParseError::Rejected)
}

/// Interactive loop.  Returns when the operator quits, stdin closes or
/// `shutdown` is raised (Ctrl-C).
pub async fn run(console: &mut Console, sink: &mut EventSink, shutdown: Arc<AtomicBool>) {
    let mut state = ConsoleState::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(POLL_STEP);

    prompt();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !eval(&line, console, &state) {
                        break;
                    }
                    prompt();
                }
                Ok(None) => break, // EOF
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            },
            Some(event) = sink.recv() => show_event(&mut state, &event),
            _ = tick.tick() => {}
        }
    }
}

/// Handle one line.  `false` ends the loop.
fn eval(line: &str, console: &mut Console, state: &ConsoleState) -> bool {
    let action = match parse(line) {
        Ok(action) => action,
        Err(e @ ParseError::Rejected(_)) => {
            println!("{} {}", "Warning:".yellow().bold(), e);
            return true;
        }
        Err(e) => {
            println!("{} Type {} for available commands.", e.to_string().red(), "/help".bold());
            return true;
        }
    };

    match action {
        ReplAction::Nothing => {}
        ReplAction::Help => cmd_help(),
        ReplAction::Status => cmd_status(console, state),
        ReplAction::ToggleCommanding => {
            if console.toggle_commanding() {
                println!("{}", "Commanding ENABLED".green().bold());
            } else {
                println!("{}", "Commanding DISABLED".yellow().bold());
            }
        }
        ReplAction::Submit(command) => match console.submit(command.clone()) {
            Ok(()) => println!("  {} {}", "queued".dimmed(), command),
            Err(e) => commanding_refused(&e),
        },
        ReplAction::Sequence { name, steps } => match console.spawn_sequence(name, steps) {
            Ok(_) => println!("  {} {}", "sequence started".dimmed(), name.bold()),
            Err(e) => commanding_refused(&e),
        },
        ReplAction::ResetErrors => {
            console.reset_frame_errors();
            println!("  {}", "Frame error counters reset".dimmed());
        }
        ReplAction::Quit => {
            println!("{}", "Goodbye.".green());
            return false;
        }
    }
    true
}

fn commanding_refused(e: &FeeError) {
    match e {
        FeeError::CommandingDisabled => println!(
            "{} {} Enable it with {}.",
            "Warning:".yellow().bold(),
            e,
            "/commanding".bold()
        ),
        other => println!("{}: {}", "Error".red(), other),
    }
}

fn show_event(state: &mut ConsoleState, event: &Event) {
    debug!(source = %event.source, kind = event.payload.kind(), "Event");
    if let Some(notice) = state.apply(&event.payload) {
        print_notice(&notice);
        prompt();
    }
}

fn print_notice(notice: &Notice) {
    let title = match notice.severity {
        Severity::Info => notice.title.cyan(),
        Severity::Warning => notice.title.yellow().bold(),
        Severity::Error => notice.title.red().bold(),
    };
    println!("\r[{}] {}", title, notice.message);
}

fn cmd_help() {
    println!();
    println!("{}", "F-FEE Console Commands".bold().underline());
    println!("  {}  – print the current indicators", "/status".bold().cyan());
    println!("  {}  – enable / disable commanding", "/commanding".bold().cyan());
    println!("  {}", DEB_USAGE.bold().cyan());
    println!("  {}", AEB_USAGE.bold().cyan());
    println!("  {}  – DEB and AEB FPGA defaults", "/fpga-defaults".bold().cyan());
    println!("  {}  – end the running observation", "/end-observation".bold().cyan());
    println!("  {}  – zero the frame error counters", "/reset-errors".bold().cyan());
    println!("  {}  – exit the console", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(console: &Console, state: &ConsoleState) {
    println!();
    print!("{state}");
    let commanding = if console.commanding_enabled() {
        "enabled".green()
    } else {
        "disabled".yellow()
    };
    println!("commanding {commanding}");
    println!("queued     {}", console.queue().len());
    println!();
}

fn prompt() {
    print!("{} ", "ffee>".bold().cyan());
    std::io::stdout().flush().ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_line_does_nothing() {
        assert_eq!(parse("   "), Ok(ReplAction::Nothing));
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse("/help"), Ok(ReplAction::Help));
        assert_eq!(parse(" /status "), Ok(ReplAction::Status));
        assert_eq!(parse("/commanding"), Ok(ReplAction::ToggleCommanding));
        assert_eq!(parse("/reset-errors"), Ok(ReplAction::ResetErrors));
        assert_eq!(parse("/exit"), Ok(ReplAction::Quit));
        assert_eq!(
            parse("/end-observation"),
            Ok(ReplAction::Submit(operations::end_observation()))
        );
    }

    #[test]
    fn deb_modes() {
        assert_eq!(parse("/deb standby"), Ok(ReplAction::Submit(operations::deb_standby())));
        assert_eq!(
            parse("/deb full-image-pattern"),
            Ok(ReplAction::Submit(operations::deb_full_image_pattern()))
        );
        assert_eq!(parse("/deb windowing"), Err(ParseError::Usage(DEB_USAGE)));
        assert_eq!(parse("/deb"), Err(ParseError::Usage(DEB_USAGE)));
    }

    #[test]
    fn immediate_on_is_a_sequence() {
        let Ok(ReplAction::Sequence { name, steps }) = parse("/deb immediate-on") else {
            panic!("expected a sequence");
        };
        assert_eq!(name, "immediate-on");
        assert_eq!(steps[0], Step::Put(operations::deb_immediate_on()));
    }

    #[test]
    fn aeb_actions() {
        let Ok(ReplAction::Submit(cmd)) = parse("/aeb 3 on") else {
            panic!("expected a command");
        };
        assert_eq!(cmd.operation(), operations::DEB_SET_AEB_POWER_ON);
        assert_eq!(cmd.args(), &[json!(0), json!(0), json!(1), json!(0)]);

        let Ok(ReplAction::Submit(cmd)) = parse("/aeb AEB2 config") else {
            panic!("expected a command");
        };
        assert_eq!(cmd.operation(), operations::AEB_SET_CONFIG_MODE);
        assert_eq!(cmd.args(), &[json!("AEB2")]);

        assert_eq!(parse("/aeb 5 on"), Err(ParseError::Usage(AEB_USAGE)));
        assert_eq!(parse("/aeb 1 warp"), Err(ParseError::Usage(AEB_USAGE)));
    }

    #[test]
    fn aeb_pattern_is_rejected_with_warning() {
        let err = parse("/aeb 1 pattern").unwrap_err();
        assert!(matches!(err, ParseError::Rejected(_)));
        assert_eq!(err.to_string(), "AEB Pattern mode not yet implemented");
    }

    #[test]
    fn fpga_defaults_sequence() {
        let Ok(ReplAction::Sequence { name, steps }) = parse("/fpga-defaults") else {
            panic!("expected a sequence");
        };
        assert_eq!(name, "fpga-defaults");
        assert_eq!(steps, sequences::fpga_defaults(FPGA_DEFAULTS_STEP));
    }

    #[test]
    fn unknown_commands() {
        assert_eq!(parse("/warp 9"), Err(ParseError::Unknown("/warp 9".into())));
        assert_eq!(parse("/help me"), Err(ParseError::Unknown("/help me".into())));
    }
}
