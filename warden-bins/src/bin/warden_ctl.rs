//! Warden operator tool
//!
//! Reads and changes the on-disk kill switch shared by every warden process
//! on this host. Running daemons pick up the change at their next pre-order
//! gate or marker poll.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use warden_bins::common::{build_kill_switch, init_logging, load_config, CommonArgs};
use warden_core::core::KillSwitchError;
use warden_core::forensic::{read_log, ForensicLog};

#[derive(Parser, Debug)]
#[command(author, version, about = "Warden kill switch operator tool")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the kill switch state
    Status {
        /// Print the state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Engage the kill switch
    Engage {
        #[arg(short, long)]
        reason: String,
    },
    /// Disengage the kill switch once the recovery cooldown has elapsed
    Disengage,
    /// Print the most recent forensic records
    Forensic {
        #[arg(short = 'n', long, default_value = "20")]
        last: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.common)?;
    init_logging(&config)?;

    if config.kill_switch.in_memory {
        bail!("kill switch is configured in-memory; there is no marker to operate on");
    }

    let open_forensic = || {
        ForensicLog::open(&config.logging.forensic_path).with_context(|| {
            format!(
                "Failed to open forensic log {}",
                config.logging.forensic_path.display()
            )
        })
    };
    let identity = format!("warden-ctl:{}", config.kill_switch.identity);

    match args.command {
        Command::Status { json } => {
            // read-only, records nothing
            let kill_switch = build_kill_switch(&config, &identity, ForensicLog::disabled())?;
            let state = kill_switch.state();
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else if state.is_engaged() {
                println!("ENGAGED");
                println!("  reason:     {}", state.reason.as_deref().unwrap_or("-"));
                println!("  engaged by: {}", state.engaged_by.as_deref().unwrap_or("-"));
                if let Some(at) = state.engaged_at_ns {
                    println!("  engaged at: {} ns since epoch", at);
                }
                let remaining = kill_switch.cooldown_remaining();
                if remaining.is_zero() {
                    println!("  cooldown:   elapsed");
                } else {
                    println!("  cooldown:   {}s remaining", remaining.as_secs());
                }
            } else {
                println!("SAFE");
            }
        }
        Command::Engage { reason } => {
            let kill_switch = build_kill_switch(&config, &identity, open_forensic()?)?;
            if kill_switch.engage(&reason)? {
                println!("ENGAGED: {}", reason);
            } else {
                println!(
                    "Already ENGAGED: {}",
                    kill_switch.reason().unwrap_or_default()
                );
            }
        }
        Command::Disengage => {
            let kill_switch = build_kill_switch(&config, &identity, open_forensic()?)?;
            match kill_switch.disengage() {
                Ok(()) => println!("SAFE"),
                Err(KillSwitchError::CooldownNotElapsed { remaining }) => {
                    bail!(
                        "recovery cooldown not elapsed, {}s remaining",
                        remaining.as_secs()
                    )
                }
                Err(e) => return Err(e).context("Failed to disengage kill switch"),
            }
        }
        Command::Forensic { last } => {
            let path = &config.logging.forensic_path;
            let records =
                read_log(path).with_context(|| format!("Failed to read {}", path.display()))?;
            for record in records.iter().skip(records.len().saturating_sub(last)) {
                println!("{}", serde_json::to_string(record)?);
            }
        }
    }

    Ok(())
}
