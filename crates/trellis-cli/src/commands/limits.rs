//! `trellis limits`: Show the resource limits of the current process.

use anyhow::Context;
use clap::Args;
use trellis_common::types::RlimitKind;
use trellis_core::rlimit::{KernelRlimits, RlimitSyscalls};

use crate::output;

/// Arguments for the `limits` command.
#[derive(Args, Debug)]
pub struct LimitsArgs {
    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `limits` command.
///
/// # Errors
///
/// Returns an error if any limit cannot be read.
#[allow(clippy::print_stdout)]
pub fn execute(args: LimitsArgs) -> anyhow::Result<()> {
    let mut rows = Vec::with_capacity(RlimitKind::ALL.len());
    for kind in RlimitKind::ALL {
        let limit = KernelRlimits
            .get(kind)
            .with_context(|| format!("reading rlimit_{kind}"))?;
        rows.push((kind, limit));
    }

    if args.json {
        let map: serde_json::Map<String, serde_json::Value> = rows
            .iter()
            .map(|(kind, limit)| {
                (
                    kind.name().to_owned(),
                    serde_json::json!({ "soft": limit.soft, "hard": limit.hard }),
                )
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        println!("{}", output::limits_table(&rows));
    }
    Ok(())
}
