//! Formatted output helpers for CLI commands.

use trellis_common::types::{RLIM_INFINITY, Rlimit, RlimitKind};

/// Formats a limit value, spelling out the kernel's infinity.
#[must_use]
pub fn format_limit(value: u64) -> String {
    if value == RLIM_INFINITY {
        "unlimited".to_owned()
    } else {
        value.to_string()
    }
}

/// Renders one row per kind with aligned soft and hard columns.
#[must_use]
pub fn limits_table(rows: &[(RlimitKind, Rlimit)]) -> String {
    let mut out = format!("{:<12} {:>20} {:>20}", "KIND", "SOFT", "HARD");
    for (kind, limit) in rows {
        out.push('\n');
        out.push_str(&format!(
            "{:<12} {:>20} {:>20}",
            kind.name(),
            format_limit(limit.soft),
            format_limit(limit.hard)
        ));
    }
    out
}
