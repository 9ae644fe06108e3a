//! Transport encoding of resource limits as environment entries.
//!
//! Limits cross the `execve` boundary into the container as
//! `GARDEN_RLIMIT_<KIND>=<value>` entries. Only present kinds are emitted,
//! so "absent" survives the trip and is never confused with zero.

use trellis_common::types::{ResourceLimits, RlimitKind};

/// Encodes every present limit as `(key, value)`, in table order.
#[must_use]
pub fn env_pairs(limits: &ResourceLimits) -> Vec<(String, String)> {
    limits
        .iter()
        .map(|(kind, value)| (kind.env_key(), value.to_string()))
        .collect()
}

/// Encodes every present limit as a `KEY=value` entry, in table order.
#[must_use]
pub fn encode_env(limits: &ResourceLimits) -> Vec<String> {
    env_pairs(limits)
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect()
}

/// Decodes limits from `KEY=value` entries.
///
/// Unrecognized keys are ignored. A recognized key whose value is not an
/// unsigned 64-bit integer leaves that kind absent instead of failing the
/// whole decode.
pub fn decode_env<I, S>(env: I) -> ResourceLimits
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut limits = ResourceLimits::default();
    for entry in env {
        let Some((key, value)) = entry.as_ref().split_once('=') else {
            continue;
        };
        let Some(kind) = kind_for_key(key) else {
            continue;
        };
        match value.parse::<u64>() {
            Ok(parsed) => limits.set(kind, Some(parsed)),
            Err(e) => tracing::warn!(key, value, error = %e, "ignoring malformed rlimit entry"),
        }
    }
    limits
}

fn kind_for_key(key: &str) -> Option<RlimitKind> {
    if !key.starts_with(trellis_common::constants::RLIMIT_ENV_PREFIX) {
        return None;
    }
    RlimitKind::ALL.into_iter().find(|kind| kind.env_key() == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_only_encodes_single_entry() {
        let limits = ResourceLimits {
            cpu: Some(9000),
            ..ResourceLimits::default()
        };
        let env = encode_env(&limits);
        assert_eq!(env, vec!["GARDEN_RLIMIT_CPU=9000".to_string()]);

        let decoded = decode_env(&env);
        assert_eq!(decoded.cpu, Some(9000));
        assert_eq!(decoded, limits);
    }

    #[test]
    fn empty_limits_encode_nothing() {
        assert!(encode_env(&ResourceLimits::default()).is_empty());
        assert_eq!(decode_env(Vec::<String>::new()), ResourceLimits::default());
    }

    #[test]
    fn roundtrip_preserves_every_kind() {
        let mut limits = ResourceLimits::default();
        for kind in RlimitKind::ALL {
            limits.set(kind, Some(u64::from(kind.id()) + 1));
        }
        let env = encode_env(&limits);
        assert_eq!(env.len(), 15);
        assert_eq!(decode_env(&env), limits);
    }

    #[test]
    fn roundtrip_preserves_zero_and_infinity() {
        for value in [0, 1, u64::MAX - 1, u64::MAX] {
            let mut limits = ResourceLimits::default();
            limits.set(RlimitKind::Nofile, Some(value));
            limits.set(RlimitKind::Stack, Some(value));
            assert_eq!(decode_env(encode_env(&limits)), limits, "value {value}");
        }
    }

    #[test]
    fn roundtrip_keeps_absent_kinds_absent() {
        // Every present/absent combination over a window of kinds.
        for mask in 0_u32..(1 << 5) {
            let mut limits = ResourceLimits::default();
            for (bit, kind) in RlimitKind::ALL.iter().skip(5).take(5).enumerate() {
                if mask & (1 << bit) != 0 {
                    limits.set(*kind, Some(u64::from(mask)));
                }
            }
            assert_eq!(decode_env(encode_env(&limits)), limits, "mask {mask:#b}");
        }
    }

    #[test]
    fn decode_ignores_unrelated_entries() {
        let decoded = decode_env([
            "PATH=/usr/bin:/bin",
            "GARDEN_RLIMIT_BOGUS=12",
            "GARDEN_RLIMIT_NOFILE=800",
            "garden_rlimit_cpu=10",
            "NOEQUALS",
        ]);
        assert_eq!(decoded.nofile, Some(800));
        assert_eq!(decoded.cpu, None);
        assert_eq!(decoded.iter().count(), 1);
    }

    #[test]
    fn malformed_value_leaves_kind_absent() {
        let decoded = decode_env([
            "GARDEN_RLIMIT_CPU=lots",
            "GARDEN_RLIMIT_CORE=-1",
            "GARDEN_RLIMIT_STACK=18446744073709551616",
            "GARDEN_RLIMIT_NPROC=500",
        ]);
        assert_eq!(decoded.cpu, None);
        assert_eq!(decoded.core, None);
        assert_eq!(decoded.stack, None);
        assert_eq!(decoded.nproc, Some(500));
    }
}
