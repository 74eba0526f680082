//! Resource Limiter - Tier Derivation and Child Process Application
//!
//! The tier table lives in `crucible_protocol`; this module applies a
//! `ResourceLimits` to a `std::process::Command` before exec. On Unix the
//! caps become rlimits installed in the child via `pre_exec`; on other
//! platforms the limits are recorded only and the engine's wallclock
//! deadline is the enforcement backstop.

use crucible_protocol::{ResourceLimits, SecurityTier};
use std::process::Command;
use tracing::debug;

#[cfg(unix)]
const NPROC_HEADROOM: u64 = 256;

/// Derive the default limits for a tier (re-export of the protocol table).
pub fn limits_for_tier(tier: SecurityTier) -> ResourceLimits {
    ResourceLimits::for_tier(tier)
}

/// Configure `cmd` so the spawned child runs under `limits`.
pub fn apply_limits(cmd: &mut Command, limits: &ResourceLimits) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        let memory_bytes = limits.memory_mib.saturating_mul(1024 * 1024);
        let cpu_seconds = limits.cpu_seconds;
        // RLIMIT_NPROC counts every process of the uid, not just the
        // sandbox's children, so the cap carries headroom for processes
        // that already exist outside the sandbox. Forkbombs still hit the
        // ceiling long before exhausting the process table.
        let max_processes = limits.max_processes.saturating_add(NPROC_HEADROOM);
        let file_size_bytes = limits.max_file_size_mib.saturating_mul(1024 * 1024);

        // Safety: setrlimit is async-signal-safe and the closure touches
        // nothing but stack values.
        unsafe {
            cmd.pre_exec(move || {
                set_rlimit(libc::RLIMIT_AS, memory_bytes);
                set_rlimit(libc::RLIMIT_CPU, cpu_seconds);
                set_rlimit(libc::RLIMIT_NPROC, max_processes);
                set_rlimit(libc::RLIMIT_FSIZE, file_size_bytes);
                Ok(())
            });
        }
    }

    #[cfg(not(unix))]
    {
        // No rlimit primitive here; the engine deadline still applies.
        debug!(
            "resource limits recorded without OS enforcement: cpu={}s mem={}MiB procs={}",
            limits.cpu_seconds, limits.memory_mib, limits.max_processes
        );
        let _ = cmd;
    }

    debug!(
        "applied limits: cpu={}s mem={}MiB procs={} fsize={}MiB",
        limits.cpu_seconds, limits.memory_mib, limits.max_processes, limits.max_file_size_mib
    );
}

// glibc types the first setrlimit argument differently from other libcs.
#[cfg(all(unix, target_env = "gnu"))]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(all(unix, not(target_env = "gnu")))]
type RlimitResource = libc::c_int;

#[cfg(unix)]
fn set_rlimit(resource: RlimitResource, value: u64) {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    // A failed setrlimit must not abort the spawn; the wallclock deadline
    // still bounds the execution.
    unsafe {
        libc::setrlimit(resource, &limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_table_passthrough() {
        assert_eq!(limits_for_tier(SecurityTier::High).cpu_seconds, 15);
        assert_eq!(limits_for_tier(SecurityTier::Low).memory_mib, 1024);
    }

    #[cfg(unix)]
    #[test]
    fn test_limited_child_runs() {
        let mut cmd = Command::new("true");
        apply_limits(&mut cmd, &ResourceLimits::for_tier(SecurityTier::Moderate));
        let status = cmd.status().expect("spawn true");
        assert!(status.success());
    }
}
