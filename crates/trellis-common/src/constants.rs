//! System-wide constants and default paths.

use std::time::Duration;

/// Kernel file publishing the runtime maximum for `RLIMIT_NOFILE`.
pub const NR_OPEN_PATH: &str = "/proc/sys/fs/nr_open";

/// Prefix of the environment entries carrying encoded resource limits.
pub const RLIMIT_ENV_PREFIX: &str = "GARDEN_RLIMIT_";

/// Environment entry announcing the guest's handshake descriptor.
pub const HANDSHAKE_FD_ENV: &str = "TRELLIS_HANDSHAKE_FD";

/// Descriptor number the guest inherits its handshake end at.
pub const HANDSHAKE_FD: i32 = 3;

/// Environment entry holding the container init pid for hook scripts.
pub const PID_ENV: &str = "PID";

/// Environment entry telling the pivot tool which process to rewire.
pub const TARGET_NS_PID_ENV: &str = "TARGET_NS_PID";

/// How long either side of the handshake waits for the other.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Name of the hook script inside the library directory.
pub const HOOK_BIN: &str = "hook";

/// Name of the root filesystem pivot tool inside the library directory.
pub const PIVOTTER_BIN: &str = "pivotter";

/// Hook run on the host before the container init process is cloned.
pub const HOOK_PARENT_BEFORE_CLONE: &str = "parent-before-clone";

/// Hook run on the host once the container init process exists.
pub const HOOK_PARENT_AFTER_CLONE: &str = "parent-after-clone";

/// Application name used in CLI output.
pub const APP_NAME: &str = "trellis";
