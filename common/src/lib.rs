pub mod ipc;
pub mod job;
pub mod run;

pub use ipc::{Request, Response};
pub use job::{
    DeviceConfig, Geolocation, Job, JobConfig, JobId, MultiBotConfig, ProxyConfig, Step,
    ValidationError, Viewport, VisualModeConfig, MAX_BOT_COUNT,
};
pub use run::{Run, RunId, RunStatus};

// Production paths (follow FHS - Filesystem Hierarchy Standard)
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/formbot/formbot.sock";
pub const DEFAULT_DB_PATH: &str = "/var/lib/formbot/formbot.db";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/formbot/config.yaml";
pub const DEFAULT_RESULTS_DIR: &str = "/var/lib/formbot/results";
pub const DEFAULT_LOG_FILE: &str = "/var/log/formbot/daemon.log";
pub const DEFAULT_RUNS_LOG_FILE: &str = "/var/log/formbot/runs.log";

// Fallback paths for non-root users
pub const USER_SOCKET_PATH: &str = "/tmp/formbot.sock";
pub const USER_DB_PATH: &str = "formbot.db";
pub const USER_RESULTS_DIR: &str = "results";
pub const USER_LOG_FILE: &str = "formbot-daemon.log";
pub const USER_RUNS_LOG_FILE: &str = "formbot-runs.log";
