pub mod utils {
    pub mod errors;
    pub mod logger;
}

pub mod backends;
pub mod collectors;
pub mod dispatcher;
pub mod environment;
pub mod metrics;
pub mod monitor;
pub mod telemetry;

pub use dispatcher::{BatchSummary, BatchTranslation, Dispatcher, DispatcherConfig};
pub use environment::{detect_environment, detect_host_environment, EnvironmentDescriptor, EnvironmentKind};
pub use monitor::{Monitor, MonitorConfig, MonitoringToggle};
pub use utils::errors::{HarnessError, InferenceError, PowerQueryError};
