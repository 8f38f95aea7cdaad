use thiserror::Error;

/// Failure of a single device reading (power or memory) or device listing command.
#[derive(Error, Debug)]
pub enum PowerQueryError {
    #[error("Failed to run {program}: {source}")]
    Command {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    ExitStatus { program: String, status: std::process::ExitStatus },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Device {0} not found in output")]
    DeviceNotFound(String),
    #[error("Power value without unit: {0}")]
    MissingUnit(String),
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Environment error: {0}")]
    Environment(String),
    #[error("Not initialized: {0}")]
    NotInitialized(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("Invalid metric input: {0}")]
    InvalidMetric(String),
    #[error("Other error: {0}")]
    Other(String),
}
