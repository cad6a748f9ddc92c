use crate::sandbox::SandboxId;

#[derive(Debug, thiserror::Error)]
pub enum PrintError {
    #[error("platform refused to open an isolated document")]
    SandboxUnavailable,
    #[error("no sandbox attached under {0}")]
    UnknownSandbox(SandboxId),
    #[error("staging failed: {0}")]
    Staging(String),
    #[error("staged markup for the active job is missing")]
    StagedMarkupMissing,
    #[error("stylesheet rejected: {0}")]
    Stylesheet(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("asset error: {0}")]
    Asset(String),
    #[error("payload error: {0}")]
    Payload(String),
    #[error("sandbox document did not report ready in time")]
    LoadTimedOut,
    #[error("sandbox is {actual}, expected {expected}")]
    SandboxOutOfOrder {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("print command failed: {0}")]
    PrintCommand(String),
    #[error("no node `{0}` is mounted on the document root")]
    NodeNotMounted(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
