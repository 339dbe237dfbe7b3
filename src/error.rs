use thiserror::Error;

pub type Result<T> = std::result::Result<T, TracewayError>;

#[derive(Debug, Error)]
pub enum TracewayError {
    #[error("exporter `{0}` is already registered")]
    DuplicateExporter(String),

    #[error("exporter `{0}` not found")]
    ExporterNotFound(String),

    #[error("exporter manager is already running")]
    ManagerAlreadyRunning,

    #[error("invalid intercept chain: {0}")]
    InterceptChain(String),

    #[error("exporter `{name}` failed to start: {source}")]
    ExporterStartup {
        name: String,
        #[source]
        source: Box<TracewayError>,
    },

    #[error("export failed: {0}")]
    Export(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
