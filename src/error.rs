use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Malformed model output: {0}")]
    MalformedModelOutput(String),

    #[error("Operation context missing: {0}")]
    MissingOperationContext(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AssistantError>;
