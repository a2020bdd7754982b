use thiserror::Error;

#[derive(Error, Debug)]
pub enum PopcornError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Unknown alert detector: {0}")]
    UnknownDetector(String),
}
