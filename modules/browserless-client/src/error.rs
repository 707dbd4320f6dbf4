use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserlessError>;

#[derive(Debug, Error)]
pub enum BrowserlessError {
    /// Transport-level failure reaching the browser service.
    #[error("browser service unreachable: {0}")]
    Network(#[from] reqwest::Error),

    /// The service answered but refused or failed the render.
    #[error("render failed (status {status}): {message}")]
    Api { status: u16, message: String },
}
