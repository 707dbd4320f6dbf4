use thiserror::Error;

#[derive(Error, Debug)]
pub enum TradescopeError {
    /// Every acquisition strategy was exhausted without producing HTML.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// A collaborator response was not JSON-shaped. Recoverable — the
    /// extraction engine falls back to heuristics.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Network or auth failure calling an external collaborator.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
