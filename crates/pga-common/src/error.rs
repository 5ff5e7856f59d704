use thiserror::Error;

#[derive(Error, Debug)]
pub enum PgaError {
    /// A policy source line or expression could not be understood.
    #[error("policy format error: {0}")]
    PolicyFormat(String),

    /// A collaborator file (CSV / JSON lookup) is missing or malformed.
    #[error("collaborator data error: {0}")]
    Collaborator(String),

    #[error("graph store error: {0}")]
    Store(String),
}

impl PgaError {
    /// Whether the audit run can continue after this error was logged.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PgaError::Store(_))
    }

    /// Process exit status for a run that stopped on this error.
    pub fn exit_code(&self) -> u8 {
        if self.is_recoverable() { 1 } else { 2 }
    }
}
