use thiserror::Error;

/// Errors raised when looking up or instantiating catalog entries.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Agent '{id}' not found. Available agents: {available:?}")]
    UnknownAgent { id: String, available: Vec<String> },

    #[error("Team '{id}' not found. Available teams: {available:?}")]
    UnknownTeam { id: String, available: Vec<String> },

    #[error("Toolset '{id}' not found. Available toolsets: {available:?}")]
    UnknownToolset { id: String, available: Vec<String> },

    #[error("Failed to instantiate {kind} '{id}': {reason}")]
    Build {
        kind: &'static str,
        id: String,
        reason: String,
    },

    #[error("Agent '{id}' has no knowledge base configured")]
    NoKnowledge { id: String },

    #[error("Failed to load knowledge for agent '{id}': {reason}")]
    Knowledge { id: String, reason: String },
}

impl CatalogError {
    pub(crate) fn build(kind: &'static str, id: &str, err: anyhow::Error) -> Self {
        Self::Build {
            kind,
            id: id.to_string(),
            reason: format!("{err:#}"),
        }
    }

    /// True for lookups of identifiers that were never registered.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnknownAgent { .. } | Self::UnknownTeam { .. } | Self::UnknownToolset { .. }
        )
    }
}
