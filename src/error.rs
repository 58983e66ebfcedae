use thiserror::Error;

/// Errors surfaced by the normalizer, ingestion pipeline and read paths.
#[derive(Debug, Error)]
pub enum GeoError {
    /// Malformed or unsupported input, rejected before anything is persisted.
    #[error("{}", describe_validation(.feature, .message))]
    Validation { feature: Option<usize>, message: String },

    /// The operation does not apply to the target (wrong layer kind, inactive layer).
    #[error("{0}")]
    Domain(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Datastore or runtime failure.
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GeoError>;

fn describe_validation(feature: &Option<usize>, message: &str) -> String {
    match feature {
        Some(idx) => format!("feature {idx}: {message}"),
        None => message.to_string(),
    }
}

impl GeoError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { feature: None, message: message.into() }
    }

    /// Validation failure tied to a feature index of the uploaded collection.
    pub fn at_feature(feature: usize, message: impl Into<String>) -> Self {
        Self::Validation { feature: Some(feature), message: message.into() }
    }

    pub fn domain(message: impl Into<String>) -> Self { Self::Domain(message.into()) }

    pub fn not_found(what: impl Into<String>) -> Self { Self::NotFound(what.into()) }

    /// Feature index carried by a validation error, if any.
    pub fn feature(&self) -> Option<usize> {
        match self {
            Self::Validation { feature, .. } => *feature,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for GeoError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(format!("invalid JSON: {err}"))
    }
}

#[cfg(feature = "postgis")]
impl From<sqlx::Error> for GeoError {
    fn from(err: sqlx::Error) -> Self {
        Self::Infrastructure(anyhow::Error::new(err).context("[postgis] query failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::GeoError;

    #[test]
    fn validation_message_names_feature() {
        let err = GeoError::at_feature(7, "unsupported geometry type GeometryCollection");
        assert_eq!(err.to_string(), "feature 7: unsupported geometry type GeometryCollection");
        assert_eq!(err.feature(), Some(7));
    }

    #[test]
    fn anyhow_becomes_infrastructure() {
        let err: GeoError = anyhow::anyhow!("connection reset").into();
        assert!(matches!(err, GeoError::Infrastructure(_)));
    }
}
