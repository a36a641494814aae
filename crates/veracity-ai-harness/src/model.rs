use std::fmt;

/// Stable identifier for a provider implementation (for example `anthropic`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Model selection for a run: which provider, and which of its models.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelRef {
    pub provider: ProviderId,
    /// Provider-specific model name (for example `claude-sonnet-4-20250514`).
    pub model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<ProviderId>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_displays_as_raw_string() {
        assert_eq!(ProviderId::new("anthropic").to_string(), "anthropic");
    }

    #[test]
    fn provider_id_serializes_transparently() {
        let json = serde_json::to_string(&ProviderId::new("anthropic")).expect("serialize");
        assert_eq!(json, "\"anthropic\"");
    }
}
