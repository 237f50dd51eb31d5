use std::fmt;

use serde::{Deserialize, Serialize};

use super::RemovalProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKey {
    Gemini,
    Removebg,
    Clipdrop,
}

impl SecretKey {
    pub const ALL: [SecretKey; 3] = [SecretKey::Gemini, SecretKey::Removebg, SecretKey::Clipdrop];

    /// Environment variables checked in order.
    pub fn env_vars(self) -> &'static [&'static str] {
        match self {
            Self::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            Self::Removebg => &["REMOVEBG_API_KEY", "REMOVE_BG_API_KEY"],
            Self::Clipdrop => &["CLIPDROP_API_KEY"],
        }
    }

    /// Field name in the persisted secrets document.
    pub fn document_field(self) -> &'static str {
        match self {
            Self::Gemini => "gemini_api_key",
            Self::Removebg => "removebg_api_key",
            Self::Clipdrop => "clipdrop_api_key",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Removebg => "removebg",
            Self::Clipdrop => "clipdrop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Environment,
    Store,
    Absent,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub value: Option<String>,
    pub source: KeySource,
}

impl fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("configured", &self.value.is_some())
            .field("source", &self.source)
            .finish()
    }
}

/// Merged provider credentials. `Debug` never prints key values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSecrets {
    pub gemini: ResolvedKey,
    pub removebg: ResolvedKey,
    pub clipdrop: ResolvedKey,
    pub provider_order: Vec<RemovalProviderId>,
    pub provider_order_source: KeySource,
    pub store_error: Option<String>,
}

impl ProviderSecrets {
    pub fn key(&self, key: SecretKey) -> &ResolvedKey {
        match key {
            SecretKey::Gemini => &self.gemini,
            SecretKey::Removebg => &self.removebg,
            SecretKey::Clipdrop => &self.clipdrop,
        }
    }

    pub fn api_key(&self, key: SecretKey) -> Option<&str> {
        self.key(key).value.as_deref()
    }

    pub fn removal_key(&self, provider: RemovalProviderId) -> Option<&str> {
        self.api_key(provider.secret_key())
    }

    pub fn status(&self) -> SecretsStatus {
        SecretsStatus {
            providers: SecretKey::ALL
                .iter()
                .map(|key| ProviderKeyStatus {
                    provider: key.as_str().to_string(),
                    configured: self.key(*key).value.is_some(),
                    source: self.key(*key).source,
                })
                .collect(),
            provider_order: self.provider_order.clone(),
            provider_order_source: self.provider_order_source,
            store_error: self.store_error.clone(),
        }
    }
}

impl ResolvedKey {
    pub fn absent() -> Self {
        Self {
            value: None,
            source: KeySource::Absent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderKeyStatus {
    pub provider: String,
    pub configured: bool,
    pub source: KeySource,
}

/// Operator-facing view of the secrets; carries no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsStatus {
    pub providers: Vec<ProviderKeyStatus>,
    pub provider_order: Vec<RemovalProviderId>,
    pub provider_order_source: KeySource,
    pub store_error: Option<String>,
}
