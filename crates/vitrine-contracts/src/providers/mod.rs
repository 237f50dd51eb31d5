mod secrets;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use secrets::{
    KeySource, ProviderKeyStatus, ProviderSecrets, ResolvedKey, SecretKey, SecretsStatus,
};

/// Ordered set of providers; iteration order is priority order.
#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    providers: Vec<T>,
}

pub trait NamedProvider {
    fn name(&self) -> &str;
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(providers: Vec<T>) -> Self {
        Self { providers }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.providers
            .iter()
            .find(|provider| provider.name() == name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names = self
            .providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect::<Vec<String>>();
        names.sort();
        names
    }

    pub fn providers(&self) -> &[T] {
        self.providers.as_slice()
    }

    /// Keep only the providers named in `order`, in that order.
    pub fn ordered_by<S: AsRef<str>>(self, order: &[S]) -> Self {
        let mut remaining = self.providers;
        let mut providers = Vec::with_capacity(remaining.len());
        for name in order {
            if let Some(idx) = remaining
                .iter()
                .position(|provider| provider.name() == name.as_ref())
            {
                providers.push(remaining.remove(idx));
            }
        }
        Self { providers }
    }
}

/// Third-party background-removal services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalProviderId {
    Removebg,
    Clipdrop,
}

impl RemovalProviderId {
    pub const DEFAULT_ORDER: [RemovalProviderId; 2] =
        [RemovalProviderId::Removebg, RemovalProviderId::Clipdrop];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Removebg => "removebg",
            Self::Clipdrop => "clipdrop",
        }
    }

    pub fn secret_key(self) -> SecretKey {
        match self {
            Self::Removebg => SecretKey::Removebg,
            Self::Clipdrop => SecretKey::Clipdrop,
        }
    }
}

impl NamedProvider for RemovalProviderId {
    fn name(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for RemovalProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemovalProviderId {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace(['-', '_', '.'], "").as_str() {
            "removebg" => Ok(Self::Removebg),
            "clipdrop" => Ok(Self::Clipdrop),
            other => Err(format!("unknown background removal provider '{other}'")),
        }
    }
}

/// Parse a comma/space separated provider list, dropping unknown and repeated names.
/// Returns `None` when nothing usable was listed.
pub fn parse_provider_order(raw: &str) -> Option<Vec<RemovalProviderId>> {
    let mut order = Vec::new();
    for token in raw.split([',', ' ', ';']) {
        if let Ok(provider) = token.parse::<RemovalProviderId>() {
            if !order.contains(&provider) {
                order.push(provider);
            }
        }
    }
    (!order.is_empty()).then_some(order)
}
