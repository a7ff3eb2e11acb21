use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DehydratedApiError;
use crate::plugins::value::ValueMap;

lazy_static! {
    /// Permissive DNS label: alphanumerics with interior hyphens.
    static ref DNS_LABEL: Regex = match Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?$") {
        Ok(val) => val,
        Err(err) => panic!("Failed to compile DNS label regex: {err:?}"),
    };
    /// Aliases stick to a conservative identifier class so they survive
    /// shell scripts and file paths untouched.
    static ref ALIAS: Regex = match Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$") {
        Ok(val) => val,
        Err(err) => panic!("Failed to compile alias regex: {err:?}"),
    };
}

/// One subject line from the domains file, as served over the API.
///
/// Identity is the `(domain, alias)` pair: two entries may share a domain
/// when their aliases differ (dehydrated uses the alias to keep separate
/// certificate directories per key algorithm).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainEntry {
    /// The primary DNS name for the certificate
    pub domain: String,
    /// Subject alternative names, in file order
    #[serde(default)]
    pub alternative_names: Vec<String>,
    /// Short identifier distinguishing entries that share a domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Disabled entries stay in the file with a leading `# `
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Free-form text after the `<` marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Plugin name to the key/value map that plugin returned. Never
    /// persisted to the domains file; filled in at read time.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, ValueMap>,
}

fn enabled_default() -> bool {
    true
}

impl DomainEntry {
    /// Does this entry answer to the given `(domain, alias)` identity?
    pub fn matches(&self, domain: &str, alias: Option<&str>) -> bool {
        self.domain == domain && self.alias.as_deref() == alias
    }

    /// Validate the domain, all alternative names, and the alias.
    pub fn validate(&self) -> Result<(), DehydratedApiError> {
        check_valid_domain(&self.domain)?;
        for name in &self.alternative_names {
            check_valid_domain(name)?;
        }
        if let Some(alias) = &self.alias {
            check_valid_alias(alias)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DomainEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} (alias {})", self.domain, alias),
            None => f.write_str(&self.domain),
        }
    }
}

/// Check a name against the permissive DNS grammar: dot-separated labels,
/// with a wildcard allowed only as the whole leftmost label.
pub fn check_valid_domain(name: &str) -> Result<(), DehydratedApiError> {
    if name.is_empty() || name.len() > 253 {
        return Err(DehydratedApiError::InvalidDomainName(name.to_string()));
    }
    let mut labels = name.split('.').enumerate().peekable();
    while let Some((index, label)) = labels.next() {
        if label == "*" && index == 0 && labels.peek().is_some() {
            continue;
        }
        if label.len() > 63 || !DNS_LABEL.is_match(label) {
            return Err(DehydratedApiError::InvalidDomainName(name.to_string()));
        }
    }
    Ok(())
}

/// Check an alias against the identifier class.
pub fn check_valid_alias(alias: &str) -> Result<(), DehydratedApiError> {
    if alias.is_empty() || !ALIAS.is_match(alias) {
        return Err(DehydratedApiError::InvalidAlias(alias.to_string()));
    }
    Ok(())
}
