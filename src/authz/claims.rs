use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AuthzError;

/// One entry of the session's `user_info.roles` claim.
///
/// The identity provider emits either bare role names or SCIM-style objects;
/// both collapse to a single canonical name through [`RoleClaim::name`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoleClaim {
    Name(String),
    Detailed {
        #[serde(default)]
        display: Option<String>,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        id: Option<String>,
    },
}

impl RoleClaim {
    /// `display` when present, else `value`, else the bare string. Blank names
    /// yield `None`; a blank `display` does not fall back to `value`.
    pub fn name(&self) -> Option<&str> {
        let candidate = match self {
            RoleClaim::Name(name) => Some(name.as_str()),
            RoleClaim::Detailed { display, value, .. } => display.as_deref().or(value.as_deref()),
        };
        candidate.map(str::trim).filter(|name| !name.is_empty())
    }
}

/// Lenient parse: unrecognised entries are logged and dropped, a non-list claim
/// is treated as empty.
pub fn parse_role_claims(raw: &Value) -> Vec<RoleClaim> {
    match raw {
        Value::Array(entries) => entries
            .iter()
            .filter_map(|entry| match serde_json::from_value::<RoleClaim>(entry.clone()) {
                Ok(claim) => Some(claim),
                Err(_) => {
                    tracing::warn!(entry = %entry, "ignoring malformed role claim entry");
                    None
                }
            })
            .collect(),
        Value::Null => Vec::new(),
        other => {
            let err = AuthzError::MalformedClaim(format!("roles claim is not a list: {other}"));
            tracing::warn!(error = %err, "treating role claim as empty");
            Vec::new()
        }
    }
}

/// Canonical role names in claim order, blanks dropped, duplicates removed.
pub fn role_names(claims: &[RoleClaim]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(claims.len());
    for name in claims.iter().filter_map(RoleClaim::name) {
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    names
}
