use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Longest identity hash accepted by any backend.
pub const MAX_IDENTITY_HASH_LEN: usize = 1024;

/// Principal structure and action of an audit event.
///
/// Only stable fields take part in the identity; event ids, timestamps,
/// source addresses and access key ids are deliberately absent so repeated
/// occurrences of the same action collapse onto one hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAttributes {
    pub principal_type: String,
    pub principal_arn: Option<String>,
    pub account_id: Option<String>,
    pub event_source: String,
    pub event_name: String,
    pub resource_type: Option<String>,
}

impl IdentityAttributes {
    pub fn new(
        principal_type: impl Into<String>,
        event_source: impl Into<String>,
        event_name: impl Into<String>,
    ) -> Self {
        Self {
            principal_type: principal_type.into(),
            principal_arn: None,
            account_id: None,
            event_source: event_source.into(),
            event_name: event_name.into(),
            resource_type: None,
        }
    }

    pub fn with_principal_arn(mut self, arn: impl Into<String>) -> Self {
        self.principal_arn = Some(arn.into());
        self
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Extracts identity attributes from a CloudTrail-style audit record.
    pub fn from_event(event: &Value) -> Result<Self> {
        let user_identity = event
            .get("userIdentity")
            .and_then(Value::as_object)
            .ok_or_else(|| AppError::MalformedKey("event has no userIdentity".to_string()))?;

        let event_name = event
            .get("eventName")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::MalformedKey("event has no eventName".to_string()))?;

        let text = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            principal_type: text(user_identity.get("type")).unwrap_or_default(),
            principal_arn: text(user_identity.get("arn")),
            account_id: text(user_identity.get("accountId")),
            event_source: text(event.get("eventSource")).unwrap_or_default(),
            event_name: event_name.to_string(),
            resource_type: text(event.pointer("/resources/0/type")),
        })
    }
}

/// Derives identity hashes with SHA-256.
#[derive(Debug, Clone, Default)]
pub struct IdentityHasher;

impl IdentityHasher {
    pub fn new() -> Self {
        Self
    }

    /// Hashes the attributes into a 64 character lowercase hex digest.
    pub fn hash(&self, attributes: &IdentityAttributes) -> String {
        let mut hasher = Sha256::new();

        hasher.update(b"pt:");
        hasher.update(attributes.principal_type.as_bytes());

        if let Some(ref arn) = attributes.principal_arn {
            hasher.update(b"|arn:");
            hasher.update(arn.as_bytes());
        }

        if let Some(ref account_id) = attributes.account_id {
            hasher.update(b"|acc:");
            hasher.update(account_id.as_bytes());
        }

        hasher.update(b"|src:");
        hasher.update(attributes.event_source.as_bytes());
        hasher.update(b"|evt:");
        hasher.update(attributes.event_name.as_bytes());

        if let Some(ref resource_type) = attributes.resource_type {
            hasher.update(b"|res:");
            hasher.update(resource_type.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Hashes an audit record directly.
    pub fn hash_event(&self, event: &Value) -> Result<String> {
        IdentityAttributes::from_event(event).map(|attributes| self.hash(&attributes))
    }
}

/// Rejects identity hashes no backend should ever see.
pub fn validate_identity_hash(identity_hash: &str) -> Result<()> {
    if identity_hash.trim().is_empty() {
        return Err(AppError::MalformedKey(
            "identity hash must not be empty".to_string(),
        ));
    }

    if identity_hash.len() > MAX_IDENTITY_HASH_LEN {
        return Err(AppError::MalformedKey(format!(
            "identity hash is {} bytes, limit is {}",
            identity_hash.len(),
            MAX_IDENTITY_HASH_LEN
        )));
    }

    Ok(())
}
