//! Schema-name-keyed payload validators.
//!
//! The concrete JSON-schema compiler is an external collaborator (`spec.md`
//! §1); this registry only needs a name-keyed table of `validate(payload) ->
//! bool` callables for `Topic::publish` to consult.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{BrokerError, BrokerResult};

pub trait Validator: Send + Sync {
    fn validate(&self, payload: &[u8]) -> bool;
}

impl<F> Validator for F
where
    F: Fn(&[u8]) -> bool + Send + Sync,
{
    fn validate(&self, payload: &[u8]) -> bool {
        self(payload)
    }
}

/// Trivial default validator that accepts any payload. Registering a real
/// schema overrides it by name.
pub struct AlwaysValid;

impl Validator for AlwaysValid {
    fn validate(&self, _payload: &[u8]) -> bool {
        true
    }
}

/// Process-wide registry of named validators.
#[derive(Default)]
pub struct SchemaRegistry {
    validators: DashMap<String, Arc<dyn Validator>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, validator: Arc<dyn Validator>) {
        self.validators.insert(name.into(), validator);
    }

    pub fn validate(&self, name: &str, payload: &[u8]) -> BrokerResult<()> {
        let validator = self
            .validators
            .get(name)
            .ok_or_else(|| BrokerError::invalid_argument(format!("unknown schema '{name}'")))?;
        if validator.validate(payload) {
            Ok(())
        } else {
            Err(BrokerError::validation_failure(name, "payload rejected by schema validator"))
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn unknown_schema_is_invalid_argument() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.validate("missing", b"x"),
            Err(BrokerError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn registered_validator_rejects_payload() {
        let registry = SchemaRegistry::new();
        registry.register("nonempty", Arc::new(|payload: &[u8]| !payload.is_empty()));
        assert!(registry.validate("nonempty", b"").is_err());
        assert!(registry.validate("nonempty", b"ok").is_ok());
    }

    #[test]
    fn always_valid_accepts_anything() {
        let registry = SchemaRegistry::new();
        registry.register("any", Arc::new(AlwaysValid));
        assert!(registry.validate("any", b"").is_ok());
    }
}
