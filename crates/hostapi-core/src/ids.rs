//! Identifier newtypes used at the boundaries between capabilities, the
//! capability set, and the wire.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Opaque iterator identifier, unique within the capability set that minted
/// it. Deliberately a random 128-bit token rather than a pointer or counter:
/// per §9, iterator ids must be unforgeable, so a guest cannot probe for
/// another service's iterator by guessing small integers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IteratorId(Arc<str>);

impl IteratorId {
    /// Mint a fresh, unforgeable iterator id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    /// Parse an iterator id received from the guest. Any non-empty string is
    /// accepted; uniqueness and ownership are enforced by the capability set,
    /// not by this type.
    pub fn parse(value: impl Into<Arc<str>>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() {
            return None;
        }
        Some(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IteratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The caller's identity, carried on the request envelope's metadata and
/// compared against the identity stored on an iterator record at
/// `next_iterator` time (§4.5 step 3).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceIdentity {
    name: Arc<str>,
    version: Arc<str>,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<Arc<str>>, version: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterator_ids_are_unique_and_non_empty() {
        let a = IteratorId::generate();
        let b = IteratorId::generate();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn parse_rejects_empty_id() {
        assert!(IteratorId::parse("").is_none());
        assert!(IteratorId::parse("abc").is_some());
    }

    #[test]
    fn service_identity_equality_is_by_value() {
        let a = ServiceIdentity::new("svc", "1.0.0");
        let b = ServiceIdentity::new("svc", "1.0.0");
        assert_eq!(a, b);
    }
}
