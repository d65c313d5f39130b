//! The UUID pair that identifies a server.

use uuid::Uuid;

use crate::IdError;

/// Length of the derived short handle, in characters.
///
/// The canonical hyphenated form starts with 8 hex characters, so the short
/// handle is always pure hex.
pub const SHORT_LEN: usize = 8;

/// A server's identity: a version-4 UUID plus its derived short handle.
///
/// Only the full UUID is stored; the short form is derived on demand so the
/// two can never drift apart. Global uniqueness of the *pair* is a store-level
/// concern (the short form could collide independently of the full form), so
/// this type deliberately has no notion of uniqueness on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerUuid(Uuid);

impl ServerUuid {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID, e.g. one loaded from the database.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID for database binding.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.0
    }

    /// The canonical lowercase hyphenated form.
    #[must_use]
    pub fn full(&self) -> String {
        self.0.hyphenated().to_string()
    }

    /// The derived short handle: the first [`SHORT_LEN`] characters of the
    /// canonical form.
    #[must_use]
    pub fn short(&self) -> String {
        let mut s = self.full();
        s.truncate(SHORT_LEN);
        s
    }

    /// Parses an identity from its canonical string form.
    ///
    /// Parsing is strict: the input must already be the lowercase hyphenated
    /// rendering. Anything else (braces, URNs, uppercase hex) is rejected so
    /// that a parsed identity always formats back to its input.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let uuid = Uuid::parse_str(s).map_err(|e| IdError::InvalidUuid(e.to_string()))?;

        if uuid.hyphenated().to_string() != s {
            return Err(IdError::NotCanonical(s.to_string()));
        }

        Ok(Self(uuid))
    }
}

impl std::fmt::Display for ServerUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl std::str::FromStr for ServerUuid {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for ServerUuid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.full())
    }
}

impl<'de> serde::Deserialize<'de> for ServerUuid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl From<Uuid> for ServerUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_is_prefix_of_full() {
        let id = ServerUuid::generate();
        assert_eq!(id.short().len(), SHORT_LEN);
        assert!(id.full().starts_with(&id.short()));
    }

    #[test]
    fn test_short_is_hex() {
        let id = ServerUuid::generate();
        assert!(id.short().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_parse_canonical() {
        let s = "6f2a9c8e-1d43-4b7a-9f3e-0c5d2b8a7e61";
        let id = ServerUuid::parse(s).unwrap();
        assert_eq!(id.full(), s);
        assert_eq!(id.short(), "6f2a9c8e");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(ServerUuid::parse(""), Err(IdError::Empty));
    }

    #[test]
    fn test_parse_rejects_uppercase() {
        let s = "6F2A9C8E-1D43-4B7A-9F3E-0C5D2B8A7E61";
        assert!(matches!(
            ServerUuid::parse(s),
            Err(IdError::NotCanonical(_))
        ));
    }

    #[test]
    fn test_parse_rejects_braced_form() {
        let s = "{6f2a9c8e-1d43-4b7a-9f3e-0c5d2b8a7e61}";
        assert!(ServerUuid::parse(s).is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            ServerUuid::parse("not-a-uuid"),
            Err(IdError::InvalidUuid(_))
        ));
    }

    #[test]
    fn test_serde_roundtrip() {
        let id = ServerUuid::generate();
        let json = serde_json::to_string(&id).unwrap();
        let back: ServerUuid = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
