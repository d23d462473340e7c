//! Identifier types for the credits ledger.
//!
//! User and subscription identifiers are opaque strings issued by external
//! systems (the identity provider and the subscription subsystem). Purchase
//! and ledger entry identifiers are ULIDs minted here, so that per-user index
//! keys sort in creation order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use ulid::{Generator, Ulid};

/// Maximum length of an externally issued identifier, in bytes.
pub const MAX_EXTERNAL_ID_LEN: usize = 128;

macro_rules! external_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create an identifier, validating its format.
            ///
            /// # Errors
            ///
            /// Returns an error if the value is empty, longer than
            /// [`MAX_EXTERNAL_ID_LEN`] or contains whitespace or control characters.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                validate_external(&value)?;
                Ok(Self(value))
            }

            /// Return the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }
    };
}

macro_rules! ulid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new identifier, strictly greater than any
            /// previously generated in this process.
            #[must_use]
            pub fn generate() -> Self {
                Self(next_ulid())
            }

            /// Return the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> &Ulid {
                &self.0
            }

            /// Return the 16 big-endian bytes of the ULID.
            #[must_use]
            pub fn to_bytes(&self) -> [u8; 16] {
                self.0.to_bytes()
            }

            /// Rebuild an identifier from its 16 bytes.
            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Ulid::from_bytes(bytes))
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
                Ok(Self(ulid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

external_id! {
    /// A user identifier issued by the identity provider.
    ///
    /// Extracted from the JWT `sub` claim for end-user requests, or supplied
    /// in the request body by trusted server-to-server callers.
    UserId
}

external_id! {
    /// A subscription identifier issued by the subscription subsystem.
    SubscriptionId
}

ulid_id! {
    /// Identifier of a credit purchase record.
    PurchaseId
}

ulid_id! {
    /// Identifier of a ledger entry.
    LedgerEntryId
}

fn validate_external(value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty);
    }
    if value.len() > MAX_EXTERNAL_ID_LEN {
        return Err(IdError::TooLong { len: value.len() });
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(IdError::InvalidCharacter);
    }
    Ok(())
}

/// Mint the next ULID from a process-wide monotonic generator.
///
/// Falls back to a plain random ULID if the generator's random component
/// overflows within a single millisecond.
fn next_ulid() -> Ulid {
    static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();

    let generator = GENERATOR.get_or_init(|| Mutex::new(Generator::new()));
    let mut guard = generator
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    guard.generate().unwrap_or_else(|_| Ulid::new())
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The identifier is empty.
    #[error("identifier is empty")]
    Empty,

    /// The identifier exceeds the maximum length.
    #[error("identifier too long: {len} bytes")]
    TooLong {
        /// Actual length in bytes.
        len: usize,
    },

    /// The identifier contains whitespace or control characters.
    #[error("identifier contains whitespace or control characters")]
    InvalidCharacter,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_accepts_opaque_strings() {
        let id = UserId::new("jd7f3k2m9x8q1w0e").unwrap();
        assert_eq!(id.as_str(), "jd7f3k2m9x8q1w0e");
        assert_eq!(id.to_string(), "jd7f3k2m9x8q1w0e");
    }

    #[test]
    fn user_id_rejects_bad_input() {
        assert_eq!(UserId::new(""), Err(IdError::Empty));
        assert_eq!(UserId::new("has space"), Err(IdError::InvalidCharacter));
        assert_eq!(UserId::new("tab\there"), Err(IdError::InvalidCharacter));
        assert_eq!(
            UserId::new("x".repeat(MAX_EXTERNAL_ID_LEN + 1)),
            Err(IdError::TooLong {
                len: MAX_EXTERNAL_ID_LEN + 1
            })
        );
        assert!(UserId::new("x".repeat(MAX_EXTERNAL_ID_LEN)).is_ok());
    }

    #[test]
    fn user_id_serde_rejects_invalid() {
        let parsed: Result<UserId, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());

        let parsed: UserId = serde_json::from_str("\"user_42\"").unwrap();
        assert_eq!(parsed.as_str(), "user_42");
    }

    #[test]
    fn ledger_entry_ids_are_strictly_increasing() {
        let ids: Vec<LedgerEntryId> = (0..1000).map(|_| LedgerEntryId::generate()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(ids.windows(2).all(|w| w[0].to_bytes() < w[1].to_bytes()));
    }

    #[test]
    fn purchase_id_parses_from_display() {
        let id = PurchaseId::generate();
        let parsed: PurchaseId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(PurchaseId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn purchase_id_rejects_garbage() {
        assert_eq!("not-a-ulid".parse::<PurchaseId>(), Err(IdError::InvalidUlid));
    }
}
