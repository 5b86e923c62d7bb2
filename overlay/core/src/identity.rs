//! Overlay Identity
//!
//! Deterministic encoding between an overlay's `(typename, arguments)` pair
//! and the opaque, URL-safe identifier that travels in query strings and
//! protocol headers.
//!
//! # Format
//!
//! ```text
//! profile-editor                      no arguments: the typename verbatim
//! profile-editor:eyJpZCI6N30          typename ":" base64url(JSON(arguments))
//! ```
//!
//! Arguments are canonicalised (object keys sorted, recursively) before
//! encoding, so two identities with equal typenames and equal argument maps
//! always produce the same identifier. Base64 is unpadded; padded input is
//! accepted on decode.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Separator between the typename and the encoded arguments
pub const ARGS_SEPARATOR: char = ':';

/// Overlay arguments: a JSON object
pub type OverlayArgs = Map<String, Value>;

/// Reasons an identifier could not be decoded
///
/// Every variant means "malformed identifier". Callers treat it as
/// "overlay not found", never as a crash.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The identifier (or its typename part) is empty
    #[error("overlay identifier has no typename")]
    MissingTypename,

    /// The typename contains characters outside the allowed set
    #[error("invalid overlay typename {0:?}")]
    InvalidTypename(String),

    /// The argument segment is not valid base64url
    #[error("overlay arguments are not valid base64url: {0}")]
    Base64(String),

    /// The decoded argument segment is not valid JSON
    #[error("overlay arguments are not valid JSON: {0}")]
    Json(String),

    /// The decoded arguments are valid JSON but not an object
    #[error("overlay arguments must be a JSON object")]
    ArgumentsNotObject,
}

/// Check that a typename only uses `[A-Za-z0-9_/-]`
///
/// `.`, `:` and `,` are reserved by the prop namespace, the argument
/// separator and the stack header respectively.
pub fn validate_typename(typename: &str) -> Result<(), IdentityError> {
    if typename.is_empty() {
        return Err(IdentityError::MissingTypename);
    }
    let valid = typename
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/'));
    if valid {
        Ok(())
    } else {
        Err(IdentityError::InvalidTypename(typename.to_string()))
    }
}

/// Encode a typename and argument map into an identifier string
///
/// # Errors
///
/// Returns [`IdentityError::InvalidTypename`] or
/// [`IdentityError::MissingTypename`] for an unusable typename.
pub fn encode(typename: &str, args: &OverlayArgs) -> Result<String, IdentityError> {
    validate_typename(typename)?;
    if args.is_empty() {
        return Ok(typename.to_string());
    }

    let canonical = canonicalize(Value::Object(args.clone()));
    let json = serde_json::to_vec(&canonical).map_err(|e| IdentityError::Json(e.to_string()))?;
    Ok(format!(
        "{typename}{ARGS_SEPARATOR}{}",
        URL_SAFE_NO_PAD.encode(json)
    ))
}

/// Decode an identifier string into its typename and arguments
///
/// # Errors
///
/// Returns an [`IdentityError`] describing why the identifier is malformed.
pub fn decode(id: &str) -> Result<(String, OverlayArgs), IdentityError> {
    let (typename, encoded) = match id.split_once(ARGS_SEPARATOR) {
        Some((typename, encoded)) => (typename, Some(encoded)),
        None => (id, None),
    };
    validate_typename(typename)?;

    let Some(encoded) = encoded else {
        return Ok((typename.to_string(), OverlayArgs::new()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| IdentityError::Base64(e.to_string()))?;
    let value: Value =
        serde_json::from_slice(&bytes).map_err(|e| IdentityError::Json(e.to_string()))?;

    match canonicalize(value) {
        Value::Object(args) => Ok((typename.to_string(), args)),
        _ => Err(IdentityError::ArgumentsNotObject),
    }
}

/// Rebuild a JSON value with every object's keys in sorted order
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// A decoded overlay identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlayIdentity {
    /// Handler typename
    pub typename: String,
    /// Arguments bound to the handler
    pub args: OverlayArgs,
}

impl OverlayIdentity {
    /// Create an identity without arguments
    pub fn new(typename: impl Into<String>) -> Self {
        Self {
            typename: typename.into(),
            args: OverlayArgs::new(),
        }
    }

    /// Create an identity with arguments
    pub fn with_args(typename: impl Into<String>, args: OverlayArgs) -> Self {
        Self {
            typename: typename.into(),
            args,
        }
    }

    /// Encode into an [`OverlayId`]
    ///
    /// # Errors
    ///
    /// Fails if the typename is not valid.
    pub fn to_id(&self) -> Result<OverlayId, IdentityError> {
        encode(&self.typename, &self.args).map(OverlayId)
    }
}

/// Opaque, URL-safe overlay identifier
///
/// Always holds the canonical encoding, so string equality is identity
/// equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(String);

impl OverlayId {
    /// Build an identifier from a typename and arguments
    ///
    /// # Errors
    ///
    /// Fails if the typename is not valid.
    pub fn new(typename: &str, args: &OverlayArgs) -> Result<Self, IdentityError> {
        encode(typename, args).map(Self)
    }

    /// Build an identifier for a typename without arguments
    ///
    /// # Errors
    ///
    /// Fails if the typename is not valid.
    pub fn from_typename(typename: &str) -> Result<Self, IdentityError> {
        Self::new(typename, &OverlayArgs::new())
    }

    /// Parse and canonicalise an identifier received from the outside
    ///
    /// # Errors
    ///
    /// Returns an [`IdentityError`] when the string is malformed.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let (typename, args) = decode(raw)?;
        Self::new(&typename, &args)
    }

    /// Decode back into typename and arguments
    ///
    /// # Errors
    ///
    /// Cannot fail for identifiers built by this module; the `Result` is
    /// kept for symmetry with [`decode`].
    pub fn identity(&self) -> Result<OverlayIdentity, IdentityError> {
        let (typename, args) = decode(&self.0)?;
        Ok(OverlayIdentity { typename, args })
    }

    /// The typename part of the identifier
    #[must_use]
    pub fn typename(&self) -> &str {
        self.0
            .split_once(ARGS_SEPARATOR)
            .map_or(self.0.as_str(), |(typename, _)| typename)
    }

    /// The raw identifier string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix a prop key with this identifier
    #[must_use]
    pub fn scoped_key(&self, key: &str) -> String {
        format!("{}.{key}", self.0)
    }

    /// Strip this identifier's namespace from a prop key, if it carries it
    #[must_use]
    pub fn unscope<'k>(&self, key: &'k str) -> Option<&'k str> {
        key.strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
    }
}

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OverlayId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for OverlayId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for OverlayId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for OverlayId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
