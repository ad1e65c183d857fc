//! Locally minted artifact pointers of the form `<scheme>://<key>`.
//!
//! Pointers issued by the remote gateway are opaque and never pass through
//! this module; they are handed back to the gateway verbatim.

const SEPARATOR: &str = "://";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerError {
    Malformed,
    UnknownScheme,
    EmptyKey,
}

impl std::fmt::Display for PointerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointerError::Malformed => write!(f, "empty pointer"),
            PointerError::UnknownScheme => write!(f, "pointer has an unknown scheme prefix"),
            PointerError::EmptyKey => write!(f, "pointer is missing its key"),
        }
    }
}

impl std::error::Error for PointerError {}

pub fn encode(scheme: &str, key: &str) -> Result<String, PointerError> {
    if key.is_empty() {
        return Err(PointerError::EmptyKey);
    }
    Ok(format!("{}{}{}", scheme, SEPARATOR, key))
}

/// Returns the key of `pointer` if it carries the `scheme://` prefix.
pub fn decode<'a>(pointer: &'a str, scheme: &str) -> Result<&'a str, PointerError> {
    let pointer = pointer.trim();
    if pointer.is_empty() {
        return Err(PointerError::Malformed);
    }

    let key = pointer
        .strip_prefix(scheme)
        .and_then(|rest| rest.strip_prefix(SEPARATOR))
        .ok_or(PointerError::UnknownScheme)?;

    if key.is_empty() {
        return Err(PointerError::EmptyKey);
    }
    Ok(key)
}

/// A pointer split into its scheme and key, for callers that need to know
/// which backend minted it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalPointer {
    scheme: String,
    key: String,
}

impl LocalPointer {
    fn new(scheme: &str, key: &str) -> Result<Self, PointerError> {
        if !is_valid_scheme(scheme) {
            return Err(PointerError::UnknownScheme);
        }
        if key.is_empty() {
            return Err(PointerError::EmptyKey);
        }
        Ok(Self {
            scheme: scheme.to_string(),
            key: key.to_string(),
        })
    }

    pub fn parse(pointer: &str) -> Result<Self, PointerError> {
        let pointer = pointer.trim();
        if pointer.is_empty() {
            return Err(PointerError::Malformed);
        }

        let (scheme, key) = pointer
            .split_once(SEPARATOR)
            .ok_or(PointerError::UnknownScheme)?;
        Self::new(scheme, key)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for LocalPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.scheme, SEPARATOR, self.key)
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    !scheme.is_empty()
        && scheme
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'))
}
