//! DestinationName - shared, cheap-to-clone destination identifier
//!
//! Destination names are fixed at configuration time and then copied into
//! every envelope, registration and metric label, so they are backed by
//! `Arc<str>`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// Logical name of a channel that messages are published to and consumed from.
///
/// # Examples
/// ```
/// use contracts::DestinationName;
///
/// let mailbox: DestinationName = "mailbox".into();
/// let copy = mailbox.clone();
/// assert_eq!(copy, "mailbox");
/// ```
#[derive(Clone, Default)]
pub struct DestinationName(Arc<str>);

impl DestinationName {
    #[inline]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for DestinationName {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for DestinationName {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DestinationName {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DestinationName {
    #[inline]
    fn from(name: &str) -> Self {
        Self(Arc::from(name))
    }
}

impl From<String> for DestinationName {
    #[inline]
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&String> for DestinationName {
    #[inline]
    fn from(name: &String) -> Self {
        Self(Arc::from(name.as_str()))
    }
}

impl fmt::Display for DestinationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DestinationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DestinationName({:?})", self.0)
    }
}

impl PartialEq for DestinationName {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for DestinationName {}

impl PartialEq<str> for DestinationName {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for DestinationName {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

impl PartialEq<String> for DestinationName {
    #[inline]
    fn eq(&self, other: &String) -> bool {
        self.0.as_ref() == other
    }
}

// Must hash like `str` so `HashMap<DestinationName, _>` can be queried with `&str`.
impl Hash for DestinationName {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl Serialize for DestinationName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DestinationName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::from)
    }
}
