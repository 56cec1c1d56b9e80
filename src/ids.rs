//! Textual identifiers of the form `{EntityType}-{NumericId}`.

use crate::models::{EntityType, EntryId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use thiserror::Error;

pub const ID_SEPARATOR: char = '-';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("\"{0}\" is not a valid id")]
    MalformedIdentifier(String),
    #[error("\"{id}\" cannot be processed because \"{prefix}\" is not a handled entry type")]
    UnknownEntityType { id: String, prefix: String },
    #[error("\"{0}\" does not end with an unsigned 64-bit id")]
    InvalidNumericId(String),
}

pub fn render(entity_type: EntityType, id: u64) -> String {
    let mut buf = itoa::Buffer::new();
    let digits = buf.format(id);
    let prefix = entity_type.prefix();

    let mut out = String::with_capacity(prefix.len() + 1 + digits.len());
    out.push_str(prefix);
    out.push(ID_SEPARATOR);
    out.push_str(digits);
    out
}

pub fn parse(text: &str) -> Result<EntryId, IdentifierError> {
    let malformed = || IdentifierError::MalformedIdentifier(text.to_string());

    let (prefix, digits) = text.split_once(ID_SEPARATOR).ok_or_else(malformed)?;
    if prefix.is_empty() || digits.is_empty() || digits.contains(ID_SEPARATOR) {
        return Err(malformed());
    }

    let entity_type =
        EntityType::from_prefix(prefix).ok_or_else(|| IdentifierError::UnknownEntityType {
            id: text.to_string(),
            prefix: prefix.to_string(),
        })?;

    // u64::from_str accepts a leading '+', which would break render(parse(x)) == x
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IdentifierError::InvalidNumericId(text.to_string()));
    }
    let id = digits
        .parse::<u64>()
        .map_err(|_| IdentifierError::InvalidNumericId(text.to_string()))?;

    Ok(EntryId::new(entity_type, id))
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buf = itoa::Buffer::new();
        write!(f, "{}{}{}", self.entity_type.prefix(), ID_SEPARATOR, buf.format(self.id))
    }
}

impl FromStr for EntryId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl Serialize for EntryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&render(self.entity_type, self.id))
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(serde::de::Error::custom)
    }
}
