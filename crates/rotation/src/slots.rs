//! Slot, slot document and admin credential types
//!
//! A [`SlotSecretState`] is the decoded slot document:
//!
//! ```json
//! {"active_slot": "A", "A": {...}, "B": {...}}
//! ```
//!
//! Each slot sub-record carries `username`, `password`, `host`, `port` and
//! `dbname`. Sub-records may be incomplete before the first rotation, so they
//! decode into [`SlotRecord`] (all fields optional) and are promoted to a
//! complete [`Slot`] on demand. Keys this crate does not manage are kept and
//! written back unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::password::{DEFAULT_PASSWORD_LENGTH, generate_password};
use crate::secret::SecretString;

/// Port used when a record or config file does not name one
pub const DEFAULT_PORT: &str = "3306";

const ACTIVE_KEY: &str = "active_slot";

/// Label of one of the two credential slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotLabel {
    /// Initial slot
    A,
    /// Alternate slot
    B,
}

impl SlotLabel {
    /// Both labels in document order
    pub const ALL: [Self; 2] = [Self::A, Self::B];

    /// The opposite label
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Key of this slot in the slot document
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }

    /// Lowercase suffix used in managed account names
    pub fn suffix(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }
}

impl fmt::Display for SlotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotLabel {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            other => Err(StoreError::InvalidInput {
                value: other.to_owned(),
            }),
        }
    }
}

/// Standby label for an active label given as text
///
/// # Examples
///
/// ```
/// use dualslot_rotation::{SlotLabel, standby};
///
/// assert_eq!(standby("A").unwrap(), SlotLabel::B);
/// assert!(standby("C").is_err());
/// ```
pub fn standby(active: &str) -> Result<SlotLabel, StoreError> {
    active.parse::<SlotLabel>().map(SlotLabel::other)
}

/// Name of the dedicated application account for `label`
pub fn managed_username(prefix: &str, label: SlotLabel) -> String {
    format!("{prefix}_{}", label.suffix())
}

/// A complete application credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Login name
    pub username: String,
    /// Login password
    pub password: SecretString,
    /// Database host
    pub host: String,
    /// Database port, kept as text the way it is stored
    pub port: String,
    /// Database (schema) name
    pub dbname: String,
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("username", &self.username)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .finish()
    }
}

/// A possibly incomplete slot sub-record as stored
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotRecord {
    /// Login name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Login password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SecretString>,
    /// Database host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Database port; numbers and strings are both accepted
    #[serde(
        default,
        deserialize_with = "deserialize_port_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub port: Option<String>,
    /// Database name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbname: Option<String>,
    /// Unmanaged keys, written back as read
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SlotRecord {
    /// Whether every managed field is present
    pub fn is_complete(&self) -> bool {
        self.username.is_some()
            && self.password.is_some()
            && self.host.is_some()
            && self.port.is_some()
            && self.dbname.is_some()
    }

    /// Promote to a complete slot, `None` if any field is missing
    pub fn to_slot(&self) -> Option<Slot> {
        Some(Slot {
            username: self.username.clone()?,
            password: self.password.clone()?,
            host: self.host.clone()?,
            port: self.port.clone()?,
            dbname: self.dbname.clone()?,
        })
    }

    fn assign(&mut self, slot: &Slot) {
        self.username = Some(slot.username.clone());
        self.password = Some(slot.password.clone());
        self.host = Some(slot.host.clone());
        self.port = Some(slot.port.clone());
        self.dbname = Some(slot.dbname.clone());
    }
}

/// Decoded slot document
#[derive(Debug, Clone)]
pub struct SlotSecretState {
    id: String,
    active: SlotLabel,
    a: SlotRecord,
    b: SlotRecord,
    extra: Map<String, Value>,
}

impl SlotSecretState {
    /// Build a document from complete slots
    pub fn new(id: impl Into<String>, active: SlotLabel, a: &Slot, b: &Slot) -> Self {
        let mut state = Self {
            id: id.into(),
            active,
            a: SlotRecord::default(),
            b: SlotRecord::default(),
            extra: Map::new(),
        };
        state.set_slot(SlotLabel::A, a);
        state.set_slot(SlotLabel::B, b);
        state
    }

    /// Decode a document read from secret `id`
    pub fn from_json(id: &str, payload: &str) -> Result<Self, StoreError> {
        let value: Value = serde_json::from_str(payload).map_err(|source| StoreError::Decode {
            id: id.to_owned(),
            source,
        })?;
        let Value::Object(mut map) = value else {
            return Err(invalid_state(id, "document is not a JSON object"));
        };

        let active = match map.remove(ACTIVE_KEY) {
            Some(Value::String(label)) => label
                .parse::<SlotLabel>()
                .map_err(|_| invalid_state(id, format!("active_slot {label:?} is not A or B")))?,
            Some(other) => {
                return Err(invalid_state(id, format!("active_slot {other} is not A or B")));
            }
            None => return Err(invalid_state(id, "active_slot is missing")),
        };

        let a = take_record(id, &mut map, SlotLabel::A)?;
        let b = take_record(id, &mut map, SlotLabel::B)?;

        Ok(Self {
            id: id.to_owned(),
            active,
            a,
            b,
            extra: map,
        })
    }

    /// Encode the document, unmanaged keys included
    pub fn to_json(&self) -> Result<String, StoreError> {
        let encode = |source| StoreError::Decode {
            id: self.id.clone(),
            source,
        };
        let mut map = self.extra.clone();
        map.insert(
            ACTIVE_KEY.to_owned(),
            Value::String(self.active.as_str().to_owned()),
        );
        map.insert(
            SlotLabel::A.as_str().to_owned(),
            serde_json::to_value(&self.a).map_err(encode)?,
        );
        map.insert(
            SlotLabel::B.as_str().to_owned(),
            serde_json::to_value(&self.b).map_err(encode)?,
        );
        serde_json::to_string(&Value::Object(map)).map_err(encode)
    }

    /// Secret identifier the document belongs to
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Label currently fronting live traffic
    pub fn active(&self) -> SlotLabel {
        self.active
    }

    /// Label holding the previous generation
    pub fn standby(&self) -> SlotLabel {
        self.active.other()
    }

    /// Move the active pointer
    pub fn set_active(&mut self, label: SlotLabel) {
        self.active = label;
    }

    /// Stored sub-record for `label`
    pub fn record(&self, label: SlotLabel) -> &SlotRecord {
        match label {
            SlotLabel::A => &self.a,
            SlotLabel::B => &self.b,
        }
    }

    fn record_mut(&mut self, label: SlotLabel) -> &mut SlotRecord {
        match label {
            SlotLabel::A => &mut self.a,
            SlotLabel::B => &mut self.b,
        }
    }

    /// Complete slot for `label`
    ///
    /// Fails with [`StoreError::InvalidState`] if the record lacks a field.
    pub fn slot(&self, label: SlotLabel) -> Result<Slot, StoreError> {
        self.record(label)
            .to_slot()
            .ok_or_else(|| invalid_state(&self.id, format!("slot {label} is incomplete")))
    }

    /// Overwrite the managed fields of `label`
    pub fn set_slot(&mut self, label: SlotLabel, slot: &Slot) {
        self.record_mut(label).assign(slot);
    }

    /// Fill missing slot fields in place
    ///
    /// Usernames default to the managed account name, passwords are generated,
    /// the port defaults to `3306`, and host and database name are taken from
    /// the other slot, then from the given fallbacks. Returns whether anything
    /// was filled, in which case the caller must persist the document before
    /// anything re-reads it.
    pub fn ensure_defaults(
        &mut self,
        prefix: &str,
        fallback_host: Option<&str>,
        fallback_dbname: Option<&str>,
    ) -> bool {
        let mut changed = false;
        for label in SlotLabel::ALL {
            let other = self.record(label.other()).clone();
            let record = self.record_mut(label);
            if record.username.is_none() {
                record.username = Some(managed_username(prefix, label));
                changed = true;
            }
            if record.password.is_none() {
                record.password = Some(generate_password(DEFAULT_PASSWORD_LENGTH));
                changed = true;
            }
            if record.port.is_none() {
                record.port = Some(DEFAULT_PORT.to_owned());
                changed = true;
            }
            if record.host.is_none()
                && let Some(host) = other.host.as_deref().or(fallback_host)
            {
                record.host = Some(host.to_owned());
                changed = true;
            }
            if record.dbname.is_none()
                && let Some(dbname) = other.dbname.as_deref().or(fallback_dbname)
            {
                record.dbname = Some(dbname.to_owned());
                changed = true;
            }
        }
        changed
    }
}

fn take_record(
    id: &str,
    map: &mut Map<String, Value>,
    label: SlotLabel,
) -> Result<SlotRecord, StoreError> {
    match map.remove(label.as_str()) {
        Some(value @ Value::Object(_)) => {
            serde_json::from_value(value).map_err(|source| StoreError::Decode {
                id: id.to_owned(),
                source,
            })
        }
        Some(_) => Err(invalid_state(
            id,
            format!("slot {label} is not a structured record"),
        )),
        None => Err(invalid_state(id, format!("slot {label} is missing"))),
    }
}

fn invalid_state(id: &str, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidState {
        id: id.to_owned(),
        reason: reason.into(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u64),
    Text(String),
}

fn deserialize_port_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<PortValue>::deserialize(deserializer)?.map(|port| match port {
            PortValue::Number(n) => n.to_string(),
            PortValue::Text(s) => s,
        }),
    )
}

fn deserialize_port_number<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<PortValue>::deserialize(deserializer)? {
        None => Ok(3306),
        Some(PortValue::Number(n)) => u16::try_from(n).map_err(serde::de::Error::custom),
        Some(PortValue::Text(s)) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

const fn default_admin_port() -> u16 {
    3306
}

/// Privileged database account used for provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminCredential {
    /// Database endpoint; empty means "use the slot host being provisioned"
    #[serde(default)]
    pub host: String,
    /// Database port
    #[serde(
        default = "default_admin_port",
        deserialize_with = "deserialize_port_number"
    )]
    pub port: u16,
    /// Administrator login
    pub username: String,
    /// Administrator password
    pub password: SecretString,
    /// Unmanaged keys, written back as read
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AdminCredential {
    /// Decode the admin document read from secret `id`
    pub fn from_json(id: &str, payload: &str) -> Result<Self, StoreError> {
        serde_json::from_str(payload).map_err(|source| StoreError::Decode {
            id: id.to_owned(),
            source,
        })
    }

    /// Encode the admin document
    pub fn to_json(&self, id: &str) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(|source| StoreError::Decode {
            id: id.to_owned(),
            source,
        })
    }

    /// Host to connect to, falling back to `fallback` when none is stored
    pub fn endpoint_host<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.host.is_empty() {
            fallback
        } else {
            &self.host
        }
    }
}
