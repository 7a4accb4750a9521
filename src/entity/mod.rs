use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};


/// Kind of sensor entity as understood by the hub.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    #[default]
    Sensor,
    BinarySensor,
}

/// Hub entity category. Uncategorized sensors are primary sensors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Diagnostic,
    Config,
}

/// Display metadata carried by sensors.
///
/// Only sent with registration requests; updates carry id, value and
/// attributes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorMetadata {
    /// Human-readable name shown by the hub
    pub name: String,
    /// Icon identifier (e.g., "mdi:battery")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Unit of measurement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<EntityCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(default)]
    pub sensor_type: SensorType,
}

/// Sensor or event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKind {
    Sensor(SensorMetadata),
    Event,
}

/// One unit of telemetry (sensor) or occurrence (event) produced by a worker.
///
/// For sensors `id` is the unique sensor id; for events it is the event type
/// and `attributes` carry the event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    pub value: Value,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Safe to retry on transport failure
    #[serde(default)]
    pub retryable: bool,
}

/// Entity ID validation errors
#[derive(Debug, PartialEq)]
pub enum IdError {
    Empty,
    InvalidCharacter(char),
}

impl Entity {
    /// Creates a sensor entity with the given display name.
    pub fn sensor(id: impl Into<String>, name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            kind: EntityKind::Sensor(SensorMetadata {
                name: name.into(),
                ..SensorMetadata::default()
            }),
            value: value.into(),
            attributes: Map::new(),
            retryable: false,
        }
    }

    /// Creates an event entity. `event_type` becomes the entity id.
    pub fn event(event_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: event_type.into(),
            kind: EntityKind::Event,
            value: Value::Null,
            attributes: data,
            retryable: false,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        if let EntityKind::Sensor(meta) = &mut self.kind {
            meta.icon = Some(icon.into());
        }
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        if let EntityKind::Sensor(meta) = &mut self.kind {
            meta.unit = Some(unit.into());
        }
        self
    }

    pub fn with_category(mut self, category: EntityCategory) -> Self {
        if let EntityKind::Sensor(meta) = &mut self.kind {
            meta.category = Some(category);
        }
        self
    }

    pub fn with_device_class(mut self, class: impl Into<String>) -> Self {
        if let EntityKind::Sensor(meta) = &mut self.kind {
            meta.device_class = Some(class.into());
        }
        self
    }

    pub fn with_state_class(mut self, class: impl Into<String>) -> Self {
        if let EntityKind::Sensor(meta) = &mut self.kind {
            meta.state_class = Some(class.into());
        }
        self
    }

    /// Marks the sensor as a binary sensor (on/off state).
    pub fn binary(mut self) -> Self {
        if let EntityKind::Sensor(meta) = &mut self.kind {
            meta.sensor_type = SensorType::BinarySensor;
        }
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is_event(&self) -> bool {
        matches!(self.kind, EntityKind::Event)
    }

    /// Sensor metadata, `None` for events.
    pub fn metadata(&self) -> Option<&SensorMetadata> {
        match &self.kind {
            EntityKind::Sensor(meta) => Some(meta),
            EntityKind::Event => None,
        }
    }
}

/// Validates an entity id.
///
/// Ids must be non-empty and consist of lowercase alphanumerics and
/// underscores, which keeps them usable as hub unique ids and bus subject
/// tokens.
///
/// # Examples
///
/// ```
/// use hubsync::entity::{validate_entity_id, IdError};
///
/// assert!(validate_entity_id("bat0_level").is_ok());
/// assert_eq!(validate_entity_id("Bat0"), Err(IdError::InvalidCharacter('B')));
/// ```
pub fn validate_entity_id(id: &str) -> Result<(), IdError> {
    if id.is_empty() {
        return Err(IdError::Empty);
    }

    match id
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
    {
        Some(c) => Err(IdError::InvalidCharacter(c)),
        None => Ok(()),
    }
}

/// Converts an arbitrary resource name into a valid entity id fragment.
///
/// Uppercase letters are lowered, anything else outside `[a-z0-9_]` becomes
/// an underscore.
pub fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect()
}
