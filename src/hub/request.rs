//! Webhook request bodies.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::entity::{Entity, EntityCategory, EntityKind, SensorType};

pub(super) const REGISTER_SENSOR: &str = "register_sensor";
pub(super) const UPDATE_SENSOR_STATES: &str = "update_sensor_states";
pub(super) const FIRE_EVENT: &str = "fire_event";
pub(super) const GET_CONFIG: &str = "get_config";

/// Envelope for every webhook call.
#[derive(Debug, Serialize)]
pub(super) struct Request<T> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Request<T> {
    pub fn new(kind: &'static str, data: T) -> Self {
        Self {
            kind,
            data: Some(data),
        }
    }
}

impl Request<()> {
    pub fn get_config() -> Self {
        Self {
            kind: GET_CONFIG,
            data: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct Registration<'a> {
    pub unique_id: &'a str,
    pub name: &'a str,
    pub state: &'a Value,
    pub attributes: &'a Map<String, Value>,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<EntityCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<&'a str>,
}

impl<'a> Registration<'a> {
    /// `None` for events, which are never registered.
    pub fn from_entity(entity: &'a Entity) -> Option<Self> {
        let EntityKind::Sensor(meta) = &entity.kind else {
            return None;
        };

        Some(Self {
            unique_id: &entity.id,
            name: &meta.name,
            state: &entity.value,
            attributes: &entity.attributes,
            sensor_type: meta.sensor_type,
            icon: meta.icon.as_deref(),
            unit_of_measurement: meta.unit.as_deref(),
            entity_category: meta.category,
            device_class: meta.device_class.as_deref(),
            state_class: meta.state_class.as_deref(),
        })
    }
}

#[derive(Debug, Serialize)]
pub(super) struct StateUpdate<'a> {
    pub unique_id: &'a str,
    pub state: &'a Value,
    pub attributes: &'a Map<String, Value>,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'a str>,
}

impl<'a> StateUpdate<'a> {
    pub fn from_entity(entity: &'a Entity) -> Option<Self> {
        let meta = entity.metadata()?;
        Some(Self {
            unique_id: &entity.id,
            state: &entity.value,
            attributes: &entity.attributes,
            sensor_type: meta.sensor_type,
            icon: meta.icon.as_deref(),
        })
    }
}

#[derive(Debug, Serialize)]
pub(super) struct Event<'a> {
    pub event_type: &'a str,
    pub event_data: &'a Map<String, Value>,
}

impl<'a> Event<'a> {
    pub fn from_entity(entity: &'a Entity) -> Self {
        Self {
            event_type: &entity.id,
            event_data: &entity.attributes,
        }
    }
}
