use super::Record;
use crate::error::StoreError;
use aws_sdk_dynamodb::types::AttributeValue;
use base64::{engine::general_purpose, Engine as _};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

pub const PK: &str = "PK";
pub const SK: &str = "SK";
pub const GSI1PK: &str = "GSI1PK";
pub const GSI1SK: &str = "GSI1SK";
pub const GSI1: &str = "GSI1";

const KEY_ATTRIBUTES: [&str; 4] = [PK, SK, GSI1PK, GSI1SK];

pub fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), to_attribute(v)))
                .collect(),
        ),
    }
}

pub fn from_attribute(attr: &AttributeValue) -> Result<Value, StoreError> {
    Ok(match attr {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => parse_number(n)?,
        AttributeValue::L(items) => Value::Array(
            items
                .iter()
                .map(from_attribute)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        AttributeValue::Ss(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| from_attribute(v).map(|v| (k.clone(), v)))
                .collect::<Result<Map<_, _>, _>>()?,
        ),
        other => {
            return Err(StoreError::Serialization(format!(
                "unsupported attribute type: {:?}",
                other
            )))
        }
    })
}

fn parse_number(raw: &str) -> Result<Value, StoreError> {
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Value::Number(i.into()));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| StoreError::Serialization(format!("invalid number attribute {:?}", raw)))
}

/// Full DynamoDB item for a record: its serde fields plus key and index attributes.
pub fn record_to_item<T: Record>(record: &T) -> Result<HashMap<String, AttributeValue>, StoreError> {
    let value = serde_json::to_value(record)?;
    let Value::Object(fields) = value else {
        return Err(StoreError::Serialization(format!(
            "{} does not serialize to an object",
            T::ENTITY
        )));
    };

    let mut item: HashMap<String, AttributeValue> = fields
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), to_attribute(v)))
        .collect();
    item.insert(PK.to_string(), AttributeValue::S(record.partition_key()));
    item.insert(SK.to_string(), AttributeValue::S(record.sort_key()));
    item.insert(GSI1PK.to_string(), AttributeValue::S(T::ENTITY.to_string()));
    item.insert(GSI1SK.to_string(), AttributeValue::S(record.list_key()));
    Ok(item)
}

pub fn item_to_record<T: Record>(item: &HashMap<String, AttributeValue>) -> Result<T, StoreError> {
    let mut fields = Map::new();
    for (k, v) in item {
        if KEY_ATTRIBUTES.contains(&k.as_str()) {
            continue;
        }
        fields.insert(k.clone(), from_attribute(v)?);
    }
    Ok(serde_json::from_value(Value::Object(fields))?)
}

/// Opaque page cursor: the `LastEvaluatedKey` as URL-safe base64 JSON.
pub fn encode_cursor(key: &HashMap<String, AttributeValue>) -> Result<String, StoreError> {
    let mut map = Map::new();
    for (k, v) in key {
        map.insert(k.clone(), from_attribute(v)?);
    }
    let json = serde_json::to_vec(&Value::Object(map))?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(json))
}

pub fn decode_cursor(cursor: &str) -> Result<HashMap<String, AttributeValue>, StoreError> {
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| StoreError::Serialization(format!("invalid cursor: {}", e)))?;
    let value: Value = serde_json::from_slice(&bytes)?;
    let Value::Object(map) = value else {
        return Err(StoreError::Serialization("invalid cursor".to_string()));
    };
    Ok(map.iter().map(|(k, v)| (k.clone(), to_attribute(v))).collect())
}
