//! Serialization hooks between cached values and their stored text form

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Turns a value into the text written to storage
pub type SerializeFn<V> = Arc<dyn Fn(&V) -> anyhow::Result<String> + Send + Sync>;

/// Turns stored text back into a value. `Ok(None)` means "nothing usable is
/// cached" and is handled exactly like a missing key.
pub type DeserializeFn<V> = Arc<dyn Fn(String) -> anyhow::Result<Option<V>> + Send + Sync>;

/// Identity serializer for text values
pub fn identity_serializer() -> SerializeFn<String> {
    Arc::new(|value: &String| -> anyhow::Result<String> { Ok(value.clone()) })
}

/// Identity deserializer for text values
pub fn identity_deserializer() -> DeserializeFn<String> {
    Arc::new(|raw: String| -> anyhow::Result<Option<String>> { Ok(Some(raw)) })
}

/// JSON serializer for any serde value
pub fn json_serializer<V>() -> SerializeFn<V>
where
    V: Serialize + 'static,
{
    Arc::new(|value: &V| -> anyhow::Result<String> { Ok(serde_json::to_string(value)?) })
}

/// JSON deserializer for any serde value; a stored `null` reads as absent
pub fn json_deserializer<V>() -> DeserializeFn<V>
where
    V: DeserializeOwned + 'static,
{
    Arc::new(|raw: String| -> anyhow::Result<Option<V>> {
        Ok(serde_json::from_str::<Option<V>>(&raw)?)
    })
}
