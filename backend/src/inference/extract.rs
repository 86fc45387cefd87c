use super::InferenceError;
use crate::catalog::capitalize;
use serde_json::{Map, Value};
use shared::ScanResult;

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

pub const UNKNOWN_OBJECT: &str = "Unknown Item";
pub const DEFAULT_CATEGORY: &str = "Other";
pub const DEFAULT_MATERIAL: &str = "Unknown";
pub const DEFAULT_REWARD: u32 = 50;
pub const MODEL_CONDITION: &str = "Good";
pub const MODEL_CONFIDENCE: f64 = 0.9;
pub const MODEL_CO2_SAVINGS_KG: f64 = 5.0;
pub const DEFAULT_RECYCLE_INFO: &str = "Check local guidelines";

/// Pulls the JSON payload out of a model completion.
///
/// A "```json" fence wins over a bare fence; an unterminated fence runs to the
/// end of the text. Text without fences is returned as-is.
pub fn extract_json_payload(text: &str) -> &str {
    if let Some(start) = text.find(JSON_FENCE) {
        return fenced_body(&text[start + JSON_FENCE.len()..]);
    }
    if let Some(start) = text.find(FENCE) {
        return fenced_body(&text[start + FENCE.len()..]);
    }
    text
}

fn fenced_body(rest: &str) -> &str {
    match rest.find(FENCE) {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

pub fn parse_classification(completion: &str) -> Result<ScanResult, InferenceError> {
    let payload = extract_json_payload(completion);
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| InferenceError::MalformedOutput(format!("invalid JSON: {}", e)))?;
    let fields = value.as_object().ok_or_else(|| {
        InferenceError::MalformedOutput(format!("expected a JSON object, got {}", type_name(&value)))
    })?;
    Ok(normalize(fields))
}

/// Fills every field of a scan result, substituting defaults for anything the
/// model omitted or typed wrongly.
pub fn normalize(fields: &Map<String, Value>) -> ScanResult {
    let category = text_field(fields, "category")
        .map(capitalize)
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    ScanResult {
        object_name: text_field(fields, "objectName")
            .unwrap_or(UNKNOWN_OBJECT)
            .to_string(),
        category,
        material: text_field(fields, "material")
            .unwrap_or(DEFAULT_MATERIAL)
            .to_string(),
        condition: MODEL_CONDITION.to_string(),
        confidence_score: MODEL_CONFIDENCE,
        estimated_reward: reward_field(fields.get("estimatedCoins")).unwrap_or(DEFAULT_REWARD),
        co2_savings_kg: MODEL_CO2_SAVINGS_KG,
        upcycle_ideas: Vec::new(),
        recyclable: true,
        recycle_info: DEFAULT_RECYCLE_INFO.to_string(),
    }
}

fn text_field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn reward_field(value: Option<&Value>) -> Option<u32> {
    let coins = match value? {
        Value::Number(number) => match number.as_u64() {
            Some(whole) => return Some(whole.min(u32::MAX as u64) as u32),
            None => number.as_f64()?,
        },
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if coins.is_finite() && coins >= 0.0 {
        Some(coins.round().min(u32::MAX as f64) as u32)
    } else {
        None
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_fence_is_extracted() {
        let text = "prefix ```json {\"a\":1} ``` suffix";
        assert_eq!(extract_json_payload(text), "{\"a\":1}");
    }

    #[test]
    fn bare_fence_is_extracted() {
        let text = "prefix ``` {\"a\":1} ``` suffix";
        assert_eq!(extract_json_payload(text), "{\"a\":1}");
    }

    #[test]
    fn unfenced_text_passes_through() {
        let text = " {\"a\":1} ";
        assert_eq!(extract_json_payload(text), text);
    }

    #[test]
    fn json_fence_preferred_over_earlier_bare_fence() {
        let text = "``` noise ``` then ```json\n{\"b\":2}\n```";
        assert_eq!(extract_json_payload(text), "{\"b\":2}");
    }

    #[test]
    fn unterminated_fence_runs_to_end() {
        assert_eq!(extract_json_payload("```json\n{\"a\":1}\n"), "{\"a\":1}");
    }

    #[test]
    fn prose_is_malformed_output() {
        let result = parse_classification("I think this is a lovely wooden chair.");
        assert!(matches!(result, Err(InferenceError::MalformedOutput(_))));
    }

    #[test]
    fn non_object_json_is_malformed_output() {
        let result = parse_classification("```json\n[1, 2, 3]\n```");
        match result {
            Err(InferenceError::MalformedOutput(message)) => assert!(message.contains("array")),
            other => panic!("expected MalformedOutput, got {:?}", other),
        }
    }

    #[test]
    fn complete_payload_is_normalized() {
        let completion = "Sure! ```json\n{\"objectName\": \"Desk Lamp\", \"category\": \"electronics\", \
                          \"material\": \"Metal\", \"estimatedCoins\": 75}\n```";
        let item = parse_classification(completion).unwrap();
        assert_eq!(item.object_name, "Desk Lamp");
        assert_eq!(item.category, "Electronics");
        assert_eq!(item.material, "Metal");
        assert_eq!(item.estimated_reward, 75);
        assert_eq!(item.condition, "Good");
        assert_eq!(item.confidence_score, 0.9);
        assert_eq!(item.co2_savings_kg, 5.0);
        assert!(item.upcycle_ideas.is_empty());
        assert!(item.recyclable);
        assert_eq!(item.recycle_info, "Check local guidelines");
    }

    #[test]
    fn missing_fields_get_defaults() {
        let item = parse_classification("{}").unwrap();
        assert_eq!(item.object_name, "Unknown Item");
        assert_eq!(item.category, "Other");
        assert_eq!(item.material, "Unknown");
        assert_eq!(item.estimated_reward, 50);
    }

    #[test]
    fn wrongly_typed_fields_get_defaults() {
        let item = parse_classification(
            r#"{"objectName": 12, "category": "  ", "material": null, "estimatedCoins": "lots"}"#,
        )
        .unwrap();
        assert_eq!(item.object_name, "Unknown Item");
        assert_eq!(item.category, "Other");
        assert_eq!(item.material, "Unknown");
        assert_eq!(item.estimated_reward, 50);
    }

    #[test]
    fn reward_accepts_numeric_variants() {
        assert_eq!(reward_field(Some(&serde_json::json!(42))), Some(42));
        assert_eq!(reward_field(Some(&serde_json::json!(42.6))), Some(43));
        assert_eq!(reward_field(Some(&serde_json::json!(" 80 "))), Some(80));
        assert_eq!(reward_field(Some(&serde_json::json!(-5))), None);
        assert_eq!(reward_field(Some(&serde_json::json!(true))), None);
        assert_eq!(reward_field(None), None);
    }
}
