use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::diagnostics::GenerationDiagnostics;
use super::request::GenerationRequest;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageHashes {
    pub sources: Vec<String>,
    pub color_reference: Option<String>,
    pub consistency_anchor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptOutput {
    pub model: String,
    pub angle: String,
    pub persona: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub sha256: String,
}

pub fn build_receipt(
    request: &GenerationRequest,
    output: &ReceiptOutput,
    hashes: &ImageHashes,
    diagnostics: &GenerationDiagnostics,
    image_path: &Path,
    receipt_path: &Path,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "request".to_string(),
        sanitize_payload(&serde_json::to_value(request).unwrap_or(Value::Null)),
    );
    root.insert(
        "output".to_string(),
        serde_json::to_value(output).unwrap_or(Value::Null),
    );
    root.insert(
        "image_hashes".to_string(),
        serde_json::to_value(hashes).unwrap_or(Value::Null),
    );
    root.insert(
        "diagnostics".to_string(),
        sanitize_payload(&serde_json::to_value(diagnostics).unwrap_or(Value::Null)),
    );

    let mut artifacts = Map::new();
    artifacts.insert(
        "image_path".to_string(),
        Value::String(image_path.to_string_lossy().to_string()),
    );
    artifacts.insert(
        "receipt_path".to_string(),
        Value::String(receipt_path.to_string_lossy().to_string()),
    );
    root.insert("artifacts".to_string(), Value::Object(artifacts));
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if lowered.contains("api_key") || lowered.contains("secret") {
                    out.insert(key.clone(), Value::String("<redacted>".to_string()));
                    continue;
                }
                if matches!(
                    lowered.as_str(),
                    "base64" | "bytes" | "image_bytes" | "data"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
