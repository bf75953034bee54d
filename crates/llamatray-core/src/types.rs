//! Model records as reported by the daemon's `/api/ps` and `/api/tags`.

use serde::{Deserialize, Serialize};

use crate::metrics;

/// A size as the daemon reports it: a raw byte count, or a human-readable
/// string such as `"3.8 GB"` on some API versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeValue {
    Bytes(f64),
    Human(String),
}

impl SizeValue {
    /// Convert a JSON field into a size, ignoring anything that is neither a
    /// number nor a string.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(SizeValue::Bytes),
            serde_json::Value::String(s) => Some(SizeValue::Human(s.clone())),
            _ => None,
        }
    }

    /// Size in megabytes (0 for negative or unparseable values).
    pub fn megabytes(&self) -> f64 {
        match self {
            SizeValue::Bytes(b) => metrics::to_megabytes(Some(*b)),
            SizeValue::Human(s) => metrics::parse_human_size(Some(s)),
        }
    }
}

/// Which size field of a [`ModelRecord`] to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeField {
    /// Total resident / on-disk size (`size`).
    Size,
    /// Accelerator-resident portion (`size_vram`).
    Vram,
}

/// One entry from either endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_vram: Option<SizeValue>,
}

impl ModelRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            size_vram: None,
        }
    }

    pub fn with_size(mut self, bytes: f64) -> Self {
        self.size = Some(SizeValue::Bytes(bytes));
        self
    }

    pub fn with_vram(mut self, bytes: f64) -> Self {
        self.size_vram = Some(SizeValue::Bytes(bytes));
        self
    }

    /// Selected field in megabytes; a missing field counts as 0.
    pub fn field_mb(&self, field: SizeField) -> f64 {
        let value = match field {
            SizeField::Size => self.size.as_ref(),
            SizeField::Vram => self.size_vram.as_ref(),
        };
        value.map(SizeValue::megabytes).unwrap_or(0.0)
    }

    pub fn size_mb(&self) -> f64 {
        self.field_mb(SizeField::Size)
    }

    pub fn vram_mb(&self) -> f64 {
        self.field_mb(SizeField::Vram)
    }

    /// Name without the `:tag` suffix.
    pub fn base_name(&self) -> &str {
        self.name.split(':').next().unwrap_or(&self.name)
    }
}
