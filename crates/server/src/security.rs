//! Bounded JSON parsing for payloads posted by the external-login helper.
//!
//! The callback endpoint is unauthenticated, so its body is size- and shape-checked
//! before it is deserialized into a typed payload.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// JSON parser that enforces limits on size and structure before handing out a value.
#[derive(Debug, Clone, Copy)]
pub struct SecureJsonParser {
    max_size: usize,
    max_depth: usize,
    max_string_length: usize,
    max_array_length: usize,
    max_object_keys: usize,
}

impl Default for SecureJsonParser {
    fn default() -> Self {
        Self::callback()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JsonSecurityError {
    #[error("JSON too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
    #[error("JSON too deep: {depth} levels (max: {max})")]
    TooDeep { depth: usize, max: usize },
    #[error("String too long: {length} chars (max: {max})")]
    StringTooLong { length: usize, max: usize },
    #[error("Array too large: {length} elements (max: {max})")]
    ArrayTooLarge { length: usize, max: usize },
    #[error("Object has too many keys: {count} (max: {max})")]
    TooManyKeys { count: usize, max: usize },
    #[error("JSON parsing error: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl SecureJsonParser {
    /// Limits sized for helper callbacks: a flat object of a handful of short strings.
    pub const fn callback() -> Self {
        Self {
            max_size: 16 * 1024,
            max_depth: 4,
            max_string_length: 4 * 1024,
            max_array_length: 64,
            max_object_keys: 32,
        }
    }

    /// Parse JSON from bytes with size and structure limits
    pub fn parse_from_slice(&self, data: &[u8]) -> Result<Value, JsonSecurityError> {
        if data.len() > self.max_size {
            return Err(JsonSecurityError::TooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let value: Value = serde_json::from_slice(data)?;
        self.validate_structure(&value, 0)?;
        Ok(value)
    }

    /// Parse and then deserialize into `T`.
    pub fn parse_as<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, JsonSecurityError> {
        let value = self.parse_from_slice(data)?;
        Ok(serde_json::from_value(value)?)
    }

    fn validate_structure(&self, value: &Value, depth: usize) -> Result<(), JsonSecurityError> {
        if depth > self.max_depth {
            return Err(JsonSecurityError::TooDeep {
                depth,
                max: self.max_depth,
            });
        }

        match value {
            Value::String(s) => self.check_string(s)?,
            Value::Array(arr) => {
                if arr.len() > self.max_array_length {
                    return Err(JsonSecurityError::ArrayTooLarge {
                        length: arr.len(),
                        max: self.max_array_length,
                    });
                }
                for item in arr {
                    self.validate_structure(item, depth + 1)?;
                }
            }
            Value::Object(obj) => {
                if obj.len() > self.max_object_keys {
                    return Err(JsonSecurityError::TooManyKeys {
                        count: obj.len(),
                        max: self.max_object_keys,
                    });
                }
                for (key, val) in obj {
                    self.check_string(key)?;
                    self.validate_structure(val, depth + 1)?;
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn check_string(&self, s: &str) -> Result<(), JsonSecurityError> {
        if s.len() > self.max_string_length {
            return Err(JsonSecurityError::StringTooLong {
                length: s.len(),
                max: self.max_string_length,
            });
        }
        Ok(())
    }
}

/// Parse a helper callback body into `T` with the callback limits.
pub fn parse_callback<T: DeserializeOwned>(data: &[u8]) -> Result<T, JsonSecurityError> {
    SecureJsonParser::callback().parse_as(data)
}
