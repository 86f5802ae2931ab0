//! Frame-size and nested-payload bounds (§4.8, §8 B1/B2).

use crate::{MAX_BUFFER_SIZE, MAX_COLLECTION_SIZE, MAX_JSON_DEPTH};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LimitError {
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("nested value exceeds max depth {max}")]
    TooDeep { max: usize },

    #[error("collection of {size} entries exceeds the {max} entry limit")]
    CollectionTooLarge { size: usize, max: usize },
}

/// Rejects a raw inbound frame whose byte length exceeds [`MAX_BUFFER_SIZE`].
pub fn check_frame_size(bytes: &[u8]) -> Result<(), LimitError> {
    if bytes.len() > MAX_BUFFER_SIZE {
        return Err(LimitError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_BUFFER_SIZE,
        });
    }
    Ok(())
}

/// Walks an opaque JSON value (e.g. persisted room metadata) and rejects
/// excessive nesting depth or oversized arrays/objects at any level.
pub fn check_nested_value(value: &serde_json::Value) -> Result<(), LimitError> {
    check_depth(value, 0)
}

fn check_depth(value: &serde_json::Value, depth: usize) -> Result<(), LimitError> {
    if depth > MAX_JSON_DEPTH {
        return Err(LimitError::TooDeep { max: MAX_JSON_DEPTH });
    }
    match value {
        serde_json::Value::Array(items) => {
            if items.len() > MAX_COLLECTION_SIZE {
                return Err(LimitError::CollectionTooLarge {
                    size: items.len(),
                    max: MAX_COLLECTION_SIZE,
                });
            }
            for item in items {
                check_depth(item, depth + 1)?;
            }
            Ok(())
        }
        serde_json::Value::Object(map) => {
            if map.len() > MAX_COLLECTION_SIZE {
                return Err(LimitError::CollectionTooLarge {
                    size: map.len(),
                    max: MAX_COLLECTION_SIZE,
                });
            }
            for v in map.values() {
                check_depth(v, depth + 1)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_at_max_is_accepted() {
        let bytes = vec![b'a'; MAX_BUFFER_SIZE];
        assert!(check_frame_size(&bytes).is_ok());
    }

    #[test]
    fn frame_over_max_is_rejected() {
        let bytes = vec![b'a'; MAX_BUFFER_SIZE + 1];
        assert_eq!(
            check_frame_size(&bytes),
            Err(LimitError::FrameTooLarge {
                size: MAX_BUFFER_SIZE + 1,
                max: MAX_BUFFER_SIZE
            })
        );
    }

    #[test]
    fn shallow_value_is_accepted() {
        let value = json!({"a": [1, 2, 3]});
        assert!(check_nested_value(&value).is_ok());
    }

    #[test]
    fn deeply_nested_value_is_rejected() {
        let mut value = json!(1);
        for _ in 0..=MAX_JSON_DEPTH + 1 {
            value = json!([value]);
        }
        assert!(matches!(
            check_nested_value(&value),
            Err(LimitError::TooDeep { .. })
        ));
    }

    #[test]
    fn oversized_array_is_rejected() {
        let items: Vec<i32> = (0..MAX_COLLECTION_SIZE as i32 + 1).collect();
        let value = json!(items);
        assert!(matches!(
            check_nested_value(&value),
            Err(LimitError::CollectionTooLarge { .. })
        ));
    }
}
