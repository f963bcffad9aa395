//! Topic name and topic filter validation, plus filter matching.

use crate::encoding::STRING_MAX;
use crate::error::{MqttError, Result};

/// A publish topic: non-empty, at most 65535 bytes, no nul bytes, and no
/// wildcard characters.
pub fn validate_topic_name(topic: &str) -> Result<()> {
    if topic.is_empty() || topic.len() > STRING_MAX {
        return Err(MqttError::TopicName(topic.to_string()));
    }
    if topic.bytes().any(|b| b == 0) || topic.contains(['+', '#']) {
        return Err(MqttError::TopicName(topic.to_string()));
    }
    Ok(())
}

/// A subscription filter: `+` must occupy a whole level; `#` must occupy the
/// whole final level.
pub fn validate_topic_filter(filter: &str) -> Result<()> {
    if filter.is_empty() || filter.len() > STRING_MAX || filter.bytes().any(|b| b == 0) {
        return Err(MqttError::TopicFilter(filter.to_string()));
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        match level {
            "+" => {}
            "#" => {
                if levels.peek().is_some() {
                    return Err(MqttError::TopicFilter(filter.to_string()));
                }
            }
            other if other.contains(['+', '#']) => {
                return Err(MqttError::TopicFilter(filter.to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Filter matching per the 3.1.1 rules: `+` matches one level, a trailing
/// `#` matches the remainder (including the parent level itself).
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/').peekable();

    loop {
        match (topic_levels.next(), filter_levels.next()) {
            (_, Some("#")) => return true,
            (Some(t), Some(f)) => {
                if f != "+" && f != t {
                    return false;
                }
            }
            (None, None) => return true,
            (None, Some(_)) | (Some(_), None) => return false,
        }
    }
}
