//! Topic name and topic filter rules.
//!
//! Supports MQTT wildcards in filters:
//! - `+` matches exactly one topic level
//! - `#` matches any number of remaining topic levels (must be last)

use crate::error::{Error, Result};

const MAX_TOPIC_LEN: usize = u16::MAX as usize;

/// Validate a topic name used for PUBLISH or a will.
pub fn validate_topic_name(topic: &str) -> Result<()> {
    check_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(Error::InvalidTopic(format!("wildcard in topic name: {}", topic)));
    }
    Ok(())
}

/// Validate a topic filter used for SUBSCRIBE or UNSUBSCRIBE.
pub fn validate_topic_filter(filter: &str) -> Result<()> {
    check_common(filter)?;

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') && (level != "#" || levels.peek().is_some()) {
            return Err(Error::InvalidTopic(format!(
                "'#' must be the whole last level: {}",
                filter
            )));
        }
        if level.contains('+') && level != "+" {
            return Err(Error::InvalidTopic(format!("'+' must be a whole level: {}", filter)));
        }
    }
    Ok(())
}

fn check_common(s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(Error::InvalidTopic("empty topic".to_string()));
    }
    if s.len() > MAX_TOPIC_LEN {
        return Err(Error::InvalidTopic(format!("topic longer than {} bytes", MAX_TOPIC_LEN)));
    }
    if s.contains('\0') {
        return Err(Error::InvalidTopic("topic contains NUL".to_string()));
    }
    Ok(())
}

/// Check whether `topic` matches `filter`.
///
/// Topics starting with `$` never match a filter whose first level is a wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
