//! Topic validation and filter matching
//!
//! Topics are `/`-separated levels. Subscriptions may use the filter
//! wildcards `+` (exactly one level) and `#` (the remaining levels, last
//! position only). Published destinations never contain wildcards.

/// Validate a subscription topic (wildcards allowed)
pub fn validate_topic_filter(filter: &str) -> Result<(), String> {
    validate_common(filter)?;

    let levels: Vec<&str> = filter.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != levels.len() - 1) {
            return Err("'#' must occupy the whole last level".to_string());
        }
        if level.contains('+') && *level != "+" {
            return Err("'+' must occupy a whole level".to_string());
        }
    }

    Ok(())
}

/// Validate a publish destination (no wildcards)
pub fn validate_destination(topic: &str) -> Result<(), String> {
    validate_common(topic)?;

    if topic.contains(['+', '#']) {
        return Err("wildcards are not allowed in a destination".to_string());
    }

    Ok(())
}

fn validate_common(topic: &str) -> Result<(), String> {
    if topic.is_empty() {
        return Err("topic must not be empty".to_string());
    }
    if topic.contains('\0') {
        return Err("topic must not contain NUL".to_string());
    }
    Ok(())
}

/// True if the filter contains a wildcard level
pub fn is_wildcard(filter: &str) -> bool {
    filter.split('/').any(|level| level == "+" || level == "#")
}

/// Match a destination topic against a subscription filter
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
