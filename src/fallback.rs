//! Model fallback ordering
//!
//! The candidate pool is static configuration; this module only decides the
//! order in which candidates are tried for one request.

/// Sentinel model preference meaning "use the configured pool order"
pub const AUTO_MODEL: &str = "auto";

/// Produce the ordered, de-duplicated candidate list for a request
///
/// A caller-requested model (anything other than "auto" or blank) is tried
/// first, followed by the remaining pool members, so a bad explicit choice
/// still degrades gracefully.
pub fn candidate_order(pool: &[String], preference: &str) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(pool.len() + 1);

    let preference = preference.trim();
    if !preference.is_empty() && !preference.eq_ignore_ascii_case(AUTO_MODEL) {
        ordered.push(preference.to_string());
    }

    for model in pool {
        if !ordered.iter().any(|m| m == model) {
            ordered.push(model.clone());
        }
    }

    ordered
}

/// Reorder an existing candidate list so `chosen` is tried first
///
/// Used by auto-continuation: the model that produced the previous chunk is
/// preferred for the next one.
pub fn promote(order: &[String], chosen: &str) -> Vec<String> {
    let mut promoted: Vec<String> = Vec::with_capacity(order.len());
    if order.iter().any(|m| m == chosen) {
        promoted.push(chosen.to_string());
    }
    for model in order {
        if model != chosen {
            promoted.push(model.clone());
        }
    }
    promoted
}
