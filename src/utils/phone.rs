/// Strips every non-digit and prefixes `country_code` when the number does
/// not already start with it. Returns `None` when no digits remain.
///
/// A number already carries a country code when it is 12+ digits long, or
/// when it starts with `country_code` followed by at least ten digits.
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let code: String = country_code.chars().filter(|c| c.is_ascii_digit()).collect();
    let has_code =
        digits.len() >= 12 || (digits.starts_with(&code) && digits.len() >= code.len() + 10);
    if code.is_empty() || has_code {
        Some(digits)
    } else {
        Some(format!("{}{}", code, digits))
    }
}

/// True when the string looks like a phone number rather than a handle.
pub fn is_phone_shaped(raw: &str) -> bool {
    let digits = raw.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 8
        && raw
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'))
}
