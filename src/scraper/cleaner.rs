use url::form_urlencoded::byte_serialize;

/// Price columns in output order.
pub const KNOWN_CONDITIONS: [&str; 6] = ["ungraded", "grade_7", "grade_8", "grade_9", "grade_95", "psa_10"];

/// Header label → column key.
/// "Grade 9.5" → "grade_95" | "PSA 10" → "psa_10" | "#1 Pick" → "1_pick"
pub fn normalise_condition(label: &str) -> String {
    label
        .to_lowercase()
        .replace(' ', "_")
        .replace(['#', '.'], "")
}

/// A displayed price is usable when it carries a leading `$` or is a plain
/// number with optional `.`/`,` separators. Empty and "-" mean no data.
pub fn looks_like_price(s: &str) -> bool {
    if s.is_empty() || s == "-" {
        return false;
    }
    if s.starts_with('$') {
        return true;
    }
    let digits = s.replace(['.', ','], "");
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// "Pikachu VMAX" → "pikachu-vmax" | "Farfetch'd" → "farfetch%27d"
pub fn card_slug(card_name: &str) -> String {
    let hyphenated = card_name.to_lowercase().replace(' ', "-");
    byte_serialize(hyphenated.as_bytes()).collect()
}

/// `{base}/game/{set}/{slug}-{number}`
pub fn card_url(base_url: &str, set_name: &str, card_name: &str, card_number: &str) -> String {
    format!(
        "{}/game/{}/{}-{}",
        base_url.trim_end_matches('/'),
        set_name,
        card_slug(card_name),
        card_number
    )
}
