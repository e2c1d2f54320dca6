/// Trim whitespace and strip outer quotes if present.
pub fn clean_str(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

/// Coerce a cell like `"2,345"`, `0.15%` or `1 234 棟` to a number.
/// Anything other than digits, `.` and `-` is discarded first; empty or
/// unparseable input yields `None`.
pub fn parse_value(raw: &str) -> Option<f64> {
    let digits: String = clean_str(raw)
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Canonical form used for nationwide matching: trimmed, `臺` → `台`.
pub fn normalize_region(raw: &str) -> String {
    clean_str(raw).replace('臺', "台")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_percent_and_separators() {
        assert_eq!(parse_value("0.15%"), Some(0.15));
        assert_eq!(parse_value(" \"12,345\" "), Some(12345.0));
        assert_eq!(parse_value("1 234 棟"), Some(1234.0));
        assert_eq!(parse_value("-3.5"), Some(-3.5));
    }

    #[test]
    fn unparseable_cells_are_missing() {
        assert_eq!(parse_value(""), None);
        assert_eq!(parse_value("—"), None);
        assert_eq!(parse_value("N/A"), None);
        assert_eq!(parse_value("1-2"), None);
    }

    #[test]
    fn region_normalization() {
        assert_eq!(normalize_region(" 臺北市 "), "台北市");
        assert_eq!(normalize_region("\"全國\""), "全國");
    }
}
