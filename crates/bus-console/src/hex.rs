//! Hex Text Helpers

/// Parse one byte such as `1F`, `0x1F` or `0X1f`
pub fn parse_hex_byte(text: &str) -> Option<u8> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}

/// Parse whitespace-separated bytes, skipping tokens that are not hex bytes
pub fn parse_hex_bytes(text: &str) -> Vec<u8> {
    text.split_whitespace().filter_map(parse_hex_byte).collect()
}

/// Uppercase, space-separated (`AB CD`)
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
