/// Reduce an instrument symbol to a filesystem-safe stem, keeping its case. Returns `None`
/// when nothing alphanumeric survives.
pub fn sanitize_file_stem(symbol: &str) -> Option<String> {
    let stem: String = symbol
        .chars()
        .filter_map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_') {
                Some(ch)
            } else if ch == ' ' || ch == '/' {
                Some('_')
            } else {
                None
            }
        })
        .collect();

    if stem.chars().any(|ch| ch.is_ascii_alphanumeric()) {
        Some(stem)
    } else {
        None
    }
}
