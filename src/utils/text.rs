/// Shorten a file name for notification text.
///
/// Keeps the first `max` characters and appends an ellipsis, so a long
/// name still identifies the file without flooding the notice.
pub fn truncate_name(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        name.to_string()
    } else {
        let head: String = name.chars().take(max).collect();
        format!("{head}...")
    }
}
