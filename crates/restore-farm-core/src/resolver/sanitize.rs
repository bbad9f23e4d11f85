use std::path::MAIN_SEPARATOR;

/// Character substitution applied to every raw name before it becomes a
/// path segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// Optional `(from, to)` replacement, e.g. `('|', '-')` for NTFS/SMB targets.
    pub substitute: Option<(char, char)>,
}

/// Turn an untrusted record name into a single safe path segment.
///
/// Separators and NUL become `_`. `.`, `..` and the empty name are replaced,
/// never dropped.
pub fn sanitize_segment(raw: &str, options: &SanitizeOptions) -> String {
    let segment: String = raw
        .chars()
        .map(|c| match options.substitute {
            Some((from, to)) if c == from => to,
            _ => c,
        })
        .map(|c| {
            if c == '/' || c == MAIN_SEPARATOR || c == '\0' {
                '_'
            } else {
                c
            }
        })
        .collect();

    match segment.as_str() {
        "" | "." => "_".to_string(),
        ".." => "__".to_string(),
        _ => segment,
    }
}
