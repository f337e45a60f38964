pub(crate) fn retriable_status(code: u16) -> bool {
    matches!(code, 500 | 502 | 503 | 504 | 429 | 408)
}

pub(crate) fn guess_filename_from_url(url: &str) -> Option<String> {
    let path = url.split('?').next().unwrap_or(url);
    path.rsplit('/').next().and_then(|s| {
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    })
}

/// Uses an identifier or server-supplied name as a single path component.
/// Only path separators are replaced; spaces and case are kept as given.
pub(crate) fn path_component(raw: &str) -> String {
    let out: String = raw
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    if out.trim().is_empty() || out == "." || out == ".." {
        "_".to_string()
    } else {
        out
    }
}

/// Rejects relative paths that would escape their destination directory.
pub(crate) fn is_contained(rel: &str) -> bool {
    use std::path::Component;
    let p = std::path::Path::new(rel);
    !rel.is_empty()
        && p.components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
