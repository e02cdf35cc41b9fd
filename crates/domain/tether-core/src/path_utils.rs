use crate::RESERVED_NAMES;

pub struct TetherPath;

impl TetherPath {
    /// Wire form of a relative path: forward slashes, no leading `./`, no trailing `/`.
    pub fn normalize(path: &str) -> String {
        let path = if cfg!(windows) {
            path.replace('\\', "/")
        } else {
            path.to_string()
        };
        let mut trimmed = path.as_str();
        while let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        }
        trimmed.trim_end_matches('/').to_string()
    }

    /// Reject anything that could escape a replica root.
    pub fn verify_safe(rel_path: &str) -> bool {
        let p = std::path::Path::new(rel_path);
        !rel_path.is_empty()
            && !p.is_absolute()
            && !rel_path.starts_with('/')
            && !p.components().any(|c| {
                matches!(
                    c,
                    std::path::Component::ParentDir | std::path::Component::Prefix(_)
                )
            })
    }

    /// Mark and lock files live at the root only; a nested file with the same name is data.
    pub fn is_reserved(rel_path: &str) -> bool {
        RESERVED_NAMES.contains(&rel_path)
    }

    /// Paths that cannot be carried by the newline-delimited discovery protocol.
    pub fn is_line_safe(rel_path: &str) -> bool {
        !rel_path.contains('\n') && !rel_path.contains('\r')
    }
}
