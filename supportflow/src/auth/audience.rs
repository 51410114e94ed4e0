//! Audience derivation for identity tokens.

/// Derives the token audience from a tool endpoint URL.
///
/// The audience is the part of the URL preceding the mount path segment,
/// so `https://tools.example.run.app/mcp/` and
/// `https://tools.example.run.app/mcp` both yield
/// `https://tools.example.run.app`. A URL without the mount segment is its
/// own audience, minus any trailing `/`.
#[must_use]
pub fn derive_audience(endpoint: &str, mount_path: &str) -> String {
    let mount = mount_path.trim_matches('/');
    if mount.is_empty() {
        return endpoint.trim_end_matches('/').to_string();
    }

    let inner = format!("/{mount}/");
    if let Some(idx) = endpoint.find(&inner) {
        return endpoint[..idx].to_string();
    }

    let trimmed = endpoint.trim_end_matches('/');
    let suffix = format!("/{mount}");
    trimmed
        .strip_suffix(suffix.as_str())
        .unwrap_or(trimmed)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audience_strips_mount_with_trailing_slash() {
        assert_eq!(
            derive_audience("https://tools.example.run.app/mcp/", "/mcp"),
            "https://tools.example.run.app"
        );
    }

    #[test]
    fn test_audience_strips_trailing_mount() {
        assert_eq!(
            derive_audience("https://tools.example.run.app/mcp", "/mcp"),
            "https://tools.example.run.app"
        );
    }

    #[test]
    fn test_audience_keeps_prefix_before_nested_mount() {
        assert_eq!(
            derive_audience("https://host/api/mcp/v1", "mcp"),
            "https://host/api"
        );
    }

    #[test]
    fn test_audience_without_mount_is_url() {
        assert_eq!(derive_audience("https://host/rpc/", "/mcp"), "https://host/rpc");
        assert_eq!(derive_audience("https://host/mcpx", "/mcp"), "https://host/mcpx");
    }
}
