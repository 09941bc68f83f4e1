/// Derives the index lookup key from a path string.
///
/// Strips directory components (`/` and `\` separators, so URI segments and
/// Windows paths both work) and the final extension, leaving the base
/// filename: `file:///cache/img1.jpg`, `/srv/img1.png`, and `img1` all
/// derive the key `img1`.
///
/// The same rule is applied on insertion and lookup/removal, so the resulting
/// base-name collisions are a guarantee, not an accident: callers can probe
/// the index with any path that reduces to the same stem.
pub fn artifact_stem(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        // A leading dot is a hidden-file prefix, not an extension separator.
        Some(0) | None => name.to_string(),
        Some(idx) => name[..idx].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_directory_and_extension() {
        assert_eq!(artifact_stem("/cache/img1.jpg"), "img1");
        assert_eq!(artifact_stem("img1.jpg"), "img1");
        assert_eq!(artifact_stem("img1"), "img1");
    }

    #[test]
    fn uri_segments_count_as_directories() {
        assert_eq!(artifact_stem("file:///cache/img1.jpg"), "img1");
        assert_eq!(artifact_stem("https://cdn.example.com/a/b/img1.webp"), "img1");
    }

    #[test]
    fn windows_separators_are_stripped() {
        assert_eq!(artifact_stem(r"C:\cache\img1.jpg"), "img1");
        assert_eq!(artifact_stem(r"cache\sub\img1.png"), "img1");
    }

    #[test]
    fn only_the_final_extension_is_stripped() {
        assert_eq!(artifact_stem("/srv/archive.tar.gz"), "archive.tar");
    }

    #[test]
    fn paths_differing_only_in_dir_or_extension_collide() {
        let paths = ["/cache/img1.jpg", "/other/img1.png", "img1.webp", "img1"];
        for path in paths {
            assert_eq!(artifact_stem(path), "img1", "path {path:?}");
        }
    }

    #[test]
    fn hidden_files_keep_their_name() {
        assert_eq!(artifact_stem("/srv/.htaccess"), ".htaccess");
    }

    #[test]
    fn degenerate_inputs_do_not_panic() {
        assert_eq!(artifact_stem(""), "");
        assert_eq!(artifact_stem("/cache/"), "");
        assert_eq!(artifact_stem("."), ".");
    }
}
