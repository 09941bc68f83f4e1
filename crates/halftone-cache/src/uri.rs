use std::path::PathBuf;

use url::Url;

/// Classifies an artifact location string, returning the local filesystem
/// path when the artifact lives on local disk.
///
/// - `file:` URIs convert via [`Url::to_file_path`].
/// - Strings without a scheme are plain filesystem paths.
/// - Single-letter schemes are Windows drive prefixes (`C:\cache\img1.jpg`),
///   not URIs.
/// - Everything else (`http:`, `s3:`, ...) is a remote resource: `None`.
pub fn local_file_path(path: &str) -> Option<PathBuf> {
    match Url::parse(path) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
        Ok(url) if url.scheme().len() == 1 => Some(PathBuf::from(path)),
        Ok(_) => None,
        Err(url::ParseError::RelativeUrlWithoutBase) => Some(PathBuf::from(path)),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_uri_converts_to_path() {
        assert_eq!(
            local_file_path("file:///cache/img1.jpg"),
            Some(PathBuf::from("/cache/img1.jpg"))
        );
    }

    #[test]
    fn plain_paths_are_local() {
        assert_eq!(
            local_file_path("/cache/img1.jpg"),
            Some(PathBuf::from("/cache/img1.jpg"))
        );
        assert_eq!(
            local_file_path("cache/img1.jpg"),
            Some(PathBuf::from("cache/img1.jpg"))
        );
    }

    #[test]
    fn windows_drive_paths_are_local() {
        assert_eq!(
            local_file_path(r"C:\cache\img1.jpg"),
            Some(PathBuf::from(r"C:\cache\img1.jpg"))
        );
    }

    #[test]
    fn remote_schemes_are_not_local() {
        assert_eq!(local_file_path("https://cdn.example.com/img1.jpg"), None);
        assert_eq!(local_file_path("http://cdn.example.com/img1.jpg"), None);
        assert_eq!(local_file_path("s3://bucket/img1.jpg"), None);
    }
}
