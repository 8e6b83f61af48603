use std::fmt;
use std::path::PathBuf;

use url::Url;

/// Where the bytes of an origin image live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// A local filesystem path (plain path or `file://` URL)
    File(PathBuf),

    /// An `http://` or `https://` URL
    Remote(Url),
}

impl Locator {
    /// Classify a locator string.
    ///
    /// Anything that does not parse as an `http(s)` or `file` URL is treated
    /// as a filesystem path, which keeps Windows drive letters (`C:\...`)
    /// from being mistaken for URL schemes.
    pub fn parse(locator: &str) -> Self {
        match Url::parse(locator) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Locator::Remote(url),
            Ok(url) if url.scheme() == "file" => match url.to_file_path() {
                Ok(path) => Locator::File(path),
                Err(()) => Locator::File(PathBuf::from(url.path())),
            },
            _ => Locator::File(PathBuf::from(locator)),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Locator::Remote(_))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::File(path) => write!(f, "{}", path.display()),
            Locator::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// Replace the extension of the last path segment, or append one.
///
/// Query strings and fragments are dropped.
pub fn replace_extension(locator: &str, extension: &str) -> String {
    let path = locator.split(['?', '#']).next().unwrap_or(locator);
    let segment_start = path.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);

    match path[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => format!("{}.{}", &path[..segment_start + dot], extension),
        _ => format!("{}.{}", path, extension),
    }
}
