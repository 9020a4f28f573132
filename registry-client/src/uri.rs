//! URI utilities.

use camino::Utf8PathBuf;
use http::uri::{Authority, PathAndQuery, Scheme};
use http::Uri;

/// Build the absolute path of a registry endpoint from its segments.
///
/// Repository names may themselves contain `/`, they are joined verbatim.
pub fn endpoint<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut path = Utf8PathBuf::from("/");
    for segment in segments {
        path.push(segment.as_ref().trim_matches('/'));
    }
    path.into_string()
}

/// Build an absolute `https` URI for `path` on a registry host.
pub fn registry_uri(host: &Authority, path: &str) -> Result<Uri, http::Error> {
    Uri::builder()
        .scheme(Scheme::HTTPS)
        .authority(host.clone())
        .path_and_query(path)
        .build()
}

/// Resolve a `Location` header against the URI of the request that returned it.
///
/// Absolute locations are returned as-is, absolute paths keep the scheme and host
/// of `base`. Relative references without a leading `/` are not produced by
/// registries and are rejected.
pub fn resolve_location(base: &Uri, location: &str) -> Option<Uri> {
    let uri: Uri = location.parse().ok()?;
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Some(uri);
    }

    if !location.starts_with('/') {
        return None;
    }

    let mut parts = base.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(location).ok()?);
    Uri::from_parts(parts).ok()
}
