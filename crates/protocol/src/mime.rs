//! Content types for release artifacts.

/// Returns the MIME type announced to the service for `file_name`.
///
/// Unknown extensions yield `None`, in which case the `content_type`
/// parameter is omitted from the metadata call.
pub fn content_type_for(file_name: &str) -> Option<&'static str> {
    let lower = file_name.to_ascii_lowercase();
    // Compound suffixes first.
    if lower.ends_with(".dsym.zip") || lower.ends_with(".app.zip") {
        return Some("application/zip");
    }
    let ext = lower.rsplit_once('.').map(|(_, ext)| ext)?;
    let mime = match ext {
        "apk" => "application/vnd.android.package-archive",
        "aab" => "application/x-authorware-bin",
        "ipa" => "application/octet-stream",
        "zip" => "application/zip",
        "appx" => "application/x-appx",
        "appxbundle" => "application/x-appxbundle",
        "appxupload" => "application/x-appxupload",
        "msix" => "application/x-msix",
        "msixbundle" => "application/x-msixbundle",
        "msixupload" => "application/x-msixupload",
        "msi" => "application/x-msi",
        "pkg" => "application/x-newton-compatible-pkg",
        "dmg" => "application/x-apple-diskimage",
        "exe" => "application/x-msdownload",
        "txt" => "text/plain",
        "json" => "application/json",
        "pdb" => "application/octet-stream",
        "mapping" => "text/plain",
        _ => return None,
    };
    Some(mime)
}
