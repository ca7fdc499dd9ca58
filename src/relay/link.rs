//! Link validation against the accepted TeraBox host list.

use url::Url;

/// Hosts accepted by default. A config file may override the list.
pub const DEFAULT_HOSTS: [&str; 6] = [
    "terabox.com",
    "1024terabox.com",
    "teraboxapp.com",
    "teraboxlink.com",
    "terasharelink.com",
    "terafileshare.com",
];

/// Check whether the text is an http(s) URL whose host is one of the
/// accepted domains or a subdomain of one. The URL is parsed structurally;
/// a host that merely contains an accepted domain in its path or name does
/// not pass.
pub fn is_supported_link(text: &str, hosts: &[String]) -> bool {
    let parsed = match Url::parse(text.trim()) {
        Ok(url) => url,
        Err(_) => return false,
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    let host = match parsed.host_str() {
        Some(host) => host.to_ascii_lowercase(),
        None => return false,
    };

    hosts
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}
