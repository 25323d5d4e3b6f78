use url::Url;

use crate::error::{Error, Result};

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Derive the push socket address from the REST base URL: `http(s)://host[/api]` -> `ws(s)://host/ws`.
pub fn websocket_url(base_url: &str, token: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(&normalize_url(base_url))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(Error::Config(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("cannot switch {base_url} to {scheme}")))?;
    let path = url.path().trim_end_matches('/');
    let path = path.strip_suffix("/api").unwrap_or(path).to_string();
    url.set_path(&format!("{path}/ws"));
    url.set_query(None);
    Ok(with_token(url, token))
}

pub fn with_token(mut url: Url, token: Option<&str>) -> Url {
    if let Some(t) = token.filter(|t| !t.is_empty()) {
        url.query_pairs_mut().append_pair("token", t);
    }
    url
}
