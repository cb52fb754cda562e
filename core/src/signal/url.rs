//! Signalling WebSocket URL construction (§6).

use url::Url;

use livekit_client_proto::ClientSdk;

pub const SIGNALLING_PROTOCOL_VERSION: i32 = 15;

/// Parameters that shape the `/rtc` query string beyond the bare host and
/// auth token.
#[derive(Debug, Clone)]
pub struct ConnectParams<'a> {
    pub auth_token: &'a str,
    pub auto_subscribe: bool,
    pub adaptive_stream: bool,
    /// Set when this connect attempt is a reconnect resuming a prior
    /// session, rather than an initial join.
    pub reconnect: bool,
    pub resuming_participant_sid: Option<&'a str>,
}

/// Builds the `{scheme}://{host}/rtc?...` signalling URL. `host` may carry
/// an explicit `ws://`/`wss://`/`http://`/`https://` scheme, or be a bare
/// host in which case `wss` is assumed.
pub fn build_signalling_url(host: &str, params: &ConnectParams<'_>) -> Result<Url, url::ParseError> {
    let normalized = normalize_scheme(host);
    let mut url = Url::parse(&normalized)?;
    url.set_path("rtc");

    {
        let mut qp = url.query_pairs_mut();
        qp.append_pair("access_token", params.auth_token);
        qp.append_pair("protocol", &SIGNALLING_PROTOCOL_VERSION.to_string());
        qp.append_pair("sdk", sdk_query_value());
        qp.append_pair("version", env!("CARGO_PKG_VERSION"));
        qp.append_pair("auto_subscribe", bool_flag(params.auto_subscribe));
        qp.append_pair("adaptive_stream", bool_flag(params.adaptive_stream));
        qp.append_pair("reconnect", bool_flag(params.reconnect));
        if let Some(sid) = params.resuming_participant_sid {
            qp.append_pair("sid", sid);
        }
    }

    Ok(url)
}

fn normalize_scheme(host: &str) -> String {
    if let Some(rest) = host.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = host.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if host.starts_with("ws://") || host.starts_with("wss://") {
        host.to_string()
    } else {
        format!("wss://{host}")
    }
}

fn bool_flag(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

fn sdk_query_value() -> &'static str {
    // This implementation's `ClientInfo.sdk` is always `Rust`; the match
    // stays exhaustive so a new SDK variant doesn't silently misreport us.
    match ClientSdk::Rust {
        ClientSdk::Rust => "rust",
        other => unreachable!("unexpected client sdk constant {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(token: &str) -> ConnectParams<'_> {
        ConnectParams {
            auth_token: token,
            auto_subscribe: true,
            adaptive_stream: false,
            reconnect: false,
            resuming_participant_sid: None,
        }
    }

    #[test]
    fn bare_host_defaults_to_wss() {
        let url = build_signalling_url("demo.livekit.cloud", &params("T0")).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/rtc");
    }

    #[test]
    fn https_host_is_normalized_to_wss() {
        let url = build_signalling_url("https://demo.livekit.cloud", &params("T0")).unwrap();
        assert_eq!(url.scheme(), "wss");
    }

    #[test]
    fn query_contains_required_parameters() {
        let url = build_signalling_url("wss://demo.livekit/", &params("T0")).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert!(pairs.contains(&("access_token".into(), "T0".into())));
        assert!(pairs.iter().any(|(k, _)| k == "protocol"));
        assert!(pairs.contains(&("sdk".into(), "rust".into())));
        assert!(pairs.contains(&("auto_subscribe".into(), "1".into())));
        assert!(pairs.contains(&("adaptive_stream".into(), "0".into())));
        assert!(pairs.contains(&("reconnect".into(), "0".into())));
    }

    #[test]
    fn resuming_sid_is_included_when_present() {
        let mut p = params("T0");
        p.reconnect = true;
        p.resuming_participant_sid = Some("PA_resume");
        let url = build_signalling_url("wss://demo.livekit/", &p).unwrap();
        assert!(url.query().unwrap().contains("sid=PA_resume"));
    }
}
