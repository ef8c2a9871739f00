use std::env;
use std::net::SocketAddr;

/// Runtime settings, read from the environment once at startup.
///
/// `notify_recipient_on_send` and `clear_presence_on_disconnect` default to
/// the behavior the mobile clients were shipped against: the new-message
/// notification goes to the sender's own group and presence entries survive
/// a disconnect. Both switches exist so a deployment can opt into the
/// corrected behavior without a client change.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: SocketAddr,
    pub tls_cert_path: String,
    pub tls_key_path: String,
    pub notify_recipient_on_send: bool,
    pub clear_presence_on_disconnect: bool,
    pub fixtures_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bind: ([0, 0, 0, 0], 2052).into(),
            tls_cert_path: "ssl/chat/certificate.pem".to_string(),
            tls_key_path: "ssl/chat/private.key".to_string(),
            notify_recipient_on_send: false,
            clear_presence_on_disconnect: false,
            fixtures_path: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();

        let bind = env::var("MARKET_CHAT_BIND")
            .ok()
            .and_then(|raw| match raw.parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    log::warn!("ignoring unparseable MARKET_CHAT_BIND={raw}");
                    None
                }
            })
            .unwrap_or(defaults.bind);

        Settings {
            bind,
            tls_cert_path: env::var("MARKET_CHAT_TLS_CERT").unwrap_or(defaults.tls_cert_path),
            tls_key_path: env::var("MARKET_CHAT_TLS_KEY").unwrap_or(defaults.tls_key_path),
            notify_recipient_on_send: env_flag("MARKET_CHAT_NOTIFY_RECIPIENT"),
            clear_presence_on_disconnect: env_flag("MARKET_CHAT_CLEAR_PRESENCE"),
            fixtures_path: env::var("MARKET_CHAT_FIXTURES").ok(),
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name).map(|raw| parse_flag(&raw)).unwrap_or(false)
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing_accepts_common_spellings() {
        assert!(parse_flag("1"));
        assert!(parse_flag("true"));
        assert!(parse_flag(" Yes "));
        assert!(parse_flag("ON"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn defaults_match_shipped_behavior() {
        let settings = Settings::default();
        assert!(!settings.notify_recipient_on_send);
        assert!(!settings.clear_presence_on_disconnect);
        assert_eq!(settings.bind.port(), 2052);
    }
}
