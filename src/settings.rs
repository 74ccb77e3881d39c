use crate::{Error, Result};
use std::env;
use std::time::Duration;

/// Credential pair for an external event subscriber.
#[derive(Debug, Clone)]
pub struct SubscriberKeys {
    pub access_key: String,
    pub secret_key: String,
}

/// Process configuration read from the environment at startup. Missing
/// required variables are a fatal configuration error.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Management-plane API endpoint and credentials.
    pub cattle_url: String,
    pub cattle_access_key: String,
    pub cattle_secret_key: String,

    pub certs_poll_interval: Duration,
    pub certs_force_update_interval: Duration,
    pub cert_file_name: String,
    pub key_file_name: String,

    /// Optional event-subscriber credential pairs. Each pair is
    /// all-or-nothing.
    pub environment_admin_keys: Option<SubscriberKeys>,
    pub agent_keys: Option<SubscriberKeys>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            cattle_url: required("CATTLE_URL")?,
            cattle_access_key: required("CATTLE_ACCESS_KEY")?,
            cattle_secret_key: required("CATTLE_SECRET_KEY")?,
            certs_poll_interval: duration_secs("CERTS_POLL_INTERVAL", 30)?,
            certs_force_update_interval: duration_secs("CERTS_FORCE_UPDATE_INTERVAL", 300)?,
            cert_file_name: string_or("CERT_FILE_NAME", "fullchain.pem"),
            key_file_name: string_or("KEY_FILE_NAME", "privkey.pem"),
            environment_admin_keys: optional_pair(
                "CATTLE_ENVIRONMENT_ADMIN_ACCESS_KEY",
                "CATTLE_ENVIRONMENT_ADMIN_SECRET_KEY",
            )?,
            agent_keys: optional_pair("CATTLE_AGENT_ACCESS_KEY", "CATTLE_AGENT_SECRET_KEY")?,
        })
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            Error::config_with_suggestion(
                format!("{name} is not set"),
                "environment",
                format!("Export {name} before starting the controller"),
            )
        })
}

fn string_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn duration_secs(name: &str, default_secs: u64) -> Result<Duration> {
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| Error::config_at(format!("{name}={raw} is not a number of seconds"), "environment")),
        _ => Ok(Duration::from_secs(default_secs)),
    }
}

fn optional_pair(access_name: &str, secret_name: &str) -> Result<Option<SubscriberKeys>> {
    let access = env::var(access_name).ok().filter(|v| !v.is_empty());
    let secret = env::var(secret_name).ok().filter(|v| !v.is_empty());
    match (access, secret) {
        (Some(access_key), Some(secret_key)) => Ok(Some(SubscriberKeys {
            access_key,
            secret_key,
        })),
        (None, None) => Ok(None),
        _ => Err(Error::config_at(
            format!("{access_name} and {secret_name} must be set together"),
            "environment",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One sequential test: the variables are process-global.
    #[test]
    fn test_from_env_required_and_defaults() {
        env::set_var("CATTLE_URL", "http://cattle.local/v2-beta");
        env::set_var("CATTLE_ACCESS_KEY", "access");
        env::set_var("CATTLE_SECRET_KEY", "secret");
        env::remove_var("CERTS_POLL_INTERVAL");
        env::remove_var("CERTS_FORCE_UPDATE_INTERVAL");
        env::remove_var("CERT_FILE_NAME");
        env::remove_var("KEY_FILE_NAME");
        env::remove_var("CATTLE_ENVIRONMENT_ADMIN_ACCESS_KEY");
        env::remove_var("CATTLE_ENVIRONMENT_ADMIN_SECRET_KEY");
        env::remove_var("CATTLE_AGENT_ACCESS_KEY");
        env::remove_var("CATTLE_AGENT_SECRET_KEY");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.cattle_url, "http://cattle.local/v2-beta");
        assert_eq!(settings.certs_poll_interval, Duration::from_secs(30));
        assert_eq!(
            settings.certs_force_update_interval,
            Duration::from_secs(300)
        );
        assert_eq!(settings.cert_file_name, "fullchain.pem");
        assert_eq!(settings.key_file_name, "privkey.pem");
        assert!(settings.environment_admin_keys.is_none());

        env::set_var("CERTS_POLL_INTERVAL", "10");
        env::set_var("CERT_FILE_NAME", "tls.crt");
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.certs_poll_interval, Duration::from_secs(10));
        assert_eq!(settings.cert_file_name, "tls.crt");

        // half a subscriber pair is a configuration error
        env::set_var("CATTLE_AGENT_ACCESS_KEY", "agent-access");
        assert!(Settings::from_env().is_err());
        env::set_var("CATTLE_AGENT_SECRET_KEY", "agent-secret");
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.agent_keys.unwrap().access_key, "agent-access");

        // a missing required variable is fatal
        env::remove_var("CATTLE_URL");
        let err = Settings::from_env().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("CATTLE_URL"));

        env::set_var("CATTLE_URL", "http://cattle.local/v2-beta");
        env::remove_var("CERTS_POLL_INTERVAL");
        env::remove_var("CERT_FILE_NAME");
        env::remove_var("CATTLE_AGENT_ACCESS_KEY");
        env::remove_var("CATTLE_AGENT_SECRET_KEY");
    }
}
