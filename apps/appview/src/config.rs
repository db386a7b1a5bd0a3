//! Environment-driven configuration. Every option is an env var with a CLI
//! override, so deployments stay twelve-factor and dev runs stay terse.

use clap::Parser;
use secrecy::SecretString;

#[derive(Debug, Clone, Parser)]
#[command(name = "appview", about = "tangled appview server")]
pub struct Config {
    /// SQLite database path.
    #[arg(long, env = "CORE_DB_PATH", default_value = "appview.db")]
    pub db_path: String,

    /// Listen address for the HTTP surface.
    #[arg(long, env = "CORE_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: String,

    /// Secret used to authenticate session cookies.
    #[arg(long, env = "CORE_COOKIE_SECRET", default_value = "00000000000000000000000000000000")]
    pub cookie_secret: String,

    /// Public hostname of this appview.
    #[arg(long, env = "CORE_APPVIEW_HOST", default_value = "tangled.sh")]
    pub appview_host: String,

    /// Dev mode: plain-HTTP service calls, relaxed endpoints.
    #[arg(long, env = "CORE_DEV", default_value_t = false)]
    pub dev: bool,

    /// ATProto firehose (jetstream) endpoint.
    #[arg(long, env = "JETSTREAM_ENDPOINT", default_value = "wss://jetstream1.us-east.bsky.network/subscribe")]
    pub jetstream_endpoint: String,

    /// PLC directory for DID resolution.
    #[arg(long, env = "PLC_DIRECTORY", default_value = "https://plc.directory")]
    pub plc_directory: String,

    /// Transactional email provider key (verification mail is sent out of
    /// process; unset disables sending).
    #[arg(long, env = "RESEND_API_KEY")]
    pub resend_api_key: Option<String>,

    /// Camo media proxy.
    #[arg(long, env = "CAMO_HOST")]
    pub camo_host: Option<String>,
    #[arg(long, env = "CAMO_SHARED_SECRET")]
    pub camo_shared_secret: Option<String>,

    /// Avatar service.
    #[arg(long, env = "AVATAR_HOST")]
    pub avatar_host: Option<String>,
    #[arg(long, env = "AVATAR_SHARED_SECRET")]
    pub avatar_shared_secret: Option<String>,

    /// Product analytics sink; unset disables capture.
    #[arg(long, env = "POSTHOG_API_KEY")]
    pub posthog_api_key: Option<String>,
    #[arg(long, env = "POSTHOG_ENDPOINT", default_value = "https://eu.posthog.com")]
    pub posthog_endpoint: String,

    /// OAuth client JWKS (consumed by the session layer).
    #[arg(long, env = "OAUTH_JWKS")]
    pub oauth_jwks: Option<String>,

    /// Redis endpoint for the session/cache layer.
    #[arg(long, env = "REDIS_ADDR")]
    pub redis_addr: Option<String>,
}

impl Config {
    pub fn cookie_secret(&self) -> SecretString {
        SecretString::from(self.cookie_secret.clone())
    }
}
