use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{ArgAction, Args, ValueEnum};

pub const DEFAULT_PORT: u16 = 8080;

/// Where the ledger files come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    /// Read the ledger straight from the work directory
    Local,
    /// Mirror an S3 bucket into the work directory
    S3,
    /// Read the ledger from a Redis key and reload on channel messages
    Redis,
}

/// How requests are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthKind {
    /// `Authorization: Bearer <token>` with a shared token
    Token,
    /// Bearer JWTs verified against a JWKS endpoint
    Jwt,
}

/// Server settings. Every option can also be given as a `BAPI_` environment variable.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Ledger file to load, relative to the work directory
    #[arg(long, env = "BAPI_ENTRYPOINT", default_value = "main.beancount")]
    pub entrypoint: PathBuf,

    /// Directory holding the ledger files
    #[arg(long, env = "BAPI_WORK_DIR", default_value = "/tmp/bean")]
    pub work_dir: PathBuf,

    /// Seconds between checks for ledger changes
    #[arg(long, env = "BAPI_CACHE_INTERVAL", default_value_t = 5)]
    pub cache_interval: u64,

    #[arg(long, env = "BAPI_STORAGE", value_enum, default_value_t = StorageKind::Local)]
    pub storage: StorageKind,

    /// Only re-read local files after the file watcher reported a change
    #[arg(long, env = "BAPI_WATCH", default_value_t = true, action = ArgAction::Set)]
    pub watch: bool,

    /// Authentication scheme; a configured auth token alone selects `token`
    #[arg(long, env = "BAPI_AUTH", value_enum)]
    pub auth: Option<AuthKind>,

    /// Require `Authorization: Bearer <token>` on every request
    #[arg(long, env = "BAPI_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    #[command(flatten)]
    pub jwt: JwtSettings,

    #[command(flatten)]
    pub s3: S3Settings,

    #[command(flatten)]
    pub redis: RedisSettings,

    #[arg(long, env = "BAPI_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    #[arg(short, long, env = "BAPI_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Args)]
pub struct S3Settings {
    #[arg(long = "s3-bucket", env = "BAPI_S3__BUCKET")]
    pub bucket: Option<String>,

    /// Custom endpoint for S3 compatible stores
    #[arg(long = "s3-endpoint", env = "BAPI_S3__ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long = "s3-region", env = "BAPI_S3__REGION", default_value = "us-east-1")]
    pub region: String,

    #[arg(long = "s3-access-key-id", env = "BAPI_S3__ACCESS_KEY_ID")]
    pub access_key_id: Option<String>,

    #[arg(
        long = "s3-secret-access-key",
        env = "BAPI_S3__SECRET_ACCESS_KEY",
        hide_env_values = true
    )]
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct RedisSettings {
    /// Key holding the ledger text
    #[arg(long = "redis-key", env = "BAPI_REDIS__KEY", default_value = "beancount")]
    pub key: String,

    /// Channel whose messages trigger a reload
    #[arg(long = "redis-channel", env = "BAPI_REDIS__CHANNEL", default_value = "beancount")]
    pub channel: String,

    #[arg(id = "redis-host", long = "redis-host", env = "BAPI_REDIS__HOST", default_value = "localhost")]
    pub host: String,

    #[arg(id = "redis-port", long = "redis-port", env = "BAPI_REDIS__PORT", default_value_t = 6379)]
    pub port: u16,

    #[arg(long = "redis-password", env = "BAPI_REDIS__PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(
        long = "redis-ssl",
        env = "BAPI_REDIS__SSL",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub ssl: bool,
}

impl Default for RedisSettings {
    fn default() -> Self {
        RedisSettings {
            key: "beancount".to_string(),
            channel: "beancount".to_string(),
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            ssl: true,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct JwtSettings {
    /// Comma separated list of accepted signing algorithms
    #[arg(long = "jwt-algorithms", env = "BAPI_JWT__ALGORITHMS", default_value = "RS256")]
    pub algorithms: String,

    #[arg(long = "jwt-audience", env = "BAPI_JWT__AUDIENCE")]
    pub audience: Option<String>,

    /// URL of the JWKS document with the signing keys
    #[arg(long = "jwt-jwks", env = "BAPI_JWT__JWKS")]
    pub jwks: Option<String>,

    #[arg(long = "jwt-issuer", env = "BAPI_JWT__ISSUER")]
    pub issuer: Option<String>,
}

impl Default for JwtSettings {
    fn default() -> Self {
        JwtSettings {
            algorithms: "RS256".to_string(),
            audience: None,
            jwks: None,
            issuer: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            entrypoint: PathBuf::from("main.beancount"),
            work_dir: PathBuf::from("/tmp/bean"),
            cache_interval: 5,
            storage: StorageKind::Local,
            watch: true,
            auth: None,
            auth_token: None,
            jwt: JwtSettings::default(),
            s3: S3Settings {
                region: "us-east-1".to_string(),
                ..Default::default()
            },
            redis: RedisSettings::default(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.cache_interval == 0 {
            bail!("cache interval must be at least one second");
        }
        if self.storage == StorageKind::S3 && self.s3.bucket.as_deref().is_none_or(str::is_empty) {
            bail!("S3 storage requires a bucket (BAPI_S3__BUCKET)");
        }
        if self.s3.access_key_id.is_some() != self.s3.secret_access_key.is_some() {
            bail!("S3 credentials need both an access key id and a secret access key");
        }
        if self.storage == StorageKind::Redis && self.redis.key.is_empty() {
            bail!("Redis storage requires a key (BAPI_REDIS__KEY)");
        }
        match self.auth_kind() {
            Some(AuthKind::Token)
                if self.auth_token.as_deref().is_none_or(|token| token.trim().is_empty()) =>
            {
                bail!("token auth requires a non-empty token (BAPI_AUTH_TOKEN)");
            }
            Some(AuthKind::Jwt) => {
                let missing = [
                    ("audience", "BAPI_JWT__AUDIENCE", &self.jwt.audience),
                    ("JWKS url", "BAPI_JWT__JWKS", &self.jwt.jwks),
                    ("issuer", "BAPI_JWT__ISSUER", &self.jwt.issuer),
                ]
                .into_iter()
                .find(|(_, _, value)| value.as_deref().is_none_or(str::is_empty));
                if let Some((name, variable, _)) = missing {
                    bail!("JWT auth requires the {name} ({variable})");
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The configured auth scheme. Setting only a token implies token auth.
    pub fn auth_kind(&self) -> Option<AuthKind> {
        self.auth
            .or_else(|| self.auth_token.is_some().then_some(AuthKind::Token))
    }

    pub fn entrypoint_path(&self) -> PathBuf {
        self.work_dir.join(&self.entrypoint)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.cache_interval)
    }
}
