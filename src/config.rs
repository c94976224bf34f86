// ── Client Configuration ────────────────────────────────────────
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{NfeError, NfeResult};
use crate::scheduler::PollPolicy;
use crate::signature::SignatureAlgorithm;

/// Prefixo das variáveis de ambiente lidas por [`ClientConfig::from_env`].
pub const ENV_PREFIX: &str = "SEFAZ_";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Tempo máximo de uma requisição completa.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Certificados PEM adicionais (cadeia ICP-Brasil) aceitos como raiz.
    pub extra_root_certificates: Vec<PathBuf>,
    pub accept_invalid_certs: bool,
    pub signature_algorithm: SignatureAlgorithm,
    pub poll: PollPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            extra_root_certificates: Vec::new(),
            accept_invalid_certs: false,
            signature_algorithm: SignatureAlgorithm::Sha1,
            poll: PollPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn from_json(json: &str) -> NfeResult<Self> {
        let config: ClientConfig = serde_json::from_str(json)?;
        config.validate()
    }

    /// Lê `SEFAZ_*` do ambiente do processo, sobre os valores padrão.
    pub fn from_env() -> NfeResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> NfeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));
        let mut config = ClientConfig::default();

        if let Some(v) = var("TIMEOUT_SECS") {
            config.timeout_secs = parse_var("TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("CONNECT_TIMEOUT_SECS") {
            config.connect_timeout_secs = parse_var("CONNECT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("ROOT_CERTS") {
            config.extra_root_certificates = std::env::split_paths(&v).collect();
        }
        if let Some(v) = var("ACCEPT_INVALID_CERTS") {
            config.accept_invalid_certs = parse_var("ACCEPT_INVALID_CERTS", &v)?;
        }
        if let Some(v) = var("SIGNATURE_ALGORITHM") {
            config.signature_algorithm = SignatureAlgorithm::from_str(&v)?;
        }
        if let Some(v) = var("POLL_INITIAL_DELAY_SECS") {
            config.poll.initial_delay_secs = parse_var("POLL_INITIAL_DELAY_SECS", &v)?;
        }
        if let Some(v) = var("POLL_INTERVAL_SECS") {
            config.poll.interval_secs = parse_var("POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = var("POLL_MAX_ATTEMPTS") {
            config.poll.max_attempts = parse_var("POLL_MAX_ATTEMPTS", &v)?;
        }

        config.validate()
    }

    fn validate(self) -> NfeResult<Self> {
        if self.timeout_secs == 0 {
            return Err(NfeError::Config("timeout_secs deve ser maior que zero".into()));
        }
        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > self.timeout_secs {
            return Err(NfeError::Config(
                "connect_timeout_secs deve estar entre 1 e timeout_secs".into(),
            ));
        }
        if self.poll.max_attempts == 0 {
            return Err(NfeError::Config("poll.max_attempts deve ser maior que zero".into()));
        }
        if self.poll.backoff_factor < 1.0 {
            return Err(NfeError::Config("poll.backoff_factor não pode ser menor que 1".into()));
        }
        Ok(self)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> NfeResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| NfeError::Config(format!("{ENV_PREFIX}{name} inválido: {value}")))
}
