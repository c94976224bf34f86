use thiserror::Error;

/// Tipo de retorno conveniente para todo o projeto
pub type NfeResult<T> = Result<T, NfeError>;

/// Falhas que impedem a obtenção de uma resposta de negócio da SEFAZ.
///
/// Rejeições (`cStat` de erro) e lotes em processamento NÃO são erros:
/// chegam como valores normais em [`crate::SubmissionResult`].
#[derive(Error, Debug)]
pub enum NfeError {
    // ── Transporte ──────────────────────────────────────────────
    #[error("Falha de conexão com {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    #[error("Falha no handshake TLS com {endpoint}: {message}")]
    Tls { endpoint: String, message: String },

    #[error("Tempo limite de {seconds}s excedido aguardando {endpoint}")]
    Timeout { endpoint: String, seconds: u64 },

    #[error("Falha na comunicação com SEFAZ ({endpoint}): {message}")]
    Network { endpoint: String, message: String },

    #[error("Requisição cancelada pelo chamador")]
    Cancelled,

    // ── HTTP / SOAP ─────────────────────────────────────────────
    #[error("SEFAZ retornou status {status}: {}", fault.as_deref().unwrap_or("sem SOAP Fault"))]
    Http { status: u16, fault: Option<String> },

    #[error("SOAP Fault: {0}")]
    SoapFault(String),

    // ── Contrato ────────────────────────────────────────────────
    #[error("Resposta da SEFAZ não reconhecida: {0}")]
    Parse(String),

    // ── Falhas locais ───────────────────────────────────────────
    #[error("Pré-condição violada: {0}")]
    Precondition(String),

    #[error("Certificado inválido: {0}")]
    Certificate(String),

    #[error("Falha na assinatura digital: {0}")]
    Signature(String),

    #[error("XML inválido: {0}")]
    Xml(String),

    #[error("Erro de configuração: {0}")]
    Config(String),

    #[error("Chave de acesso inválida <{key}>: {reason}")]
    InvalidAccessKey { key: String, reason: String },

    #[error("UF desconhecida: {0}")]
    InvalidUf(String),

    #[error("Erro de I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Erro de JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Classificação usada pelo chamador para decidir entre repetir,
/// corrigir o documento ou abortar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transport,
    Http,
    Parse,
    Local,
}

impl NfeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            NfeError::Connection { .. }
            | NfeError::Tls { .. }
            | NfeError::Timeout { .. }
            | NfeError::Network { .. }
            | NfeError::Cancelled => ErrorCategory::Transport,
            NfeError::Http { .. } | NfeError::SoapFault(_) => ErrorCategory::Http,
            NfeError::Parse(_) => ErrorCategory::Parse,
            _ => ErrorCategory::Local,
        }
    }

    /// Repetir só faz sentido quando o problema pode ser passageiro.
    /// Falhas de TLS (certificado expirado, cadeia não confiável) e de
    /// contrato não se resolvem sozinhas.
    pub fn is_retryable(&self) -> bool {
        match self {
            NfeError::Connection { .. }
            | NfeError::Timeout { .. }
            | NfeError::Network { .. }
            | NfeError::Cancelled => true,
            NfeError::Http { status, fault } => *status >= 500 && fault.is_none(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, NfeError::Timeout { .. })
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        NfeError::Parse(message.into())
    }

    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        NfeError::Precondition(message.into())
    }
}

impl From<roxmltree::Error> for NfeError {
    fn from(e: roxmltree::Error) -> Self {
        NfeError::Xml(e.to_string())
    }
}

impl From<openssl::error::ErrorStack> for NfeError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        NfeError::Signature(e.to_string())
    }
}
