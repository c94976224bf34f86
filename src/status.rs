// ── cStat Catalogue ─────────────────────────────────────────────
use std::fmt;

use serde::{Serialize, Serializer};

/// Código de status (`cStat`) devolvido pela SEFAZ.
///
/// Os códigos que mudam o fluxo têm variante própria. Rejeições guardam o
/// código original agrupadas por família, e qualquer valor fora do
/// catálogo cai em [`StatusCode::Unknown`] sem perder o número.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// 100 - Autorizado o uso da NF-e.
    Authorized,
    /// 101 - Cancelamento de NF-e homologado.
    CancellationApproved,
    /// 102 - Inutilização de número homologado.
    NumberingVoided,
    /// 103 - Lote recebido com sucesso.
    BatchReceived,
    /// 104 - Lote processado.
    BatchProcessed,
    /// 105 - Lote em processamento.
    BatchInProcess,
    /// 106 - Lote não localizado.
    BatchNotFound,
    /// 107 - Serviço em operação.
    ServiceRunning,
    /// 108 - Serviço paralisado momentaneamente.
    ServicePaused,
    /// 109 - Serviço paralisado sem previsão.
    ServiceStopped,
    /// 124 - EPEC autorizado.
    EpecAuthorized,
    /// 128 - Lote de evento processado.
    EventBatchProcessed,
    /// 135 - Evento registrado e vinculado a NF-e.
    EventRegistered,
    /// 136 - Evento registrado, mas não vinculado a NF-e.
    EventRegisteredUnlinked,
    /// 137 - Nenhum documento localizado (distribuição).
    NoDocumentFound,
    /// 138 - Documento localizado (distribuição).
    DocumentFound,
    /// 150 - Autorizado o uso da NF-e, autorização fora de prazo.
    AuthorizedLate,
    /// 151 - Cancelamento homologado fora de prazo.
    CancellationApprovedLate,
    /// 155 - Cancelamento homologado fora de prazo (evento).
    EventCancellationLate,
    /// 110, 205, 301, 302, 303 - Uso denegado.
    Denied(u16),
    /// 215, 225, 402, 404 - Falha de schema ou codificação do XML.
    SchemaRejected(u16),
    /// 297, 298 - Assinatura divergente.
    SignatureRejected(u16),
    /// 280 a 296 - Certificado do transmissor ou do assinante.
    CertificateRejected(u16),
    /// Demais rejeições (200 a 999).
    Rejected(u16),
    /// Código fora de qualquer faixa conhecida.
    Unknown(u16),
}

/// Família de um [`StatusCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    Authorized,
    Awaiting,
    Processed,
    EventRegistered,
    Cancelled,
    ServiceAvailable,
    ServiceUnavailable,
    Denied,
    SchemaRejection,
    SignatureRejection,
    CertificateRejection,
    BusinessRejection,
    Located,
    NotLocated,
    Unknown,
}

impl StatusCode {
    pub fn from_code(code: u16) -> Self {
        match code {
            100 => StatusCode::Authorized,
            101 => StatusCode::CancellationApproved,
            102 => StatusCode::NumberingVoided,
            103 => StatusCode::BatchReceived,
            104 => StatusCode::BatchProcessed,
            105 => StatusCode::BatchInProcess,
            106 => StatusCode::BatchNotFound,
            107 => StatusCode::ServiceRunning,
            108 => StatusCode::ServicePaused,
            109 => StatusCode::ServiceStopped,
            124 => StatusCode::EpecAuthorized,
            128 => StatusCode::EventBatchProcessed,
            135 => StatusCode::EventRegistered,
            136 => StatusCode::EventRegisteredUnlinked,
            137 => StatusCode::NoDocumentFound,
            138 => StatusCode::DocumentFound,
            150 => StatusCode::AuthorizedLate,
            151 => StatusCode::CancellationApprovedLate,
            155 => StatusCode::EventCancellationLate,
            110 | 205 | 301 | 302 | 303 => StatusCode::Denied(code),
            215 | 225 | 402 | 404 => StatusCode::SchemaRejected(code),
            297 | 298 => StatusCode::SignatureRejected(code),
            280..=296 => StatusCode::CertificateRejected(code),
            200..=999 => StatusCode::Rejected(code),
            _ => StatusCode::Unknown(code),
        }
    }

    /// Interpreta o texto de `<cStat>`.
    pub fn parse(text: &str) -> Option<Self> {
        text.trim().parse::<u16>().ok().map(StatusCode::from_code)
    }

    pub fn code(self) -> u16 {
        match self {
            StatusCode::Authorized => 100,
            StatusCode::CancellationApproved => 101,
            StatusCode::NumberingVoided => 102,
            StatusCode::BatchReceived => 103,
            StatusCode::BatchProcessed => 104,
            StatusCode::BatchInProcess => 105,
            StatusCode::BatchNotFound => 106,
            StatusCode::ServiceRunning => 107,
            StatusCode::ServicePaused => 108,
            StatusCode::ServiceStopped => 109,
            StatusCode::EpecAuthorized => 124,
            StatusCode::EventBatchProcessed => 128,
            StatusCode::EventRegistered => 135,
            StatusCode::EventRegisteredUnlinked => 136,
            StatusCode::NoDocumentFound => 137,
            StatusCode::DocumentFound => 138,
            StatusCode::AuthorizedLate => 150,
            StatusCode::CancellationApprovedLate => 151,
            StatusCode::EventCancellationLate => 155,
            StatusCode::Denied(c)
            | StatusCode::SchemaRejected(c)
            | StatusCode::SignatureRejected(c)
            | StatusCode::CertificateRejected(c)
            | StatusCode::Rejected(c)
            | StatusCode::Unknown(c) => c,
        }
    }

    pub fn category(self) -> StatusCategory {
        match self {
            StatusCode::Authorized | StatusCode::AuthorizedLate => StatusCategory::Authorized,
            StatusCode::BatchReceived | StatusCode::BatchInProcess => StatusCategory::Awaiting,
            StatusCode::BatchProcessed | StatusCode::EventBatchProcessed => {
                StatusCategory::Processed
            }
            StatusCode::EventRegistered
            | StatusCode::EpecAuthorized
            | StatusCode::EventRegisteredUnlinked
            | StatusCode::EventCancellationLate => StatusCategory::EventRegistered,
            StatusCode::CancellationApproved
            | StatusCode::CancellationApprovedLate
            | StatusCode::NumberingVoided => StatusCategory::Cancelled,
            StatusCode::ServiceRunning => StatusCategory::ServiceAvailable,
            StatusCode::ServicePaused | StatusCode::ServiceStopped => {
                StatusCategory::ServiceUnavailable
            }
            StatusCode::DocumentFound => StatusCategory::Located,
            StatusCode::NoDocumentFound | StatusCode::BatchNotFound => StatusCategory::NotLocated,
            StatusCode::Denied(_) => StatusCategory::Denied,
            StatusCode::SchemaRejected(_) => StatusCategory::SchemaRejection,
            StatusCode::SignatureRejected(_) => StatusCategory::SignatureRejection,
            StatusCode::CertificateRejected(_) => StatusCategory::CertificateRejection,
            StatusCode::Rejected(_) => StatusCategory::BusinessRejection,
            StatusCode::Unknown(_) => StatusCategory::Unknown,
        }
    }

    pub fn is_awaiting_query(self) -> bool {
        self.category() == StatusCategory::Awaiting
    }

    pub fn is_authorized(self) -> bool {
        self.category() == StatusCategory::Authorized
    }

    pub fn is_denied(self) -> bool {
        self.category() == StatusCategory::Denied
    }

    pub fn is_event_registered(self) -> bool {
        self.category() == StatusCategory::EventRegistered
    }

    /// A NF-e está cancelada: 101, 151, ou 155 quando o cancelamento
    /// foi homologado por evento fora de prazo.
    pub fn is_cancellation(self) -> bool {
        matches!(
            self,
            StatusCode::CancellationApproved
                | StatusCode::CancellationApprovedLate
                | StatusCode::EventCancellationLate
        )
    }

    /// Rejeições causadas pela forma do XML (schema, assinatura,
    /// certificado), e não por regra de negócio.
    pub fn is_structural_rejection(self) -> bool {
        matches!(
            self.category(),
            StatusCategory::SchemaRejection
                | StatusCategory::SignatureRejection
                | StatusCategory::CertificateRejection
        )
    }
}

/// Verdadeiro para os códigos de lote aceito e ainda não processado.
pub fn is_awaiting_query(cstat: u16) -> bool {
    StatusCode::from_code(cstat).is_awaiting_query()
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode::from_code(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn awaiting_codes() {
        assert!(is_awaiting_query(103));
        assert!(is_awaiting_query(105));
        assert!(!is_awaiting_query(100));
        assert!(!is_awaiting_query(104));
        for rejection in [110, 204, 215, 225, 297, 539, 656, 999] {
            assert!(!is_awaiting_query(rejection), "{rejection}");
        }
    }

    #[test]
    fn rejection_families_are_distinguishable() {
        assert_eq!(StatusCode::from_code(215).category(), StatusCategory::SchemaRejection);
        assert_eq!(StatusCode::from_code(297).category(), StatusCategory::SignatureRejection);
        assert_eq!(StatusCode::from_code(284).category(), StatusCategory::CertificateRejection);
        assert_eq!(StatusCode::from_code(539).category(), StatusCategory::BusinessRejection);
        assert_eq!(StatusCode::from_code(302).category(), StatusCategory::Denied);
        assert!(StatusCode::from_code(225).is_structural_rejection());
        assert!(!StatusCode::from_code(204).is_structural_rejection());
    }

    #[test]
    fn cancellation_codes() {
        for code in [101, 151, 155] {
            assert!(StatusCode::from_code(code).is_cancellation(), "{code}");
        }
        assert!(!StatusCode::from_code(135).is_cancellation());
        assert!(!StatusCode::from_code(102).is_cancellation());
        assert!(StatusCode::from_code(155).is_event_registered());
    }

    #[test]
    fn epec_has_its_own_variant() {
        assert_eq!(StatusCode::from_code(124), StatusCode::EpecAuthorized);
        assert_eq!(StatusCode::EpecAuthorized.code(), 124);
        assert_eq!(StatusCode::EpecAuthorized.category(), StatusCategory::EventRegistered);
    }

    #[test]
    fn unknown_code_is_preserved() {
        let code = StatusCode::from_code(42);
        assert_eq!(code, StatusCode::Unknown(42));
        assert_eq!(code.code(), 42);
        assert_eq!(StatusCode::parse(" 100 "), Some(StatusCode::Authorized));
        assert_eq!(StatusCode::parse("abc"), None);
    }

    proptest! {
        #[test]
        fn code_survives_classification(code in 0u16..2000) {
            prop_assert_eq!(StatusCode::from_code(code).code(), code);
        }
    }
}
