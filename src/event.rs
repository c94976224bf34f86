// ── Events (cancelamento e carta de correção) ──────────────────
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::access_key::AccessKey;
use crate::error::{NfeError, NfeResult};
use crate::model::{EventKind, Environment};
use crate::signature::{sign_xml, Certificate, SignatureAlgorithm};
use crate::xml::{self, push_tag, NFE_NAMESPACE};

pub const EVENT_VERSION: &str = "1.00";
pub const MAX_EVENTS_PER_BATCH: usize = 20;

/// Condição de uso da CC-e; texto fixo exigido pelo leiaute.
pub const CORRECTION_TERMS: &str = "A Carta de Correcao e disciplinada pelo paragrafo 1o-A do art. 7o do Convenio S/N, de 15 de dezembro de 1970 e pode ser utilizada para regularizacao de erro ocorrido na emissao de documento fiscal, desde que o erro nao esteja relacionado com: I - as variaveis que determinam o valor do imposto tais como: base de calculo, aliquota, diferenca de preco, quantidade, valor da operacao ou da prestacao; II - a correcao de dados cadastrais que implique mudanca do remetente ou do destinatario; III - a data de emissao ou de saida.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tipo", rename_all = "snake_case")]
pub enum EventDetail {
    Cancellation { protocol: String, justification: String },
    CorrectionLetter { correction: String },
}

impl EventDetail {
    pub fn kind(&self) -> EventKind {
        match self {
            EventDetail::Cancellation { .. } => EventKind::Cancellation,
            EventDetail::CorrectionLetter { .. } => EventKind::CorrectionLetter,
        }
    }
}

/// Um evento vinculado a uma NF-e autorizada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRequest {
    pub access_key: AccessKey,
    /// CNPJ ou CPF do autor do evento (o emitente).
    pub author_document: String,
    pub environment: Environment,
    pub sequence: u8,
    pub occurred_at: DateTime<FixedOffset>,
    pub detail: EventDetail,
}

impl EventRequest {
    pub fn cancellation(
        access_key: AccessKey,
        author_document: impl Into<String>,
        environment: Environment,
        protocol: impl Into<String>,
        justification: impl Into<String>,
        occurred_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            access_key,
            author_document: author_document.into(),
            environment,
            sequence: 1,
            occurred_at,
            detail: EventDetail::Cancellation {
                protocol: protocol.into(),
                justification: justification.into(),
            },
        }
    }

    pub fn correction_letter(
        access_key: AccessKey,
        author_document: impl Into<String>,
        environment: Environment,
        sequence: u8,
        correction: impl Into<String>,
        occurred_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            access_key,
            author_document: author_document.into(),
            environment,
            sequence,
            occurred_at,
            detail: EventDetail::CorrectionLetter {
                correction: correction.into(),
            },
        }
    }

    pub fn kind(&self) -> EventKind {
        self.detail.kind()
    }

    /// `ID` + tpEvento + chave + sequência com dois dígitos.
    pub fn event_id(&self) -> String {
        format!("ID{}{}{:02}", self.kind().code(), self.access_key, self.sequence)
    }

    fn author_digits(&self) -> String {
        self.author_document
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect()
    }

    /// Verifica sequência, textos e protocolo antes de montar o XML.
    pub fn validate(&self) -> NfeResult<()> {
        check_sequence(self.kind(), self.sequence)?;
        let author = self.author_digits();
        if author.len() != 14 && author.len() != 11 {
            return Err(NfeError::precondition("autor do evento deve ser CNPJ ou CPF"));
        }
        match &self.detail {
            EventDetail::Cancellation {
                protocol,
                justification,
            } => {
                if protocol.len() != 15 || !protocol.chars().all(|c| c.is_ascii_digit()) {
                    return Err(NfeError::precondition(format!(
                        "protocolo de autorização inválido: {protocol:?}"
                    )));
                }
                check_length("xJust", justification, 15, 255)
            }
            EventDetail::CorrectionLetter { correction } => {
                check_length("xCorrecao", correction, 15, 1000)
            }
        }
    }

    /// `<evento>` sem assinatura.
    pub fn to_xml(&self) -> NfeResult<String> {
        self.validate()?;
        let kind = self.kind();
        let author = self.author_digits();

        let mut out = format!(
            "<evento xmlns=\"{NFE_NAMESPACE}\" versao=\"{EVENT_VERSION}\"><infEvento Id=\"{}\">",
            self.event_id()
        );
        push_tag(&mut out, "cOrgao", &self.access_key.uf().code().to_string());
        push_tag(&mut out, "tpAmb", &self.environment.tp_amb().to_string());
        push_tag(&mut out, if author.len() == 11 { "CPF" } else { "CNPJ" }, &author);
        push_tag(&mut out, "chNFe", self.access_key.as_str());
        push_tag(
            &mut out,
            "dhEvento",
            &self.occurred_at.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
        );
        push_tag(&mut out, "tpEvento", kind.code());
        push_tag(&mut out, "nSeqEvento", &self.sequence.to_string());
        push_tag(&mut out, "verEvento", EVENT_VERSION);
        out.push_str(&format!("<detEvento versao=\"{EVENT_VERSION}\">"));
        push_tag(&mut out, "descEvento", kind.description());
        match &self.detail {
            EventDetail::Cancellation {
                protocol,
                justification,
            } => {
                push_tag(&mut out, "nProt", protocol);
                push_tag(&mut out, "xJust", justification.trim());
            }
            EventDetail::CorrectionLetter { correction } => {
                push_tag(&mut out, "xCorrecao", correction.trim());
                push_tag(&mut out, "xCondUso", CORRECTION_TERMS);
            }
        }
        out.push_str("</detEvento></infEvento></evento>");
        Ok(out)
    }

    /// `<evento>` assinado sobre `infEvento`.
    pub fn sign(&self, certificate: &Certificate, algorithm: SignatureAlgorithm) -> NfeResult<String> {
        sign_xml(&self.to_xml()?, "infEvento", certificate, algorithm)
    }
}

/// Faixa de `nSeqEvento` aceita para o tipo de evento.
pub fn check_sequence(kind: EventKind, sequence: u8) -> NfeResult<()> {
    let range = kind.sequence_range();
    if range.contains(&sequence) {
        Ok(())
    } else {
        Err(NfeError::precondition(format!(
            "nSeqEvento {sequence} fora da faixa {}..={} para {}",
            range.start(),
            range.end(),
            kind.description()
        )))
    }
}

fn check_length(field: &str, value: &str, min: usize, max: usize) -> NfeResult<()> {
    let len = value.trim().chars().count();
    if (min..=max).contains(&len) {
        Ok(())
    } else {
        Err(NfeError::precondition(format!(
            "{field} deve ter de {min} a {max} caracteres (tem {len})"
        )))
    }
}

/// Dados estruturais lidos de um `<evento>` já montado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub kind: Option<EventKind>,
    pub access_key: String,
    pub sequence: Option<u8>,
}

/// Lê tipo, chave e sequência de cada `infEvento` do XML, seja um
/// `<evento>` isolado ou um `<envEvento>`.
pub fn read_event_headers(event_xml: &str) -> NfeResult<Vec<EventHeader>> {
    let doc = xml::parse(xml::strip_declaration(event_xml))?;
    let headers: Vec<EventHeader> = xml::find_all(doc.root_element(), "infEvento")
        .map(|inf| EventHeader {
            kind: xml::child_text(inf, "tpEvento").and_then(|c| EventKind::from_code(&c)),
            access_key: xml::child_text(inf, "chNFe").unwrap_or_default(),
            sequence: xml::child_text(inf, "nSeqEvento").and_then(|s| s.parse().ok()),
        })
        .collect();
    if headers.is_empty() {
        return Err(NfeError::Xml("<infEvento> não encontrado".into()));
    }
    Ok(headers)
}

/// Monta o `<envEvento>` com eventos assinados.
pub fn build_event_batch(batch_id: &str, signed_events: &[&str]) -> NfeResult<String> {
    if batch_id.is_empty() || batch_id.len() > 15 || !batch_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(NfeError::precondition("idLote deve ter de 1 a 15 dígitos"));
    }
    if signed_events.is_empty() || signed_events.len() > MAX_EVENTS_PER_BATCH {
        return Err(NfeError::precondition(format!(
            "lote de eventos deve conter de 1 a {MAX_EVENTS_PER_BATCH} eventos"
        )));
    }
    let mut out = format!(
        "<envEvento xmlns=\"{NFE_NAMESPACE}\" versao=\"{EVENT_VERSION}\"><idLote>{batch_id}</idLote>"
    );
    for event in signed_events {
        let event = xml::strip_declaration(event);
        if !event.starts_with("<evento") {
            return Err(NfeError::precondition("item do lote não é um <evento>"));
        }
        out.push_str(event);
    }
    out.push_str("</envEvento>");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{tests::test_certificate, verify_xml};

    const KEY: &str = "35240112345678000195550010000001231123456781";

    fn when() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-01-16T09:00:00-03:00").unwrap()
    }

    fn cce(sequence: u8) -> EventRequest {
        EventRequest::correction_letter(
            AccessKey::parse(KEY).unwrap(),
            "12345678000195",
            Environment::Homologation,
            sequence,
            "Corrigir o endereco de entrega para Rua B, 200",
            when(),
        )
    }

    #[test]
    fn event_id_layout() {
        assert_eq!(cce(2).event_id(), format!("ID110110{KEY}02"));
        assert_eq!(cce(2).event_id().len(), 54);
    }

    #[test]
    fn correction_sequence_bounds() {
        assert!(cce(0).validate().is_err());
        assert!(cce(21).validate().is_err());
        assert!(cce(1).validate().is_ok());
        assert!(cce(20).validate().is_ok());
    }

    #[test]
    fn cancellation_requires_justification_and_protocol() {
        let key = AccessKey::parse(KEY).unwrap();
        let short = EventRequest::cancellation(
            key.clone(),
            "12345678000195",
            Environment::Homologation,
            "135250000001234",
            "curta",
            when(),
        );
        assert!(matches!(short.validate(), Err(NfeError::Precondition(_))));

        let bad_protocol = EventRequest::cancellation(
            key.clone(),
            "12345678000195",
            Environment::Homologation,
            "123",
            "Erro na emissao da nota fiscal",
            when(),
        );
        assert!(bad_protocol.validate().is_err());

        let ok = EventRequest::cancellation(
            key,
            "12345678000195",
            Environment::Homologation,
            "135250000001234",
            "Erro na emissao da nota fiscal",
            when(),
        );
        let xml_text = ok.to_xml().unwrap();
        assert!(xml_text.contains("<descEvento>Cancelamento</descEvento>"));
        assert!(xml_text.contains("<nProt>135250000001234</nProt>"));
        assert!(xml_text.contains("<cOrgao>35</cOrgao>"));
    }

    #[test]
    fn signed_correction_letter_in_batch() {
        let cert = test_certificate();
        let signed = cce(3).sign(&cert, SignatureAlgorithm::Sha1).unwrap();
        let check = verify_xml(&signed).unwrap();
        assert!(check.is_valid());
        assert_eq!(check.reference_id, format!("ID110110{KEY}03"));

        let headers = read_event_headers(&signed).unwrap();
        assert_eq!(headers.len(), 1);
        let header = &headers[0];
        assert_eq!(header.kind, Some(EventKind::CorrectionLetter));
        assert_eq!(header.access_key, KEY);
        assert_eq!(header.sequence, Some(3));

        let batch = build_event_batch("42", &[&signed]).unwrap();
        assert!(batch.starts_with("<envEvento"));
        assert!(batch.contains("<xCondUso>A Carta de Correcao"));
        xml::parse(&batch).unwrap();

        assert!(build_event_batch("42", &[]).is_err());
        let many = vec![signed.as_str(); 21];
        assert!(build_event_batch("42", &many).is_err());
    }
}
