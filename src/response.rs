// ── Response Parsing ────────────────────────────────────────────
use std::io::Read;

use base64::Engine;
use roxmltree::Node;
use serde::Serialize;

use crate::error::{NfeError, NfeResult};
use crate::model::{Environment, ServiceKind};
use crate::soap;
use crate::status::StatusCode;
use crate::xml;

/// Protocolo de uma NF-e (`protNFe/infProt`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolInfo {
    pub status: StatusCode,
    pub reason: String,
    pub access_key: Option<String>,
    pub protocol: Option<String>,
    pub received_at: Option<String>,
    pub digest_value: Option<String>,
    /// `<protNFe>` como veio da SEFAZ, para compor o `nfeProc`.
    #[serde(skip)]
    pub raw_xml: String,
}

/// `retEnviNFe` e `retConsReciNFe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResponse {
    pub status: StatusCode,
    pub reason: String,
    pub environment: Option<Environment>,
    pub received_at: Option<String>,
    pub receipt: Option<String>,
    /// Tempo médio de processamento informado pela SEFAZ (`tMed`), em segundos.
    pub average_time_secs: Option<u64>,
    pub protocols: Vec<ProtocolInfo>,
}

/// Registro de um evento (`retEvento/infEvento`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventOutcome {
    pub status: StatusCode,
    pub reason: String,
    pub access_key: Option<String>,
    pub event_type: Option<String>,
    pub sequence: Option<u8>,
    pub protocol: Option<String>,
    pub registered_at: Option<String>,
    #[serde(skip)]
    pub raw_xml: String,
}

/// `retEnvEvento`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventBatchResponse {
    pub status: StatusCode,
    pub reason: String,
    pub batch_id: Option<String>,
    pub events: Vec<EventOutcome>,
}

/// `retConsSitNFe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolQueryResponse {
    pub status: StatusCode,
    pub reason: String,
    pub access_key: Option<String>,
    pub protocol: Option<ProtocolInfo>,
    pub events: Vec<EventOutcome>,
}

/// `retConsStatServ`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatusResponse {
    pub status: StatusCode,
    pub reason: String,
    pub average_time_secs: Option<u64>,
    pub received_at: Option<String>,
    pub returns_at: Option<String>,
    pub observation: Option<String>,
}

/// Documento devolvido pela distribuição de DF-e, já descompactado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributedDocument {
    pub nsu: String,
    pub schema: String,
    pub xml: String,
}

/// `retDistDFeInt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionResponse {
    pub status: StatusCode,
    pub reason: String,
    pub last_nsu: Option<String>,
    pub max_nsu: Option<String>,
    pub documents: Vec<DistributedDocument>,
}

/// Resposta decodificada, uma variante por serviço.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum ServiceResponse {
    Authorization(BatchResponse),
    ReceiptQuery(BatchResponse),
    ProtocolQuery(ProtocolQueryResponse),
    ServiceStatus(ServiceStatusResponse),
    EventRegistration(EventBatchResponse),
    Distribution(DistributionResponse),
}

impl ServiceResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceResponse::Authorization(r) | ServiceResponse::ReceiptQuery(r) => r.status,
            ServiceResponse::ProtocolQuery(r) => r.status,
            ServiceResponse::ServiceStatus(r) => r.status,
            ServiceResponse::EventRegistration(r) => r.status,
            ServiceResponse::Distribution(r) => r.status,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            ServiceResponse::Authorization(r) | ServiceResponse::ReceiptQuery(r) => &r.reason,
            ServiceResponse::ProtocolQuery(r) => &r.reason,
            ServiceResponse::ServiceStatus(r) => &r.reason,
            ServiceResponse::EventRegistration(r) => &r.reason,
            ServiceResponse::Distribution(r) => &r.reason,
        }
    }
}

/// Decodifica o corpo SOAP conforme o formato de resposta do serviço.
///
/// Falha com [`NfeError::Parse`] quando o corpo não traz o elemento
/// esperado, e com [`NfeError::SoapFault`] quando traz um Fault.
pub fn extract_status(service: ServiceKind, body: &str) -> NfeResult<ServiceResponse> {
    let doc = roxmltree::Document::parse(body)
        .map_err(|e| NfeError::parse(format!("XML malformado: {e}")))?;
    let root = doc.root_element();
    let scope = xml::find(root, "Body").unwrap_or(root);

    if xml::child(scope, "Fault").is_some() {
        let reason = soap::fault_reason(body).unwrap_or_default();
        return Err(NfeError::SoapFault(reason));
    }

    let expected = service.response_root();
    let node = xml::find(scope, expected).ok_or_else(|| {
        let found = scope
            .descendants()
            .skip(1)
            .find(|n| n.is_element())
            .map(|n| n.tag_name().name().to_string())
            .unwrap_or_else(|| "corpo vazio".to_string());
        NfeError::parse(format!("esperado <{expected}>, encontrado <{found}>"))
    })?;

    let response = match service {
        ServiceKind::Authorization => ServiceResponse::Authorization(parse_batch(body, node)?),
        ServiceKind::ReceiptQuery => ServiceResponse::ReceiptQuery(parse_batch(body, node)?),
        ServiceKind::ProtocolQuery => ServiceResponse::ProtocolQuery(parse_protocol_query(body, node)?),
        ServiceKind::ServiceStatus => ServiceResponse::ServiceStatus(parse_service_status(node)?),
        ServiceKind::EventRegistration => {
            ServiceResponse::EventRegistration(parse_event_batch(body, node)?)
        }
        ServiceKind::Distribution => ServiceResponse::Distribution(parse_distribution(node)?),
    };

    tracing::debug!(
        service = %service,
        cstat = response.status().code(),
        motivo = response.reason(),
        "resposta decodificada"
    );
    Ok(response)
}

fn status_of(node: Node<'_, '_>) -> NfeResult<(StatusCode, String)> {
    let name = node.tag_name().name();
    let text = xml::child_text(node, "cStat")
        .ok_or_else(|| NfeError::parse(format!("<{name}> sem cStat")))?;
    let status = StatusCode::parse(&text)
        .ok_or_else(|| NfeError::parse(format!("cStat não numérico em <{name}>: {text}")))?;
    let reason = xml::child_text(node, "xMotivo").unwrap_or_default();
    Ok((status, reason))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_protocol(body: &str, prot: Node<'_, '_>) -> NfeResult<ProtocolInfo> {
    let inf = xml::child(prot, "infProt")
        .ok_or_else(|| NfeError::parse("<protNFe> sem <infProt>"))?;
    let (status, reason) = status_of(inf)?;
    Ok(ProtocolInfo {
        status,
        reason,
        access_key: non_empty(xml::child_text(inf, "chNFe")),
        protocol: non_empty(xml::child_text(inf, "nProt")),
        received_at: non_empty(xml::child_text(inf, "dhRecbto")),
        digest_value: non_empty(xml::child_text(inf, "digVal")),
        raw_xml: xml::raw(body, prot).to_string(),
    })
}

fn parse_batch(body: &str, node: Node<'_, '_>) -> NfeResult<BatchResponse> {
    let (status, reason) = status_of(node)?;
    let inf_rec = xml::child(node, "infRec");
    let receipt = inf_rec
        .and_then(|n| xml::child_text(n, "nRec"))
        .or_else(|| xml::child_text(node, "nRec"));
    let average_time_secs = inf_rec
        .and_then(|n| xml::child_text(n, "tMed"))
        .or_else(|| xml::child_text(node, "tMed"))
        .and_then(|t| t.parse().ok());
    let protocols = xml::find_all(node, "protNFe")
        .map(|p| parse_protocol(body, p))
        .collect::<NfeResult<Vec<_>>>()?;

    Ok(BatchResponse {
        status,
        reason,
        environment: xml::child_text(node, "tpAmb").and_then(|t| Environment::from_tp_amb(&t)),
        received_at: non_empty(xml::child_text(node, "dhRecbto")),
        receipt: non_empty(receipt),
        average_time_secs,
        protocols,
    })
}

fn parse_event(body: &str, ret: Node<'_, '_>) -> NfeResult<EventOutcome> {
    let inf = xml::child(ret, "infEvento")
        .ok_or_else(|| NfeError::parse("<retEvento> sem <infEvento>"))?;
    let (status, reason) = status_of(inf)?;
    Ok(EventOutcome {
        status,
        reason,
        access_key: non_empty(xml::child_text(inf, "chNFe")),
        event_type: non_empty(xml::child_text(inf, "tpEvento")),
        sequence: xml::child_text(inf, "nSeqEvento").and_then(|s| s.parse().ok()),
        protocol: non_empty(xml::child_text(inf, "nProt")),
        registered_at: non_empty(xml::child_text(inf, "dhRegEvento")),
        raw_xml: xml::raw(body, ret).to_string(),
    })
}

fn parse_event_batch(body: &str, node: Node<'_, '_>) -> NfeResult<EventBatchResponse> {
    let (status, reason) = status_of(node)?;
    let events = xml::find_all(node, "retEvento")
        .map(|e| parse_event(body, e))
        .collect::<NfeResult<Vec<_>>>()?;
    Ok(EventBatchResponse {
        status,
        reason,
        batch_id: non_empty(xml::child_text(node, "idLote")),
        events,
    })
}

fn parse_protocol_query(body: &str, node: Node<'_, '_>) -> NfeResult<ProtocolQueryResponse> {
    let (status, reason) = status_of(node)?;
    let protocol = xml::child(node, "protNFe")
        .map(|p| parse_protocol(body, p))
        .transpose()?;
    let events = xml::find_all(node, "retEvento")
        .map(|e| parse_event(body, e))
        .collect::<NfeResult<Vec<_>>>()?;
    Ok(ProtocolQueryResponse {
        status,
        reason,
        access_key: non_empty(xml::child_text(node, "chNFe")),
        protocol,
        events,
    })
}

fn parse_service_status(node: Node<'_, '_>) -> NfeResult<ServiceStatusResponse> {
    let (status, reason) = status_of(node)?;
    Ok(ServiceStatusResponse {
        status,
        reason,
        average_time_secs: xml::child_text(node, "tMed").and_then(|t| t.parse().ok()),
        received_at: non_empty(xml::child_text(node, "dhRecbto")),
        returns_at: non_empty(xml::child_text(node, "dhRetorno")),
        observation: non_empty(xml::child_text(node, "xObs")),
    })
}

fn parse_distribution(node: Node<'_, '_>) -> NfeResult<DistributionResponse> {
    let (status, reason) = status_of(node)?;
    let mut documents = Vec::new();
    for doc_zip in xml::find_all(node, "docZip") {
        let content: String = doc_zip
            .text()
            .unwrap_or_default()
            .split_whitespace()
            .collect();
        let compressed = base64::engine::general_purpose::STANDARD
            .decode(content)
            .map_err(|e| NfeError::parse(format!("Falha decode base64: {e}")))?;
        documents.push(DistributedDocument {
            nsu: doc_zip.attribute("NSU").unwrap_or_default().to_string(),
            schema: doc_zip.attribute("schema").unwrap_or_default().to_string(),
            xml: decompress_doc_zip(&compressed)?,
        });
    }
    Ok(DistributionResponse {
        status,
        reason,
        last_nsu: non_empty(xml::child_text(node, "ultNSU")),
        max_nsu: non_empty(xml::child_text(node, "maxNSU")),
        documents,
    })
}

fn decompress_doc_zip(data: &[u8]) -> NfeResult<String> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut result = String::new();
    match decoder.read_to_string(&mut result) {
        Ok(_) if !result.is_empty() => Ok(result),
        _ => Err(NfeError::parse("Falha ao descomprimir documento")),
    }
}

impl DistributionResponse {
    /// XML completo da NF-e (`procNFe`), quando presente; senão o primeiro
    /// documento recebido.
    pub fn preferred_document(&self) -> Option<&DistributedDocument> {
        self.documents
            .iter()
            .find(|d| d.schema.contains("procNFe"))
            .or_else(|| self.documents.first())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn envelope(inner: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?><soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><nfeResultMsg xmlns="http://www.portalfiscal.inf.br/nfe/wsdl/X">{inner}</nfeResultMsg></soap:Body></soap:Envelope>"#
        )
    }

    #[test]
    fn authorization_with_receipt() {
        let body = envelope(
            r#"<retEnviNFe versao="4.00" xmlns="http://www.portalfiscal.inf.br/nfe"><tpAmb>2</tpAmb><verAplic>SP_NFE_PL009_V4</verAplic><cStat>103</cStat><xMotivo>Lote recebido com sucesso</xMotivo><cUF>35</cUF><dhRecbto>2024-01-15T10:00:00-03:00</dhRecbto><infRec><nRec>123456789012345</nRec><tMed>1</tMed></infRec></retEnviNFe>"#,
        );
        let ServiceResponse::Authorization(r) = extract_status(ServiceKind::Authorization, &body).unwrap() else {
            panic!("variante errada");
        };
        assert_eq!(r.status, StatusCode::BatchReceived);
        assert_eq!(r.reason, "Lote recebido com sucesso");
        assert_eq!(r.receipt.as_deref(), Some("123456789012345"));
        assert_eq!(r.average_time_secs, Some(1));
        assert_eq!(r.environment, Some(Environment::Homologation));
        assert!(r.protocols.is_empty());
    }

    #[test]
    fn receipt_query_with_protocol() {
        let body = envelope(
            r#"<retConsReciNFe versao="4.00" xmlns="http://www.portalfiscal.inf.br/nfe"><tpAmb>2</tpAmb><nRec>123456789012345</nRec><cStat>104</cStat><xMotivo>Lote processado</xMotivo><protNFe versao="4.00"><infProt><tpAmb>2</tpAmb><chNFe>35240112345678000195550010000001231123456781</chNFe><dhRecbto>2024-01-15T10:00:05-03:00</dhRecbto><nProt>135250000001234</nProt><digVal>abc=</digVal><cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo></infProt></protNFe></retConsReciNFe>"#,
        );
        let ServiceResponse::ReceiptQuery(r) = extract_status(ServiceKind::ReceiptQuery, &body).unwrap() else {
            panic!("variante errada");
        };
        assert_eq!(r.status, StatusCode::BatchProcessed);
        assert_eq!(r.protocols.len(), 1);
        let p = &r.protocols[0];
        assert_eq!(p.status, StatusCode::Authorized);
        assert_eq!(p.protocol.as_deref(), Some("135250000001234"));
        assert_eq!(p.digest_value.as_deref(), Some("abc="));
        assert!(p.raw_xml.starts_with("<protNFe"));
        assert!(p.raw_xml.ends_with("</protNFe>"));
    }

    #[test]
    fn service_status() {
        let body = envelope(
            r#"<retConsStatServ versao="4.00" xmlns="http://www.portalfiscal.inf.br/nfe"><tpAmb>1</tpAmb><cStat>107</cStat><xMotivo>Servico em Operacao</xMotivo><cUF>35</cUF><dhRecbto>2024-01-15T10:00:00-03:00</dhRecbto><tMed>1</tMed></retConsStatServ>"#,
        );
        let r = extract_status(ServiceKind::ServiceStatus, &body).unwrap();
        assert_eq!(r.status(), StatusCode::ServiceRunning);
        assert_eq!(r.reason(), "Servico em Operacao");
    }

    #[test]
    fn event_batch() {
        let body = envelope(
            r#"<retEnvEvento versao="1.00" xmlns="http://www.portalfiscal.inf.br/nfe"><idLote>1</idLote><tpAmb>2</tpAmb><cOrgao>35</cOrgao><cStat>128</cStat><xMotivo>Lote de Evento Processado</xMotivo><retEvento versao="1.00"><infEvento><tpAmb>2</tpAmb><cOrgao>35</cOrgao><cStat>135</cStat><xMotivo>Evento registrado e vinculado a NF-e</xMotivo><chNFe>35240112345678000195550010000001231123456781</chNFe><tpEvento>110110</tpEvento><nSeqEvento>2</nSeqEvento><dhRegEvento>2024-01-16T09:00:00-03:00</dhRegEvento><nProt>135250000009999</nProt></infEvento></retEvento></retEnvEvento>"#,
        );
        let ServiceResponse::EventRegistration(r) =
            extract_status(ServiceKind::EventRegistration, &body).unwrap()
        else {
            panic!("variante errada");
        };
        assert_eq!(r.status, StatusCode::EventBatchProcessed);
        assert_eq!(r.batch_id.as_deref(), Some("1"));
        let e = &r.events[0];
        assert_eq!(e.status, StatusCode::EventRegistered);
        assert_eq!(e.sequence, Some(2));
        assert_eq!(e.event_type.as_deref(), Some("110110"));
        assert_eq!(e.protocol.as_deref(), Some("135250000009999"));
    }

    #[test]
    fn protocol_query() {
        let body = envelope(
            r#"<retConsSitNFe versao="4.00" xmlns="http://www.portalfiscal.inf.br/nfe"><tpAmb>2</tpAmb><cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo><cUF>35</cUF><chNFe>35240112345678000195550010000001231123456781</chNFe><protNFe versao="4.00"><infProt><chNFe>35240112345678000195550010000001231123456781</chNFe><nProt>135250000001234</nProt><cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo></infProt></protNFe></retConsSitNFe>"#,
        );
        let ServiceResponse::ProtocolQuery(r) = extract_status(ServiceKind::ProtocolQuery, &body).unwrap() else {
            panic!("variante errada");
        };
        assert_eq!(r.status, StatusCode::Authorized);
        assert_eq!(r.protocol.unwrap().protocol.as_deref(), Some("135250000001234"));
        assert!(r.events.is_empty());
    }

    #[test]
    fn distribution_decodes_doc_zip() {
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(b"<nfeProc><NFe/></nfeProc>").unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(gz.finish().unwrap());
        let body = envelope(&format!(
            r#"<retDistDFeInt versao="1.01" xmlns="http://www.portalfiscal.inf.br/nfe"><tpAmb>1</tpAmb><cStat>138</cStat><xMotivo>Documento localizado</xMotivo><ultNSU>000000000000010</ultNSU><maxNSU>000000000000010</maxNSU><loteDistDFeInt><docZip NSU="000000000000009" schema="resNFe_v1.01.xsd">{encoded}</docZip><docZip NSU="000000000000010" schema="procNFe_v4.00.xsd">{encoded}</docZip></loteDistDFeInt></retDistDFeInt>"#
        ));
        let ServiceResponse::Distribution(r) = extract_status(ServiceKind::Distribution, &body).unwrap() else {
            panic!("variante errada");
        };
        assert_eq!(r.status, StatusCode::DocumentFound);
        assert_eq!(r.documents.len(), 2);
        let preferred = r.preferred_document().unwrap();
        assert_eq!(preferred.nsu, "000000000000010");
        assert_eq!(preferred.xml, "<nfeProc><NFe/></nfeProc>");
    }

    #[test]
    fn wrong_shape_is_parse_fault() {
        let body = envelope(r#"<retConsStatServ><cStat>107</cStat></retConsStatServ>"#);
        let err = extract_status(ServiceKind::Authorization, &body).unwrap_err();
        assert!(matches!(err, NfeError::Parse(_)), "{err}");

        let err = extract_status(ServiceKind::Authorization, "<html>502 Bad Gateway").unwrap_err();
        assert!(matches!(err, NfeError::Parse(_)));

        let body = envelope(r#"<retEnviNFe><cStat>abc</cStat></retEnviNFe>"#);
        assert!(matches!(
            extract_status(ServiceKind::Authorization, &body),
            Err(NfeError::Parse(_))
        ));
    }

    #[test]
    fn fault_in_success_body() {
        let body = r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><soap:Fault><soap:Reason><soap:Text>Falha</soap:Text></soap:Reason></soap:Fault></soap:Body></soap:Envelope>"#;
        assert!(matches!(
            extract_status(ServiceKind::ServiceStatus, body),
            Err(NfeError::SoapFault(_))
        ));
    }
}
