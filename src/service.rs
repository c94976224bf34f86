// ── NF-e Service Orchestrator ───────────────────────────────────
//! Operações de negócio da SEFAZ sobre o transporte SOAP e o registro
//! de webservices.
//!
//! Rejeições e lotes em processamento voltam como valores normais
//! ([`SubmissionResult`], [`EventResult`]); apenas falhas de transporte,
//! de contrato e pré-condições locais viram [`NfeError`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::Instrument;

use crate::access_key::AccessKey;
use crate::cancel::{run_cancellable, CancelToken};
use crate::config::ClientConfig;
use crate::error::{ErrorCategory, NfeError, NfeResult};
use crate::event::{build_event_batch, check_sequence, read_event_headers, MAX_EVENTS_PER_BATCH};
use crate::lifecycle::DocumentState;
use crate::model::{Environment, EventKind, Route, ServiceKind, Uf};
use crate::nfe::build_batch;
use crate::registry;
use crate::response::{
    extract_status, BatchResponse, DistributionResponse, EventBatchResponse, EventOutcome,
    ProtocolInfo, ServiceResponse,
};
use crate::scheduler::{poll_until_final, PollOutcome, ReceiptPoller};
use crate::signature::Certificate;
use crate::soap::{HttpTransport, SoapRequest, SoapTransport};
use crate::status::{StatusCategory, StatusCode};
use crate::xml::{self, push_tag, NFE_NAMESPACE};

/// Resultado de um envio de lote ou de uma consulta de recibo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionResult {
    Authorized {
        protocol: String,
        code: StatusCode,
        reason: String,
        access_key: Option<String>,
        received_at: Option<String>,
        /// `<protNFe>` original, para [`crate::nfe::attach_protocol`].
        #[serde(skip)]
        detail: Option<ProtocolInfo>,
    },
    Pending {
        receipt: String,
        code: StatusCode,
        reason: String,
        average_time_secs: Option<u64>,
    },
    Rejected {
        code: StatusCode,
        reason: String,
        category: StatusCategory,
        access_key: Option<String>,
    },
    Denied {
        code: StatusCode,
        reason: String,
        access_key: Option<String>,
        protocol: Option<String>,
    },
    /// Lote com mais de uma NF-e: um resultado por `protNFe`, na ordem
    /// devolvida pela SEFAZ.
    Batch {
        code: StatusCode,
        reason: String,
        documents: Vec<SubmissionResult>,
    },
}

impl SubmissionResult {
    pub fn code(&self) -> StatusCode {
        match self {
            SubmissionResult::Authorized { code, .. }
            | SubmissionResult::Pending { code, .. }
            | SubmissionResult::Rejected { code, .. }
            | SubmissionResult::Denied { code, .. }
            | SubmissionResult::Batch { code, .. } => *code,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            SubmissionResult::Authorized { reason, .. }
            | SubmissionResult::Pending { reason, .. }
            | SubmissionResult::Rejected { reason, .. }
            | SubmissionResult::Denied { reason, .. }
            | SubmissionResult::Batch { reason, .. } => reason,
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, SubmissionResult::Authorized { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, SubmissionResult::Pending { .. })
    }

    pub fn protocol(&self) -> Option<&str> {
        match self {
            SubmissionResult::Authorized { protocol, .. } => Some(protocol),
            SubmissionResult::Denied { protocol, .. } => protocol.as_deref(),
            _ => None,
        }
    }

    pub fn receipt(&self) -> Option<&str> {
        match self {
            SubmissionResult::Pending { receipt, .. } => Some(receipt),
            _ => None,
        }
    }

    /// Resultados por documento. Fora de [`SubmissionResult::Batch`], o
    /// próprio resultado.
    pub fn documents(&self) -> &[SubmissionResult] {
        match self {
            SubmissionResult::Batch { documents, .. } => documents,
            single => std::slice::from_ref(single),
        }
    }

    /// Resultado da NF-e de chave `access_key` dentro do lote.
    pub fn for_key(&self, access_key: &str) -> Option<&SubmissionResult> {
        self.documents().iter().find(|doc| doc.access_key() == Some(access_key))
    }

    pub fn access_key(&self) -> Option<&str> {
        match self {
            SubmissionResult::Authorized { access_key, .. }
            | SubmissionResult::Rejected { access_key, .. }
            | SubmissionResult::Denied { access_key, .. } => access_key.as_deref(),
            _ => None,
        }
    }

    /// Protocolo completo da autorização, quando houver.
    pub fn protocol_info(&self) -> Option<&ProtocolInfo> {
        match self {
            SubmissionResult::Authorized { detail, .. } => detail.as_ref(),
            _ => None,
        }
    }
}

/// Situação atual de uma NF-e consultada pela chave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentStatus {
    pub access_key: String,
    pub code: StatusCode,
    pub reason: String,
    /// `None` quando a SEFAZ não reconhece a chave ou rejeita a consulta.
    pub state: Option<DocumentState>,
    pub protocol: Option<ProtocolInfo>,
    pub events: Vec<EventOutcome>,
}

/// Disponibilidade do autorizador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceAvailability {
    pub available: bool,
    pub code: StatusCode,
    pub reason: String,
    pub average_time_secs: Option<u64>,
    pub returns_at: Option<String>,
    pub observation: Option<String>,
}

/// Resultado do registro de um evento.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventResult {
    Registered {
        code: StatusCode,
        reason: String,
        protocol: Option<String>,
        sequence: Option<u8>,
        registered_at: Option<String>,
    },
    Rejected {
        code: StatusCode,
        reason: String,
        category: StatusCategory,
    },
}

impl EventResult {
    pub fn code(&self) -> StatusCode {
        match self {
            EventResult::Registered { code, .. } | EventResult::Rejected { code, .. } => *code,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, EventResult::Registered { .. })
    }

    pub fn protocol(&self) -> Option<&str> {
        match self {
            EventResult::Registered { protocol, .. } => protocol.as_deref(),
            EventResult::Rejected { .. } => None,
        }
    }
}

/// Cliente das operações de NF-e de um emitente.
///
/// O serviço retém o [`Certificate`] (inclusive a chave privada) enquanto
/// existir, compartilhado entre chamadas concorrentes. Cada requisição
/// monta sua própria identidade e sessão TLS no transporte, descartadas
/// ao fim da chamada. Para limitar a retenção da chave a uma operação,
/// crie o serviço para ela e descarte-o em seguida.
pub struct NfeService<T = HttpTransport> {
    transport: T,
    certificate: Arc<Certificate>,
    config: ClientConfig,
}

impl NfeService<HttpTransport> {
    pub fn new(config: ClientConfig, certificate: Certificate) -> NfeResult<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(transport, certificate, config))
    }
}

impl<T: SoapTransport> NfeService<T> {
    pub fn with_transport(transport: T, certificate: Certificate, config: ClientConfig) -> Self {
        Self {
            transport,
            certificate: Arc::new(certificate),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn call(
        &self,
        service: ServiceKind,
        uf: Uf,
        environment: Environment,
        route: Route,
        body_xml: &str,
        cancel: Option<&CancelToken>,
    ) -> NfeResult<ServiceResponse> {
        let descriptor = registry::resolve_route(uf, environment, service, route);
        let request = SoapRequest::new(descriptor, uf, body_xml);
        let span = tracing::info_span!(
            "sefaz",
            service = %service,
            uf = %uf,
            env = %environment,
            authorizer = ?descriptor.authorizer,
        );

        async {
            let raw = run_cancellable(cancel, self.transport.send(&request, &self.certificate)).await?;
            let response = extract_status(service, &raw.body).map_err(|err| {
                tracing::warn!(error = %err, "resposta não reconhecida");
                err
            })?;
            Ok::<_, NfeError>(response)
        }
        .instrument(span)
        .await
    }

    // ── Autorização ─────────────────────────────────────────────

    /// Envia um lote `<enviNFe>` (ou uma `<NFe>` assinada, que é embrulhada
    /// em um lote assíncrono) ao autorizador.
    pub async fn submit_for_authorization(
        &self,
        signed_xml: &str,
        uf: Uf,
        environment: Environment,
        route: Route,
        cancel: Option<&CancelToken>,
    ) -> NfeResult<SubmissionResult> {
        let batch = prepare_batch(signed_xml)?;
        check_batch(&batch, uf, environment, route)?;

        let response = self
            .call(ServiceKind::Authorization, uf, environment, route, &batch, cancel)
            .await?;
        let ServiceResponse::Authorization(batch_response) = response else {
            return Err(NfeError::parse("resposta de autorização inesperada"));
        };
        interpret_batch(batch_response, None)
    }

    /// Uma única consulta ao recibo do lote.
    pub async fn poll_receipt(
        &self,
        receipt: &str,
        uf: Uf,
        environment: Environment,
        route: Route,
        cancel: Option<&CancelToken>,
    ) -> NfeResult<SubmissionResult> {
        let receipt = receipt.trim();
        if receipt.len() != 15 || !receipt.chars().all(|c| c.is_ascii_digit()) {
            return Err(NfeError::precondition(format!(
                "recibo deve ter 15 dígitos: {receipt:?}"
            )));
        }
        let mut body = format!("<consReciNFe xmlns=\"{NFE_NAMESPACE}\" versao=\"4.00\">");
        push_tag(&mut body, "tpAmb", &environment.tp_amb().to_string());
        push_tag(&mut body, "nRec", receipt);
        body.push_str("</consReciNFe>");

        let response = self
            .call(ServiceKind::ReceiptQuery, uf, environment, route, &body, cancel)
            .await?;
        let ServiceResponse::ReceiptQuery(batch_response) = response else {
            return Err(NfeError::parse("resposta de consulta de recibo inesperada"));
        };
        interpret_batch(batch_response, Some(receipt))
    }

    /// Consulta o recibo repetidamente conforme `config.poll`.
    pub async fn poll_until_final(
        &self,
        receipt: &str,
        uf: Uf,
        environment: Environment,
        route: Route,
        average_time_secs: Option<u64>,
        cancel: Option<&CancelToken>,
    ) -> NfeResult<PollOutcome> {
        poll_until_final(
            self,
            receipt,
            uf,
            environment,
            route,
            &self.config.poll,
            average_time_secs,
            cancel,
        )
        .await
    }

    // ── Consultas ───────────────────────────────────────────────

    /// Situação da NF-e pela chave de acesso. Idempotente.
    pub async fn query_protocol(
        &self,
        access_key: &str,
        uf: Uf,
        environment: Environment,
        route: Route,
        cancel: Option<&CancelToken>,
    ) -> NfeResult<DocumentStatus> {
        let key = AccessKey::parse(access_key.trim())?;
        let mut body = format!("<consSitNFe xmlns=\"{NFE_NAMESPACE}\" versao=\"4.00\">");
        push_tag(&mut body, "tpAmb", &environment.tp_amb().to_string());
        push_tag(&mut body, "xServ", "CONSULTAR");
        push_tag(&mut body, "chNFe", key.as_str());
        body.push_str("</consSitNFe>");

        let response = self
            .call(ServiceKind::ProtocolQuery, uf, environment, route, &body, cancel)
            .await?;
        let ServiceResponse::ProtocolQuery(r) = response else {
            return Err(NfeError::parse("resposta de consulta de protocolo inesperada"));
        };

        let amended = r.events.iter().any(|e| {
            e.status.is_event_registered()
                && e.event_type.as_deref() == Some(EventKind::CorrectionLetter.code())
        });
        let state = match r.status.category() {
            _ if r.status.is_cancellation() => Some(DocumentState::Cancelled),
            StatusCategory::Authorized if amended => Some(DocumentState::Amended),
            StatusCategory::Authorized => Some(DocumentState::Authorized),
            StatusCategory::Cancelled => Some(DocumentState::Cancelled),
            StatusCategory::Denied => Some(DocumentState::Denied),
            _ => None,
        };
        Ok(DocumentStatus {
            access_key: r.access_key.unwrap_or_else(|| key.to_string()),
            code: r.status,
            reason: r.reason,
            state,
            protocol: r.protocol,
            events: r.events,
        })
    }

    /// Status do serviço de autorização na rota indicada.
    pub async fn query_service_status(
        &self,
        uf: Uf,
        environment: Environment,
        route: Route,
        cancel: Option<&CancelToken>,
    ) -> NfeResult<ServiceAvailability> {
        let mut body = format!("<consStatServ xmlns=\"{NFE_NAMESPACE}\" versao=\"4.00\">");
        push_tag(&mut body, "tpAmb", &environment.tp_amb().to_string());
        push_tag(&mut body, "cUF", &uf.code().to_string());
        push_tag(&mut body, "xServ", "STATUS");
        body.push_str("</consStatServ>");

        let response = self
            .call(ServiceKind::ServiceStatus, uf, environment, route, &body, cancel)
            .await?;
        let ServiceResponse::ServiceStatus(r) = response else {
            return Err(NfeError::parse("resposta de status do serviço inesperada"));
        };
        Ok(ServiceAvailability {
            available: r.status == StatusCode::ServiceRunning,
            code: r.status,
            reason: r.reason,
            average_time_secs: r.average_time_secs,
            returns_at: r.returns_at,
            observation: r.observation,
        })
    }

    /// Escolhe a rota de emissão: o autorizador normal quando em operação,
    /// a SVC quando ele está paralisado (108/109) ou inacessível.
    pub async fn select_route(
        &self,
        uf: Uf,
        environment: Environment,
        cancel: Option<&CancelToken>,
    ) -> NfeResult<Route> {
        match self
            .query_service_status(uf, environment, Route::Primary, cancel)
            .await
        {
            Ok(status) if status.available => Ok(Route::Primary),
            Ok(status) if status.code.category() == StatusCategory::ServiceUnavailable => {
                tracing::warn!(uf = %uf, c_stat = status.code.code(), motivo = %status.reason, "autorizador paralisado; usando SVC");
                Ok(Route::Contingency)
            }
            Ok(status) => {
                tracing::warn!(uf = %uf, c_stat = status.code.code(), motivo = %status.reason, "status inesperado; mantendo rota normal");
                Ok(Route::Primary)
            }
            Err(NfeError::Cancelled) => Err(NfeError::Cancelled),
            Err(err) if err.category() == ErrorCategory::Transport || err.is_retryable() => {
                tracing::warn!(uf = %uf, error = %err, "autorizador inacessível; usando SVC");
                Ok(Route::Contingency)
            }
            Err(err) => Err(err),
        }
    }

    // ── Eventos ─────────────────────────────────────────────────

    /// Registra um `<evento>` assinado (cancelamento ou CC-e).
    ///
    /// Chave, tipo e `nSeqEvento` são conferidos antes de qualquer
    /// chamada de rede.
    pub async fn register_event(
        &self,
        signed_event_xml: &str,
        kind: EventKind,
        uf: Uf,
        environment: Environment,
        route: Route,
        cancel: Option<&CancelToken>,
    ) -> NfeResult<EventResult> {
        let mut results = self
            .register_events(signed_event_xml, kind, uf, environment, route, cancel)
            .await?;
        if results.len() != 1 {
            return Err(NfeError::parse(format!(
                "esperado um retorno de evento, recebidos {}",
                results.len()
            )));
        }
        Ok(results.remove(0))
    }

    /// Registra um ou mais eventos do mesmo tipo (`<evento>` ou `<envEvento>`).
    pub async fn register_events(
        &self,
        signed_events_xml: &str,
        kind: EventKind,
        uf: Uf,
        environment: Environment,
        route: Route,
        cancel: Option<&CancelToken>,
    ) -> NfeResult<Vec<EventResult>> {
        let headers = read_event_headers(signed_events_xml)?;
        if headers.len() > MAX_EVENTS_PER_BATCH {
            return Err(NfeError::precondition(format!(
                "lote com {} eventos; o limite é {MAX_EVENTS_PER_BATCH}",
                headers.len()
            )));
        }
        for header in &headers {
            if header.access_key.trim().is_empty() {
                return Err(NfeError::precondition("evento sem chave de acesso"));
            }
            AccessKey::parse(header.access_key.trim())?;
            if header.kind != Some(kind) {
                return Err(NfeError::precondition(format!(
                    "evento não é do tipo {}",
                    kind.description()
                )));
            }
            let sequence = header
                .sequence
                .ok_or_else(|| NfeError::precondition("evento sem nSeqEvento"))?;
            check_sequence(kind, sequence)?;
        }

        let stripped = xml::strip_declaration(signed_events_xml);
        let batch = if stripped.starts_with("<envEvento") {
            stripped.to_string()
        } else {
            build_event_batch(&batch_id(), &[stripped])?
        };
        if !batch.contains("<Signature") {
            return Err(NfeError::precondition("evento sem assinatura digital"));
        }

        let response = self
            .call(ServiceKind::EventRegistration, uf, environment, route, &batch, cancel)
            .await?;
        let ServiceResponse::EventRegistration(r) = response else {
            return Err(NfeError::parse("resposta de registro de evento inesperada"));
        };
        interpret_events(r, headers.len())
    }

    // ── Distribuição ────────────────────────────────────────────

    /// Busca a NF-e pela chave no Ambiente Nacional (NFeDistribuicaoDFe).
    ///
    /// `cnpj` identifica o interessado; sem ele, usa o CNPJ do certificado.
    pub async fn query_distribution(
        &self,
        access_key: &str,
        cnpj: Option<&str>,
        uf: Uf,
        environment: Environment,
        cancel: Option<&CancelToken>,
    ) -> NfeResult<DistributionResponse> {
        let key = AccessKey::parse(access_key.trim())?;
        let cnpj = match cnpj {
            Some(c) => c.chars().filter(|c| c.is_ascii_digit()).collect::<String>(),
            None => self.certificate.cnpj().ok_or_else(|| {
                NfeError::precondition("CNPJ não informado e ausente no certificado")
            })?,
        };
        if cnpj.len() != 14 {
            return Err(NfeError::precondition(format!("CNPJ inválido: {cnpj}")));
        }

        let mut body = format!("<distDFeInt xmlns=\"{NFE_NAMESPACE}\" versao=\"1.01\">");
        push_tag(&mut body, "tpAmb", &environment.tp_amb().to_string());
        push_tag(&mut body, "cUFAutor", &uf.code().to_string());
        push_tag(&mut body, "CNPJ", &cnpj);
        body.push_str("<consChNFe>");
        push_tag(&mut body, "chNFe", key.as_str());
        body.push_str("</consChNFe></distDFeInt>");

        let response = self
            .call(ServiceKind::Distribution, uf, environment, Route::Primary, &body, cancel)
            .await?;
        let ServiceResponse::Distribution(r) = response else {
            return Err(NfeError::parse("resposta de distribuição inesperada"));
        };
        Ok(r)
    }
}

#[async_trait]
impl<T: SoapTransport> ReceiptPoller for NfeService<T> {
    async fn poll_receipt(
        &self,
        receipt: &str,
        uf: Uf,
        environment: Environment,
        route: Route,
        cancel: Option<&CancelToken>,
    ) -> NfeResult<SubmissionResult> {
        NfeService::poll_receipt(self, receipt, uf, environment, route, cancel).await
    }
}

// ── Interpretação ───────────────────────────────────────────────

fn batch_id() -> String {
    chrono::Utc::now().format("%y%m%d%H%M%S%3f").to_string()
}

fn prepare_batch(signed_xml: &str) -> NfeResult<String> {
    let stripped = xml::strip_declaration(signed_xml);
    if stripped.starts_with("<enviNFe") {
        Ok(stripped.to_string())
    } else if stripped.starts_with("<NFe") {
        build_batch(&batch_id(), false, &[stripped])
    } else {
        Err(NfeError::precondition("esperado <enviNFe> ou <NFe> assinada"))
    }
}

/// Confere assinatura, ambiente e tipo de emissão de cada NF-e do lote.
fn check_batch(batch: &str, uf: Uf, environment: Environment, route: Route) -> NfeResult<()> {
    let doc = xml::parse(batch)?;
    let mut count = 0usize;
    for nfe in xml::find_all(doc.root_element(), "NFe") {
        count += 1;
        if xml::child(nfe, "Signature").is_none() {
            return Err(NfeError::precondition("NF-e do lote sem assinatura digital"));
        }
        let tp_amb = xml::text_of(nfe, "tpAmb").unwrap_or_default();
        if Environment::from_tp_amb(&tp_amb) != Some(environment) {
            return Err(NfeError::precondition(format!(
                "tpAmb {tp_amb:?} da NF-e não corresponde ao ambiente {environment}"
            )));
        }
        if route == Route::Contingency {
            let expected = registry::contingency_for(uf).tp_emis().to_string();
            let tp_emis = xml::text_of(nfe, "tpEmis").unwrap_or_default();
            if tp_emis != expected {
                return Err(NfeError::precondition(format!(
                    "envio em contingência exige tpEmis {expected}, NF-e traz {tp_emis:?}"
                )));
            }
        }
    }
    if count == 0 {
        return Err(NfeError::precondition("lote sem NF-e"));
    }
    Ok(())
}

/// Traduz `retEnviNFe`/`retConsReciNFe` no resultado do envio.
///
/// Um `nProt` explícito no protocolo prevalece sobre o `cStat` do lote.
fn interpret_batch(response: BatchResponse, known_receipt: Option<&str>) -> NfeResult<SubmissionResult> {
    if response.protocols.len() > 1 {
        return Ok(SubmissionResult::Batch {
            code: response.status,
            reason: response.reason,
            documents: response.protocols.into_iter().map(interpret_protocol).collect(),
        });
    }
    if let Some(protocol) = response.protocols.into_iter().next() {
        return Ok(interpret_protocol(protocol));
    }

    let status = response.status;
    if status.is_awaiting_query() {
        let receipt = response
            .receipt
            .or_else(|| known_receipt.map(str::to_string))
            .ok_or_else(|| NfeError::parse(format!("cStat {status} sem número de recibo")))?;
        return Ok(SubmissionResult::Pending {
            receipt,
            code: status,
            reason: response.reason,
            average_time_secs: response.average_time_secs,
        });
    }
    if status.is_authorized() || status == StatusCode::BatchProcessed {
        return Err(NfeError::parse(format!("cStat {status} sem <protNFe>")));
    }
    if status.is_denied() {
        return Ok(SubmissionResult::Denied {
            code: status,
            reason: response.reason,
            access_key: None,
            protocol: None,
        });
    }
    Ok(SubmissionResult::Rejected {
        code: status,
        reason: response.reason,
        category: status.category(),
        access_key: None,
    })
}

fn interpret_protocol(protocol: ProtocolInfo) -> SubmissionResult {
    let code = protocol.status;
    if code.is_denied() {
        return SubmissionResult::Denied {
            code,
            reason: protocol.reason.clone(),
            access_key: protocol.access_key.clone(),
            protocol: protocol.protocol.clone(),
        };
    }
    match protocol.protocol.clone().filter(|p| !p.is_empty()) {
        Some(number) => SubmissionResult::Authorized {
            protocol: number,
            code,
            reason: protocol.reason.clone(),
            access_key: protocol.access_key.clone(),
            received_at: protocol.received_at.clone(),
            detail: Some(protocol),
        },
        None => SubmissionResult::Rejected {
            code,
            reason: protocol.reason,
            category: code.category(),
            access_key: protocol.access_key,
        },
    }
}

fn interpret_events(response: EventBatchResponse, expected: usize) -> NfeResult<Vec<EventResult>> {
    if response.status != StatusCode::EventBatchProcessed {
        let code = response.status;
        return Ok((0..expected)
            .map(|_| EventResult::Rejected {
                code,
                reason: response.reason.clone(),
                category: code.category(),
            })
            .collect());
    }
    if response.events.is_empty() {
        return Err(NfeError::parse("lote de eventos processado sem <retEvento>"));
    }
    Ok(response
        .events
        .into_iter()
        .map(|e| {
            if e.status.is_event_registered() {
                EventResult::Registered {
                    code: e.status,
                    reason: e.reason,
                    protocol: e.protocol,
                    sequence: e.sequence,
                    registered_at: e.registered_at,
                }
            } else {
                EventResult::Rejected {
                    code: e.status,
                    reason: e.reason,
                    category: e.status.category(),
                }
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(status: u16, receipt: Option<&str>, protocols: Vec<ProtocolInfo>) -> BatchResponse {
        BatchResponse {
            status: StatusCode::from_code(status),
            reason: "motivo".into(),
            environment: Some(Environment::Homologation),
            received_at: None,
            receipt: receipt.map(str::to_string),
            average_time_secs: Some(1),
            protocols,
        }
    }

    fn protocol(status: u16, number: Option<&str>) -> ProtocolInfo {
        ProtocolInfo {
            status: StatusCode::from_code(status),
            reason: "motivo".into(),
            access_key: Some("35240112345678000195550010000001231123456781".into()),
            protocol: number.map(str::to_string),
            received_at: None,
            digest_value: None,
            raw_xml: "<protNFe/>".into(),
        }
    }

    #[test]
    fn pending_keeps_receipt() {
        let r = interpret_batch(batch(103, Some("123456789012345"), vec![]), None).unwrap();
        assert_eq!(r.receipt(), Some("123456789012345"));
        assert!(r.is_pending());

        let r = interpret_batch(batch(105, None, vec![]), Some("999999999999999")).unwrap();
        assert_eq!(r.receipt(), Some("999999999999999"));
    }

    #[test]
    fn explicit_protocol_number_wins() {
        let r = interpret_batch(batch(104, None, vec![protocol(100, Some("135250000001234"))]), None).unwrap();
        assert_eq!(r.protocol(), Some("135250000001234"));
        assert!(r.is_authorized());

        // cStat 150 (fora de prazo) também autoriza quando há nProt
        let r = interpret_batch(batch(104, None, vec![protocol(150, Some("1"))]), None).unwrap();
        assert!(r.is_authorized());
    }

    #[test]
    fn rejection_and_denial_are_values() {
        let r = interpret_batch(batch(104, None, vec![protocol(539, None)]), None).unwrap();
        assert!(matches!(
            r,
            SubmissionResult::Rejected { code: StatusCode::Rejected(539), category: StatusCategory::BusinessRejection, .. }
        ));

        let r = interpret_batch(batch(104, None, vec![protocol(302, Some("135250000000001"))]), None).unwrap();
        assert!(matches!(r, SubmissionResult::Denied { .. }));
        assert_eq!(r.protocol(), Some("135250000000001"));

        let r = interpret_batch(batch(225, None, vec![]), None).unwrap();
        assert!(matches!(r, SubmissionResult::Rejected { category: StatusCategory::SchemaRejection, .. }));
    }

    #[test]
    fn every_protocol_of_a_batch_is_returned() {
        let mut second = protocol(539, None);
        second.access_key = Some("35240112345678000195550010000001241876543210".into());
        let r = interpret_batch(
            batch(104, None, vec![protocol(100, Some("135250000001234")), second]),
            None,
        )
        .unwrap();

        assert_eq!(r.code(), StatusCode::BatchProcessed);
        assert_eq!(r.documents().len(), 2);
        assert!(r.documents()[0].is_authorized());
        let rejected = r.for_key("35240112345678000195550010000001241876543210").unwrap();
        assert!(matches!(rejected, SubmissionResult::Rejected { code: StatusCode::Rejected(539), .. }));

        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "BATCH");
        assert_eq!(json["documents"][1]["status"], "REJECTED");
    }

    #[test]
    fn unknown_codes_keep_raw_value() {
        let r = interpret_batch(batch(1234, None, vec![]), None).unwrap();
        assert_eq!(r.code(), StatusCode::Unknown(1234));
        assert_eq!(r.code().code(), 1234);
        assert!(matches!(r, SubmissionResult::Rejected { .. }));
    }

    #[test]
    fn contract_mismatches_are_parse_faults() {
        assert!(matches!(interpret_batch(batch(103, None, vec![]), None), Err(NfeError::Parse(_))));
        assert!(matches!(interpret_batch(batch(104, None, vec![]), None), Err(NfeError::Parse(_))));
    }

    #[test]
    fn submission_result_serializes_with_status_tag() {
        let r = interpret_batch(batch(103, Some("123456789012345"), vec![]), None).unwrap();
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["receipt"], "123456789012345");
        assert_eq!(json["code"], 103);
    }

    #[test]
    fn batch_checks_environment_and_contingency() {
        let nfe = |tp_amb: &str, tp_emis: &str| {
            format!(
                "<enviNFe><NFe><infNFe Id=\"NFe1\"><ide><tpEmis>{tp_emis}</tpEmis><tpAmb>{tp_amb}</tpAmb></ide></infNFe><Signature xmlns=\"http://www.w3.org/2000/09/xmldsig#\"/></NFe></enviNFe>"
            )
        };
        assert!(check_batch(&nfe("2", "1"), Uf::SP, Environment::Homologation, Route::Primary).is_ok());
        assert!(check_batch(&nfe("1", "1"), Uf::SP, Environment::Homologation, Route::Primary).is_err());
        assert!(check_batch(&nfe("2", "1"), Uf::SP, Environment::Homologation, Route::Contingency).is_err());
        assert!(check_batch(&nfe("2", "6"), Uf::SP, Environment::Homologation, Route::Contingency).is_ok());
        assert!(check_batch("<enviNFe><NFe/></enviNFe>", Uf::SP, Environment::Homologation, Route::Primary).is_err());
    }

    #[test]
    fn batch_id_has_fifteen_digits() {
        let id = batch_id();
        assert_eq!(id.len(), 15);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }
}
