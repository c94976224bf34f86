// ── SOAP Transport ──────────────────────────────────────────────
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::ClientConfig;
use crate::error::{NfeError, NfeResult};
use crate::model::{ServiceKind, Uf};
use crate::registry::WebserviceDescriptor;
use crate::signature::Certificate;
use crate::xml;

pub const SOAP12_NAMESPACE: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Uma chamada SOAP pronta para envio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapRequest {
    pub service: ServiceKind,
    pub endpoint: String,
    pub soap_action: String,
    pub envelope: String,
}

impl SoapRequest {
    pub fn new(descriptor: &WebserviceDescriptor, uf: Uf, body_xml: &str) -> Self {
        Self {
            service: descriptor.service,
            endpoint: descriptor.endpoint_url.clone(),
            soap_action: descriptor.soap_action.clone(),
            envelope: build_envelope(descriptor.service, uf, body_xml),
        }
    }
}

/// Corpo bruto de uma resposta HTTP 2xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub elapsed: Duration,
}

impl RawResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Monta o envelope SOAP 1.2 do serviço com `body_xml` em `nfeDadosMsg`.
pub fn build_envelope(service: ServiceKind, uf: Uf, body_xml: &str) -> String {
    let ns = service.wsdl_namespace();
    let body_xml = xml::strip_declaration(body_xml);
    match service {
        ServiceKind::Distribution => format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><soap12:Envelope xmlns:soap12="{SOAP12_NAMESPACE}" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema"><soap12:Header><nfeCabecMsg xmlns="{ns}"><cUF>{uf}</cUF><versaoDados>1.01</versaoDados></nfeCabecMsg></soap12:Header><soap12:Body><nfeDistDFeInteresse xmlns="{ns}"><nfeDadosMsg>{body_xml}</nfeDadosMsg></nfeDistDFeInteresse></soap12:Body></soap12:Envelope>"#,
            uf = uf.code(),
        ),
        _ => format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><soap12:Envelope xmlns:soap12="{SOAP12_NAMESPACE}" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema"><soap12:Body><nfeDadosMsg xmlns="{ns}">{body_xml}</nfeDadosMsg></soap12:Body></soap12:Envelope>"#
        ),
    }
}

/// Extrai o motivo de um SOAP Fault (1.1 ou 1.2), se o corpo contiver um.
pub fn fault_reason(body: &str) -> Option<String> {
    let doc = roxmltree::Document::parse(body).ok()?;
    let fault = xml::find(doc.root_element(), "Fault")?;
    xml::text_of(fault, "Text")
        .or_else(|| xml::text_of(fault, "faultstring"))
        .or_else(|| xml::text_of(fault, "Value"))
        .filter(|s| !s.is_empty())
        .or_else(|| Some("SOAP Fault sem motivo".to_string()))
}

/// Um ciclo requisição/resposta SOAP autenticado.
///
/// Implementações não guardam estado entre chamadas e podem ser usadas
/// concorrentemente.
#[async_trait]
pub trait SoapTransport: Send + Sync {
    async fn send(&self, request: &SoapRequest, certificate: &Certificate) -> NfeResult<RawResponse>;
}

/// Transporte HTTPS com TLS mútuo via `reqwest`.
///
/// Cada chamada monta um cliente próprio com a identidade do certificado,
/// de modo que requisições concorrentes não compartilham sessão TLS e a
/// identidade TLS não sobrevive à requisição.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    timeout: Duration,
    connect_timeout: Duration,
    accept_invalid_certs: bool,
    root_certificates: Vec<reqwest::Certificate>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> NfeResult<Self> {
        let mut root_certificates = Vec::new();
        for path in &config.extra_root_certificates {
            let pem = std::fs::read(path).map_err(|e| {
                NfeError::Config(format!("Falha ao ler certificado raiz {}: {e}", path.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                NfeError::Config(format!("Certificado raiz inválido {}: {e}", path.display()))
            })?;
            root_certificates.push(cert);
        }
        Ok(Self {
            timeout: config.timeout(),
            connect_timeout: config.connect_timeout(),
            accept_invalid_certs: config.accept_invalid_certs,
            root_certificates,
        })
    }

    fn client(&self, certificate: &Certificate) -> NfeResult<reqwest::Client> {
        let (pfx, password) = certificate.pkcs12();
        let identity = reqwest::Identity::from_pkcs12_der(pfx, password)
            .map_err(|e| NfeError::Certificate(format!("Falha ao criar identidade TLS: {e}")))?;

        let mut builder = reqwest::Client::builder()
            .use_native_tls()
            .identity(identity)
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs);
        for root in &self.root_certificates {
            builder = builder.add_root_certificate(root.clone());
        }
        builder
            .build()
            .map_err(|e| NfeError::Config(format!("Falha ao criar cliente HTTP: {e}")))
    }

    fn classify(&self, endpoint: &str, error: reqwest::Error) -> NfeError {
        if error.is_timeout() {
            return NfeError::Timeout {
                endpoint: endpoint.to_string(),
                seconds: self.timeout.as_secs(),
            };
        }
        let message = error_chain(&error);
        let lower = message.to_ascii_lowercase();
        if ["certificate", "handshake", "tls", "ssl"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            NfeError::Tls {
                endpoint: endpoint.to_string(),
                message,
            }
        } else if error.is_connect() {
            NfeError::Connection {
                endpoint: endpoint.to_string(),
                message,
            }
        } else {
            NfeError::Network {
                endpoint: endpoint.to_string(),
                message,
            }
        }
    }
}

#[async_trait]
impl SoapTransport for HttpTransport {
    async fn send(&self, request: &SoapRequest, certificate: &Certificate) -> NfeResult<RawResponse> {
        let client = self.client(certificate)?;
        let started = Instant::now();

        let response = client
            .post(&request.endpoint)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!(
                    "application/soap+xml; charset=utf-8; action=\"{}\"",
                    request.soap_action
                ),
            )
            .body(request.envelope.clone())
            .send()
            .await
            .map_err(|e| {
                let err = self.classify(&request.endpoint, e);
                tracing::warn!(service = %request.service, endpoint = %request.endpoint, error = %err, "falha de transporte");
                err
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.classify(&request.endpoint, e))?;
        let elapsed = started.elapsed();

        tracing::info!(
            service = %request.service,
            endpoint = %request.endpoint,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "chamada SOAP concluída"
        );

        if !status.is_success() {
            let fault = fault_reason(&body);
            tracing::warn!(status = status.as_u16(), fault = ?fault, "SEFAZ retornou erro HTTP");
            return Err(NfeError::Http {
                status: status.as_u16(),
                fault,
            });
        }

        Ok(RawResponse {
            status: status.as_u16(),
            body,
            elapsed,
        })
    }
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Environment;
    use crate::registry;

    #[test]
    fn envelope_wraps_body_without_declaration() {
        let env = build_envelope(
            ServiceKind::ServiceStatus,
            Uf::SP,
            r#"<?xml version="1.0" encoding="UTF-8"?><consStatServ versao="4.00"/>"#,
        );
        assert!(env.contains(
            r#"<nfeDadosMsg xmlns="http://www.portalfiscal.inf.br/nfe/wsdl/NFeStatusServico4"><consStatServ versao="4.00"/></nfeDadosMsg>"#
        ));
        assert_eq!(env.matches("<?xml").count(), 1);
        roxmltree::Document::parse(&env).unwrap();
    }

    #[test]
    fn distribution_envelope_carries_header() {
        let env = build_envelope(ServiceKind::Distribution, Uf::MG, "<distDFeInt/>");
        assert!(env.contains("<cUF>31</cUF><versaoDados>1.01</versaoDados>"));
        assert!(env.contains("<nfeDistDFeInteresse"));
    }

    #[test]
    fn request_uses_registry_descriptor() {
        let d = registry::resolve(Uf::SP, Environment::Homologation, ServiceKind::Authorization);
        let r = SoapRequest::new(d, Uf::SP, "<enviNFe/>");
        assert_eq!(r.endpoint, d.endpoint_url);
        assert_eq!(r.soap_action, d.soap_action);
        assert_eq!(r.service, ServiceKind::Authorization);
    }

    #[test]
    fn fault_reason_soap12_and_11() {
        let f12 = r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><soap:Fault><soap:Code><soap:Value>soap:Receiver</soap:Value></soap:Code><soap:Reason><soap:Text xml:lang="pt">Erro interno</soap:Text></soap:Reason></soap:Fault></soap:Body></soap:Envelope>"#;
        assert_eq!(fault_reason(f12).as_deref(), Some("Erro interno"));
        let f11 = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>Bad request</faultstring></s:Fault></s:Body></s:Envelope>"#;
        assert_eq!(fault_reason(f11).as_deref(), Some("Bad request"));
        assert_eq!(fault_reason("<ok/>"), None);
        assert_eq!(fault_reason("not xml"), None);
    }

    #[test]
    fn transport_builds_from_default_config() {
        let t = HttpTransport::new(&ClientConfig::default()).unwrap();
        assert_eq!(t.timeout, Duration::from_secs(30));
        assert!(t.root_certificates.is_empty());
    }

    fn quick_transport() -> HttpTransport {
        HttpTransport::new(&ClientConfig {
            timeout_secs: 2,
            connect_timeout_secs: 2,
            ..ClientConfig::default()
        })
        .unwrap()
    }

    fn status_request(endpoint: String) -> SoapRequest {
        SoapRequest {
            service: ServiceKind::ServiceStatus,
            endpoint,
            soap_action: "http://www.portalfiscal.inf.br/nfe/wsdl/NFeStatusServico4/nfeStatusServicoNF".into(),
            envelope: build_envelope(ServiceKind::ServiceStatus, Uf::SP, "<consStatServ/>"),
        }
    }

    #[tokio::test]
    async fn silent_server_is_a_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // aceita e segura as conexões sem nunca responder
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let cert = crate::signature::tests::test_certificate();
        let err = quick_transport()
            .send(&status_request(format!("https://{addr}/ws")), &cert)
            .await
            .unwrap_err();
        assert!(matches!(err, NfeError::Timeout { seconds: 2, .. }), "{err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn refused_port_is_a_connection_fault() {
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let cert = crate::signature::tests::test_certificate();
        let err = quick_transport()
            .send(&status_request(format!("https://{addr}/ws")), &cert)
            .await
            .unwrap_err();
        assert!(matches!(err, NfeError::Connection { .. }), "{err:?}");
        assert_eq!(err.category(), crate::error::ErrorCategory::Transport);
    }

    #[test]
    fn missing_root_certificate_is_config_error() {
        let config = ClientConfig {
            extra_root_certificates: vec!["/nao/existe.pem".into()],
            ..ClientConfig::default()
        };
        assert!(matches!(HttpTransport::new(&config), Err(NfeError::Config(_))));
    }
}
