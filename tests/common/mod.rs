#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder};

use sefaz_nfe::{
    Certificate, ClientConfig, NfeDraft, NfeError, NfeResult, NfeService, RawResponse, SoapRequest,
    SoapTransport,
};

pub const ACCESS_KEY: &str = "35240112345678000195550010000001231123456781";
pub const RECEIPT: &str = "123456789012345";
pub const PROTOCOL: &str = "135250000001234";

/// Transporte que devolve respostas gravadas, na ordem, e registra as
/// requisições recebidas.
#[derive(Default)]
pub struct FixtureTransport {
    replies: Mutex<VecDeque<NfeResult<RawResponse>>>,
    requests: Mutex<Vec<SoapRequest>>,
}

impl FixtureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, inner: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(RawResponse::ok(envelope(inner))));
        self
    }

    pub fn fail(self, err: NfeError) -> Self {
        self.replies.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> SoapRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl SoapTransport for FixtureTransport {
    async fn send(&self, request: &SoapRequest, _certificate: &Certificate) -> NfeResult<RawResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(NfeError::Network {
                    endpoint: request.endpoint.clone(),
                    message: "nenhuma resposta gravada".into(),
                })
            })
    }
}

pub fn envelope(inner: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><nfeResultMsg xmlns="http://www.portalfiscal.inf.br/nfe/wsdl/fixture">{inner}</nfeResultMsg></soap:Body></soap:Envelope>"#
    )
}

pub fn service(transport: FixtureTransport) -> NfeService<FixtureTransport> {
    NfeService::with_transport(transport, certificate(), ClientConfig::default())
}

/// Certificado autoassinado com CNPJ no titular, gerado a cada teste.
pub fn certificate() -> Certificate {
    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, "EMPRESA TESTE LTDA:12345678000195")
        .unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    let pfx = Pkcs12::builder()
        .name("integracao")
        .pkey(&pkey)
        .cert(&cert)
        .build2("senha")
        .unwrap();
    Certificate::from_pkcs12(pfx.to_der().unwrap(), "senha").unwrap()
}

/// Rascunho mínimo de NF-e de SP em homologação (gera [`ACCESS_KEY`]).
pub fn draft() -> NfeDraft {
    serde_json::from_str(
        r#"{
            "uf": "SP",
            "environment": "homologation",
            "serie": 1,
            "numero": 123,
            "numeric_code": 12345678,
            "data_emissao": "2024-01-15T10:00:00-03:00",
            "nat_op": "VENDA DE MERCADORIA",
            "tipo_nf": 1,
            "id_dest": 1,
            "codigo_municipio_fg": "3550308",
            "emitente": {
                "name": "EMPRESA TESTE LTDA",
                "cnpj_cpf": "12345678000195",
                "ie": "111222333444",
                "address": {
                    "logradouro": "RUA A", "nro": "100", "bairro": "CENTRO",
                    "codigo_municipio": "3550308", "municipio": "SAO PAULO",
                    "uf": "SP", "cep": "01001000"
                }
            },
            "crt": 1,
            "produtos": [{
                "code": "P1",
                "description": "PRODUTO TESTE",
                "ncm": "61091000",
                "cfop": "5102",
                "unit": "UN",
                "qty": "1.0000",
                "unit_price": "100.0000000000",
                "total": "100.00",
                "imposto": {
                    "icms": { "tipo": "simples_nacional", "orig": "0", "csosn": "102" },
                    "pis": { "tipo": "nao_tributada", "cst": "07" },
                    "cofins": { "tipo": "nao_tributada", "cst": "07" }
                }
            }],
            "totais": { "total_products": "100.00", "total_nfe": "100.00" },
            "pagamentos": [{ "t_pag": "01", "v_pag": "100.00" }]
        }"#,
    )
    .unwrap()
}

/// `docZip` como a distribuição devolve: gzip + base64.
pub fn doc_zip(xml: &str) -> String {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(xml.as_bytes()).unwrap();
    base64::engine::general_purpose::STANDARD.encode(encoder.finish().unwrap())
}
