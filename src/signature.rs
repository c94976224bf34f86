// ── Certificate & XML-DSig ──────────────────────────────────────
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use base64::Engine;
use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{NfeError, NfeResult};
use crate::xml::{self, DSIG_NAMESPACE};

const C14N_URI: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
const ENVELOPED_URI: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// Algoritmo de hash usado no digest e na assinatura RSA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    /// Perfil exigido pelo leiaute 4.00.
    #[default]
    Sha1,
    Sha256,
}

impl SignatureAlgorithm {
    pub fn signature_uri(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "http://www.w3.org/2000/09/xmldsig#rsa-sha1",
            SignatureAlgorithm::Sha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
        }
    }

    pub fn digest_uri(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "http://www.w3.org/2000/09/xmldsig#sha1",
            SignatureAlgorithm::Sha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
        }
    }

    fn from_signature_uri(uri: &str) -> Option<Self> {
        [SignatureAlgorithm::Sha1, SignatureAlgorithm::Sha256]
            .into_iter()
            .find(|a| a.signature_uri() == uri)
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            SignatureAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            SignatureAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    fn message_digest(self) -> MessageDigest {
        match self {
            SignatureAlgorithm::Sha1 => MessageDigest::sha1(),
            SignatureAlgorithm::Sha256 => MessageDigest::sha256(),
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = NfeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(SignatureAlgorithm::Sha1),
            "sha256" => Ok(SignatureAlgorithm::Sha256),
            other => Err(NfeError::Config(format!("Algoritmo de assinatura desconhecido: {other}"))),
        }
    }
}

// ── Certificate ─────────────────────────────────────────────────

/// Certificado A1 (PKCS#12) com a chave privada.
///
/// Os bytes do PFX e a senha são zerados ao descartar a instância, então
/// mantenha-a apenas pelo tempo da operação.
pub struct Certificate {
    pkey: PKey<Private>,
    cert: X509,
    pfx_bytes: Vec<u8>,
    password: String,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject())
            .field("thumbprint", &self.thumbprint())
            .finish_non_exhaustive()
    }
}

impl Drop for Certificate {
    fn drop(&mut self) {
        self.pfx_bytes.fill(0);
        let mut password = std::mem::take(&mut self.password).into_bytes();
        password.fill(0);
    }
}

impl Certificate {
    pub fn from_pkcs12(pfx_bytes: Vec<u8>, password: &str) -> NfeResult<Self> {
        let parsed = Pkcs12::from_der(&pfx_bytes)
            .and_then(|p| p.parse2(password))
            .map_err(|e| NfeError::Certificate(format!("Falha ao abrir PFX: {e}")))?;
        let pkey = parsed
            .pkey
            .ok_or_else(|| NfeError::Certificate("PFX sem chave privada".into()))?;
        let cert = parsed
            .cert
            .ok_or_else(|| NfeError::Certificate("PFX sem certificado".into()))?;
        Ok(Self {
            pkey,
            cert,
            pfx_bytes,
            password: password.to_string(),
        })
    }

    pub fn from_pkcs12_file(path: impl AsRef<Path>, password: &str) -> NfeResult<Self> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| {
            NfeError::Certificate(format!("Falha ao ler {}: {e}", path.as_ref().display()))
        })?;
        Self::from_pkcs12(bytes, password)
    }

    pub fn subject(&self) -> String {
        self.cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|e| e.data().to_string().ok())
            .unwrap_or_default()
    }

    /// CNPJ do titular, quando presente no nome (padrão "RAZAO:CNPJ" do e-CNPJ).
    pub fn cnpj(&self) -> Option<String> {
        find_cnpj_in_str(&self.subject())
    }

    /// SHA-1 do DER, em hexadecimal maiúsculo separado por ':'.
    pub fn thumbprint(&self) -> String {
        self.cert
            .digest(MessageDigest::sha1())
            .map(|d| {
                hex::encode_upper(&*d)
                    .as_bytes()
                    .chunks(2)
                    .map(|c| String::from_utf8_lossy(c).into_owned())
                    .collect::<Vec<_>>()
                    .join(":")
            })
            .unwrap_or_default()
    }

    pub fn not_after(&self) -> String {
        self.cert.not_after().to_string()
    }

    pub fn is_expired(&self) -> NfeResult<bool> {
        let now = Asn1Time::days_from_now(0)?;
        Ok(self.cert.not_after().compare(&now)? == Ordering::Less)
    }

    pub fn der_base64(&self) -> NfeResult<String> {
        Ok(b64().encode(self.cert.to_der()?))
    }

    /// PFX e senha para montar a identidade TLS de uma requisição.
    pub(crate) fn pkcs12(&self) -> (&[u8], &str) {
        (&self.pfx_bytes, &self.password)
    }

    pub fn sign(&self, data: &[u8], algorithm: SignatureAlgorithm) -> NfeResult<Vec<u8>> {
        let mut signer = Signer::new(algorithm.message_digest(), &self.pkey)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

fn find_cnpj_in_str(s: &str) -> Option<String> {
    for part in s.split(':') {
        let trimmed = part.trim();
        if trimmed.len() == 14 && trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Some(trimmed.to_string());
        }
    }
    let mut buf = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            buf.push(c);
        } else {
            if buf.len() == 14 {
                return Some(buf);
            }
            buf.clear();
        }
    }
    (buf.len() == 14).then_some(buf)
}

// ── Enveloped Signature ─────────────────────────────────────────

fn signed_info(ns_attr: &str, algorithm: SignatureAlgorithm, id: &str, digest: &str) -> String {
    format!(
        concat!(
            "<SignedInfo{ns}>",
            "<CanonicalizationMethod Algorithm=\"{c14n}\"></CanonicalizationMethod>",
            "<SignatureMethod Algorithm=\"{sig}\"></SignatureMethod>",
            "<Reference URI=\"#{id}\">",
            "<Transforms>",
            "<Transform Algorithm=\"{env}\"></Transform>",
            "<Transform Algorithm=\"{c14n}\"></Transform>",
            "</Transforms>",
            "<DigestMethod Algorithm=\"{dig}\"></DigestMethod>",
            "<DigestValue>{digest}</DigestValue>",
            "</Reference>",
            "</SignedInfo>"
        ),
        ns = ns_attr,
        c14n = C14N_URI,
        sig = algorithm.signature_uri(),
        id = xml::escape(id),
        env = ENVELOPED_URI,
        dig = algorithm.digest_uri(),
        digest = digest,
    )
}

/// Assina o elemento `element` (que deve ter atributo `Id`) com
/// assinatura enveloped, inserida como último filho do elemento pai.
///
/// Devolve o XML original com a `<Signature>` inserida; o restante do
/// texto não é reformatado.
pub fn sign_xml(
    xml_text: &str,
    element: &str,
    certificate: &Certificate,
    algorithm: SignatureAlgorithm,
) -> NfeResult<String> {
    let doc = xml::parse(xml_text)?;
    let target = xml::find_all(doc.root_element(), element)
        .find(|n| n.has_attribute("Id"))
        .ok_or_else(|| NfeError::Signature(format!("<{element} Id=\"...\"> não encontrado")))?;
    let id = target.attribute("Id").unwrap_or_default();
    if id.is_empty() {
        return Err(NfeError::Signature(format!("<{element}> com Id vazio")));
    }
    let parent = target
        .parent_element()
        .ok_or_else(|| NfeError::Signature(format!("<{element}> precisa de um elemento pai")))?;
    if xml::child(parent, "Signature").is_some() {
        return Err(NfeError::Signature(format!("<{element} Id=\"{id}\"> já está assinado")));
    }

    let canonical = xml::canonicalize(target);
    let digest = b64().encode(algorithm.digest(canonical.as_bytes()));

    let info = signed_info(&format!(" xmlns=\"{DSIG_NAMESPACE}\""), algorithm, id, &digest);
    let info_doc = xml::parse(&info)?;
    let info_canonical = xml::canonicalize(info_doc.root_element());
    let signature_value = b64().encode(certificate.sign(info_canonical.as_bytes(), algorithm)?);

    let signature = format!(
        "<Signature xmlns=\"{DSIG_NAMESPACE}\">{}<SignatureValue>{}</SignatureValue><KeyInfo><X509Data><X509Certificate>{}</X509Certificate></X509Data></KeyInfo></Signature>",
        signed_info("", algorithm, id, &digest),
        signature_value,
        certificate.der_base64()?,
    );

    let offset = xml::closing_tag_offset(xml_text, parent)?;
    let mut out = String::with_capacity(xml_text.len() + signature.len());
    out.push_str(&xml_text[..offset]);
    out.push_str(&signature);
    out.push_str(&xml_text[offset..]);

    tracing::debug!(id, algorithm = ?algorithm, "documento assinado");
    Ok(out)
}

/// Resultado da verificação de uma assinatura.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureCheck {
    pub reference_id: String,
    pub digest_ok: bool,
    pub signature_ok: bool,
}

impl SignatureCheck {
    pub fn is_valid(&self) -> bool {
        self.digest_ok && self.signature_ok
    }
}

/// Confere a primeira `<Signature>` do documento usando o certificado
/// embutido em `X509Certificate`.
pub fn verify_xml(xml_text: &str) -> NfeResult<SignatureCheck> {
    let doc = xml::parse(xml_text)?;
    let root = doc.root_element();
    let signature = xml::find_all(root, "Signature")
        .find(|n| n.tag_name().namespace() == Some(DSIG_NAMESPACE))
        .ok_or_else(|| NfeError::Signature("documento sem <Signature>".into()))?;
    let info = xml::child(signature, "SignedInfo")
        .ok_or_else(|| NfeError::Signature("<SignedInfo> ausente".into()))?;
    let reference = xml::find(info, "Reference")
        .ok_or_else(|| NfeError::Signature("<Reference> ausente".into()))?;
    let reference_id = reference
        .attribute("URI")
        .unwrap_or_default()
        .trim_start_matches('#')
        .to_string();
    let algorithm = xml::find(info, "SignatureMethod")
        .and_then(|n| n.attribute("Algorithm"))
        .and_then(SignatureAlgorithm::from_signature_uri)
        .ok_or_else(|| NfeError::Signature("SignatureMethod não suportado".into()))?;

    let target = root
        .descendants()
        .find(|n| n.is_element() && n.attribute("Id") == Some(reference_id.as_str()))
        .ok_or_else(|| NfeError::Signature(format!("elemento Id=\"{reference_id}\" não encontrado")))?;
    let expected_digest = xml::text_of(reference, "DigestValue").unwrap_or_default();
    let digest = b64().encode(algorithm.digest(xml::canonicalize(target).as_bytes()));

    let cert_b64: String = xml::text_of(signature, "X509Certificate")
        .unwrap_or_default()
        .split_whitespace()
        .collect();
    let cert_der = b64()
        .decode(cert_b64)
        .map_err(|e| NfeError::Signature(format!("X509Certificate inválido: {e}")))?;
    let public_key = X509::from_der(&cert_der)?.public_key()?;

    let value_b64: String = xml::text_of(signature, "SignatureValue")
        .unwrap_or_default()
        .split_whitespace()
        .collect();
    let value = b64()
        .decode(value_b64)
        .map_err(|e| NfeError::Signature(format!("SignatureValue inválido: {e}")))?;

    let mut verifier = Verifier::new(algorithm.message_digest(), &public_key)?;
    verifier.update(xml::canonicalize(info).as_bytes())?;
    let signature_ok = verifier.verify(&value)?;

    Ok(SignatureCheck {
        reference_id,
        digest_ok: digest == expected_digest,
        signature_ok,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use openssl::bn::BigNum;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509Builder, X509NameBuilder};

    /// Certificado autoassinado descartável no formato de um e-CNPJ A1.
    pub(crate) fn test_certificate() -> Certificate {
        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "EMPRESA TESTE LTDA:12345678000195")
            .unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.sign(&pkey, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        let pfx = Pkcs12::builder()
            .name("teste")
            .pkey(&pkey)
            .cert(&cert)
            .build2("senha")
            .unwrap();
        Certificate::from_pkcs12(pfx.to_der().unwrap(), "senha").unwrap()
    }

    const UNSIGNED: &str = r#"<NFe xmlns="http://www.portalfiscal.inf.br/nfe"><infNFe versao="4.00" Id="NFe35240112345678000195550010000001231123456781"><ide><cUF>35</cUF><natOp>VENDA &amp; REMESSA</natOp></ide></infNFe></NFe>"#;

    #[test]
    fn certificate_metadata() {
        let cert = test_certificate();
        assert_eq!(cert.subject(), "EMPRESA TESTE LTDA:12345678000195");
        assert_eq!(cert.cnpj().as_deref(), Some("12345678000195"));
        assert_eq!(cert.thumbprint().split(':').count(), 20);
        assert!(!cert.is_expired().unwrap());
        assert!(cert.pkcs12().0.len() > 100);
    }

    #[test]
    fn wrong_password_is_a_certificate_error() {
        let cert = test_certificate();
        let (der, _) = cert.pkcs12();
        let r = Certificate::from_pkcs12(der.to_vec(), "errada");
        assert!(matches!(r, Err(NfeError::Certificate(_))));
    }

    #[test]
    fn signs_and_verifies_sha1() {
        let cert = test_certificate();
        let signed = sign_xml(UNSIGNED, "infNFe", &cert, SignatureAlgorithm::Sha1).unwrap();
        assert!(signed.ends_with("</Signature></NFe>"));
        assert!(signed.contains("Reference URI=\"#NFe35240112345678000195550010000001231123456781\""));
        assert!(signed.contains(SignatureAlgorithm::Sha1.signature_uri()));

        let check = verify_xml(&signed).unwrap();
        assert!(check.is_valid(), "{check:?}");
        assert_eq!(check.reference_id, "NFe35240112345678000195550010000001231123456781");
    }

    #[test]
    fn signs_and_verifies_sha256() {
        let cert = test_certificate();
        let signed = sign_xml(UNSIGNED, "infNFe", &cert, SignatureAlgorithm::Sha256).unwrap();
        assert!(verify_xml(&signed).unwrap().is_valid());
    }

    #[test]
    fn tampering_breaks_digest() {
        let cert = test_certificate();
        let signed = sign_xml(UNSIGNED, "infNFe", &cert, SignatureAlgorithm::Sha1).unwrap();
        let tampered = signed.replace("<cUF>35</cUF>", "<cUF>41</cUF>");
        let check = verify_xml(&tampered).unwrap();
        assert!(!check.digest_ok);
        assert!(check.signature_ok);
    }

    #[test]
    fn refuses_double_signature_and_missing_id() {
        let cert = test_certificate();
        let signed = sign_xml(UNSIGNED, "infNFe", &cert, SignatureAlgorithm::Sha1).unwrap();
        assert!(sign_xml(&signed, "infNFe", &cert, SignatureAlgorithm::Sha1).is_err());
        assert!(sign_xml("<NFe><infNFe/></NFe>", "infNFe", &cert, SignatureAlgorithm::Sha1).is_err());
    }

    #[test]
    fn cnpj_lookup_in_subject() {
        assert_eq!(find_cnpj_in_str("ACME:12345678000195").as_deref(), Some("12345678000195"));
        assert_eq!(find_cnpj_in_str("ACME 12345678000195 X").as_deref(), Some("12345678000195"));
        assert_eq!(find_cnpj_in_str("ACME 123"), None);
    }

    #[test]
    fn algorithm_names() {
        assert_eq!("SHA-256".parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::Sha256);
        assert!("md5".parse::<SignatureAlgorithm>().is_err());
    }
}
