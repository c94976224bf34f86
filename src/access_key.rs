// ── Access Key (chave de acesso) ────────────────────────────────
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{NfeError, NfeResult};
use crate::model::Uf;

pub const ACCESS_KEY_LEN: usize = 44;

/// Campos que compõem a chave de acesso, na ordem em que aparecem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyParts {
    pub uf: Uf,
    /// Apenas ano e mês entram na chave (AAMM).
    pub emission_date: NaiveDate,
    /// CNPJ (14 dígitos) ou CPF (11 dígitos, completado com zeros).
    pub emitter_document: String,
    /// 55 = NF-e, 65 = NFC-e.
    pub model: u8,
    pub series: u16,
    pub number: u32,
    pub tp_emis: u8,
    /// `cNF`, 8 dígitos.
    pub numeric_code: u32,
}

/// Chave de acesso de 44 dígitos, sempre com dígito verificador válido.
///
/// Uma vez calculada para um documento transmitido, a chave não deve ser
/// recalculada: é o identificador externo da NF-e.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

impl AccessKey {
    pub fn compute(parts: &AccessKeyParts) -> NfeResult<Self> {
        let doc: String = parts
            .emitter_document
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        if doc.len() != 14 && doc.len() != 11 {
            return Err(invalid(&parts.emitter_document, "CNPJ/CPF do emitente deve ter 14 ou 11 dígitos"));
        }
        if parts.model != 55 && parts.model != 65 {
            return Err(invalid(&parts.model.to_string(), "modelo deve ser 55 ou 65"));
        }
        if parts.series > 999 {
            return Err(invalid(&parts.series.to_string(), "série acima de 999"));
        }
        if parts.number == 0 || parts.number > 999_999_999 {
            return Err(invalid(&parts.number.to_string(), "número da NF fora de 1..999999999"));
        }
        if !(1..=9).contains(&parts.tp_emis) {
            return Err(invalid(&parts.tp_emis.to_string(), "tpEmis fora de 1..9"));
        }
        if parts.numeric_code > 99_999_999 {
            return Err(invalid(&parts.numeric_code.to_string(), "cNF acima de 8 dígitos"));
        }

        let body = format!(
            "{:02}{:02}{:02}{:0>14}{:02}{:03}{:09}{}{:08}",
            parts.uf.code(),
            parts.emission_date.year() % 100,
            parts.emission_date.month(),
            doc,
            parts.model,
            parts.series,
            parts.number,
            parts.tp_emis,
            parts.numeric_code,
        );
        let dv = check_digit(&body)?;
        Ok(AccessKey(format!("{body}{dv}")))
    }

    /// Valida uma chave existente: tamanho, dígitos, UF, modelo e DV.
    pub fn parse(key: &str) -> NfeResult<Self> {
        let key = key.trim();
        if key.len() != ACCESS_KEY_LEN || !key.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid(key, "deve conter exatamente 44 dígitos numéricos"));
        }
        let uf_code: u8 = key[..2].parse().map_err(|_| invalid(key, "código UF inválido"))?;
        if Uf::from_code(uf_code).is_none() {
            return Err(invalid(key, "código UF inválido"));
        }
        if !matches!(&key[20..22], "55" | "65") {
            return Err(invalid(key, "modelo deve ser 55 ou 65"));
        }
        let expected = check_digit(&key[..43])?;
        if key[43..].parse::<u8>().ok() != Some(expected) {
            return Err(invalid(key, "dígito verificador não confere"));
        }
        Ok(AccessKey(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Valor do atributo `Id` de `infNFe`.
    pub fn id(&self) -> String {
        format!("NFe{}", self.0)
    }

    pub fn uf(&self) -> Uf {
        // validado na construção
        Uf::from_code(self.0[..2].parse().unwrap_or_default()).unwrap_or(Uf::SP)
    }

    /// Ano (dois dígitos) e mês de emissão.
    pub fn year_month(&self) -> (u8, u8) {
        (self.digits(2..4) as u8, self.digits(4..6) as u8)
    }

    pub fn emitter_document(&self) -> &str {
        &self.0[6..20]
    }

    pub fn model(&self) -> u8 {
        self.digits(20..22) as u8
    }

    pub fn series(&self) -> u16 {
        self.digits(22..25) as u16
    }

    pub fn number(&self) -> u32 {
        self.digits(25..34)
    }

    pub fn tp_emis(&self) -> u8 {
        self.digits(34..35) as u8
    }

    pub fn numeric_code(&self) -> u32 {
        self.digits(35..43)
    }

    pub fn check_digit(&self) -> u8 {
        self.digits(43..44) as u8
    }

    fn digits(&self, range: std::ops::Range<usize>) -> u32 {
        self.0[range].parse().unwrap_or_default()
    }
}

/// Dígito verificador módulo 11, pesos 2 a 9 da direita para a esquerda.
pub fn check_digit(digits: &str) -> NfeResult<u8> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(digits, "cálculo do DV exige apenas dígitos"));
    }
    let sum: u32 = digits
        .bytes()
        .rev()
        .zip((2..=9).cycle())
        .map(|(b, w)| u32::from(b - b'0') * w)
        .sum();
    Ok(match sum % 11 {
        0 | 1 => 0,
        r => (11 - r) as u8,
    })
}

/// Gera um `cNF` aleatório de 8 dígitos, diferente do número da nota.
pub fn random_numeric_code(number: u32) -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let code: u32 = rng.gen_range(1..=99_999_999);
        if code != number {
            return code;
        }
    }
}

fn invalid(key: &str, reason: &str) -> NfeError {
    NfeError::InvalidAccessKey {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

impl FromStr for AccessKey {
    type Err = NfeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccessKey::parse(s)
    }
}

impl TryFrom<String> for AccessKey {
    type Error = NfeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccessKey::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(key: AccessKey) -> Self {
        key.0
    }
}

impl AsRef<str> for AccessKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
