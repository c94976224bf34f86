// ── Domain Selectors ────────────────────────────────────────────
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NfeError;

/// Ambiente de destino (`tpAmb`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Homologation,
}

impl Environment {
    pub const ALL: [Environment; 2] = [Environment::Production, Environment::Homologation];

    /// Valor de `tpAmb` no XML.
    pub fn tp_amb(self) -> u8 {
        match self {
            Environment::Production => 1,
            Environment::Homologation => 2,
        }
    }

    pub fn from_tp_amb(value: &str) -> Option<Self> {
        match value.trim() {
            "1" => Some(Environment::Production),
            "2" => Some(Environment::Homologation),
            _ => None,
        }
    }
}

impl FromStr for Environment {
    type Err = NfeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "production" | "producao" | "produção" => Ok(Environment::Production),
            "2" | "homologation" | "homologacao" | "homologação" => Ok(Environment::Homologation),
            other => Err(NfeError::Config(format!("Ambiente desconhecido: {other}"))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Production => f.write_str("production"),
            Environment::Homologation => f.write_str("homologation"),
        }
    }
}

/// Unidade Federativa, com o código IBGE usado em `cUF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Uf {
    RO,
    AC,
    AM,
    RR,
    PA,
    AP,
    TO,
    MA,
    PI,
    CE,
    RN,
    PB,
    PE,
    AL,
    SE,
    BA,
    MG,
    ES,
    RJ,
    SP,
    PR,
    SC,
    RS,
    MS,
    MT,
    GO,
    DF,
}

impl Uf {
    pub const ALL: [Uf; 27] = [
        Uf::RO,
        Uf::AC,
        Uf::AM,
        Uf::RR,
        Uf::PA,
        Uf::AP,
        Uf::TO,
        Uf::MA,
        Uf::PI,
        Uf::CE,
        Uf::RN,
        Uf::PB,
        Uf::PE,
        Uf::AL,
        Uf::SE,
        Uf::BA,
        Uf::MG,
        Uf::ES,
        Uf::RJ,
        Uf::SP,
        Uf::PR,
        Uf::SC,
        Uf::RS,
        Uf::MS,
        Uf::MT,
        Uf::GO,
        Uf::DF,
    ];

    /// Código IBGE da UF.
    pub fn code(self) -> u8 {
        match self {
            Uf::RO => 11,
            Uf::AC => 12,
            Uf::AM => 13,
            Uf::RR => 14,
            Uf::PA => 15,
            Uf::AP => 16,
            Uf::TO => 17,
            Uf::MA => 21,
            Uf::PI => 22,
            Uf::CE => 23,
            Uf::RN => 24,
            Uf::PB => 25,
            Uf::PE => 26,
            Uf::AL => 27,
            Uf::SE => 28,
            Uf::BA => 29,
            Uf::MG => 31,
            Uf::ES => 32,
            Uf::RJ => 33,
            Uf::SP => 35,
            Uf::PR => 41,
            Uf::SC => 42,
            Uf::RS => 43,
            Uf::MS => 50,
            Uf::MT => 51,
            Uf::GO => 52,
            Uf::DF => 53,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Uf::ALL.into_iter().find(|uf| uf.code() == code)
    }

    pub fn sigla(self) -> &'static str {
        match self {
            Uf::RO => "RO",
            Uf::AC => "AC",
            Uf::AM => "AM",
            Uf::RR => "RR",
            Uf::PA => "PA",
            Uf::AP => "AP",
            Uf::TO => "TO",
            Uf::MA => "MA",
            Uf::PI => "PI",
            Uf::CE => "CE",
            Uf::RN => "RN",
            Uf::PB => "PB",
            Uf::PE => "PE",
            Uf::AL => "AL",
            Uf::SE => "SE",
            Uf::BA => "BA",
            Uf::MG => "MG",
            Uf::ES => "ES",
            Uf::RJ => "RJ",
            Uf::SP => "SP",
            Uf::PR => "PR",
            Uf::SC => "SC",
            Uf::RS => "RS",
            Uf::MS => "MS",
            Uf::MT => "MT",
            Uf::GO => "GO",
            Uf::DF => "DF",
        }
    }
}

impl FromStr for Uf {
    type Err = NfeError;

    /// Aceita a sigla ("SP") ou o código IBGE ("35").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<u8>() {
            return Uf::from_code(code).ok_or_else(|| NfeError::InvalidUf(trimmed.to_string()));
        }
        let upper = trimmed.to_ascii_uppercase();
        Uf::ALL
            .into_iter()
            .find(|uf| uf.sigla() == upper)
            .ok_or_else(|| NfeError::InvalidUf(trimmed.to_string()))
    }
}

impl fmt::Display for Uf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sigla())
    }
}

/// Serviço SEFAZ alvo de uma requisição.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// NFeAutorizacao4 (envio de lote).
    Authorization,
    /// NFeRetAutorizacao4 (consulta de recibo).
    ReceiptQuery,
    /// NFeConsultaProtocolo4.
    ProtocolQuery,
    /// NFeStatusServico4.
    ServiceStatus,
    /// NFeRecepcaoEvento4.
    EventRegistration,
    /// NFeDistribuicaoDFe (Ambiente Nacional).
    Distribution,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 6] = [
        ServiceKind::Authorization,
        ServiceKind::ReceiptQuery,
        ServiceKind::ProtocolQuery,
        ServiceKind::ServiceStatus,
        ServiceKind::EventRegistration,
        ServiceKind::Distribution,
    ];

    /// Nome do serviço no WSDL, que compõe o namespace e a SOAP action.
    pub fn wsdl_name(self) -> &'static str {
        match self {
            ServiceKind::Authorization => "NFeAutorizacao4",
            ServiceKind::ReceiptQuery => "NFeRetAutorizacao4",
            ServiceKind::ProtocolQuery => "NFeConsultaProtocolo4",
            ServiceKind::ServiceStatus => "NFeStatusServico4",
            ServiceKind::EventRegistration => "NFeRecepcaoEvento4",
            ServiceKind::Distribution => "NFeDistribuicaoDFe",
        }
    }

    /// Operação SOAP invocada.
    pub fn operation(self) -> &'static str {
        match self {
            ServiceKind::Authorization => "nfeAutorizacaoLote",
            ServiceKind::ReceiptQuery => "nfeRetAutorizacaoLote",
            ServiceKind::ProtocolQuery => "nfeConsultaNF",
            ServiceKind::ServiceStatus => "nfeStatusServicoNF",
            ServiceKind::EventRegistration => "nfeRecepcaoEvento",
            ServiceKind::Distribution => "nfeDistDFeInteresse",
        }
    }

    /// Elemento raiz esperado dentro do `soap:Body` da resposta.
    pub fn response_root(self) -> &'static str {
        match self {
            ServiceKind::Authorization => "retEnviNFe",
            ServiceKind::ReceiptQuery => "retConsReciNFe",
            ServiceKind::ProtocolQuery => "retConsSitNFe",
            ServiceKind::ServiceStatus => "retConsStatServ",
            ServiceKind::EventRegistration => "retEnvEvento",
            ServiceKind::Distribution => "retDistDFeInt",
        }
    }

    pub fn wsdl_namespace(self) -> String {
        format!("http://www.portalfiscal.inf.br/nfe/wsdl/{}", self.wsdl_name())
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wsdl_name())
    }
}

/// Caminho de roteamento: autorizador da UF ou SEFAZ Virtual de Contingência.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    #[default]
    Primary,
    Contingency,
}

/// Evento vinculado a uma NF-e já autorizada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Cancellation,
    CorrectionLetter,
}

impl EventKind {
    /// Código `tpEvento`.
    pub fn code(self) -> &'static str {
        match self {
            EventKind::Cancellation => "110111",
            EventKind::CorrectionLetter => "110110",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            EventKind::Cancellation => "Cancelamento",
            EventKind::CorrectionLetter => "Carta de Correcao",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "110111" => Some(EventKind::Cancellation),
            "110110" => Some(EventKind::CorrectionLetter),
            _ => None,
        }
    }

    /// Faixa válida de `nSeqEvento`.
    pub fn sequence_range(self) -> std::ops::RangeInclusive<u8> {
        match self {
            EventKind::Cancellation => 1..=1,
            EventKind::CorrectionLetter => 1..=20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uf_codes_round_trip_for_every_state() {
        for uf in Uf::ALL {
            assert_eq!(Uf::from_code(uf.code()), Some(uf));
            assert_eq!(uf.sigla().parse::<Uf>().unwrap(), uf);
        }
    }

    #[test]
    fn uf_parses_from_ibge_code() {
        assert_eq!("35".parse::<Uf>().unwrap(), Uf::SP);
        assert_eq!("sp".parse::<Uf>().unwrap(), Uf::SP);
        assert!(matches!("99".parse::<Uf>(), Err(NfeError::InvalidUf(_))));
        assert!(matches!("XX".parse::<Uf>(), Err(NfeError::InvalidUf(_))));
    }

    #[test]
    fn environment_maps_to_tp_amb() {
        assert_eq!(Environment::Production.tp_amb(), 1);
        assert_eq!(Environment::Homologation.tp_amb(), 2);
        assert_eq!("homologacao".parse::<Environment>().unwrap(), Environment::Homologation);
        assert_eq!(Environment::from_tp_amb("1"), Some(Environment::Production));
    }

    #[test]
    fn correction_letter_sequence_bounds() {
        let range = EventKind::CorrectionLetter.sequence_range();
        assert!(!range.contains(&0));
        assert!(range.contains(&1));
        assert!(range.contains(&20));
        assert!(!range.contains(&21));
    }
}
