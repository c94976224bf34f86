// ── Webservice Registry ─────────────────────────────────────────
//! Tabela estática (UF, ambiente, serviço, rota) → endpoint + SOAP action.
//!
//! Cada UF é atendida por um autorizador (a própria SEFAZ, a SVRS ou a
//! SVAN) e possui uma SEFAZ Virtual de Contingência (SVC-AN ou SVC-RS).
//! A tabela apenas expõe o destino de contingência; a decisão de usá-lo
//! fica com [`crate::NfeService::select_route`].

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::Serialize;

use crate::model::{Environment, Route, ServiceKind, Uf};

/// Infraestrutura que processa as requisições de uma UF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Authorizer {
    AM,
    BA,
    GO,
    MG,
    MS,
    MT,
    PE,
    PR,
    RS,
    SP,
    /// SEFAZ Virtual do Ambiente Nacional.
    SVAN,
    /// SEFAZ Virtual do Rio Grande do Sul.
    SVRS,
    /// Contingência do Ambiente Nacional (tpEmis 6).
    SvcAn,
    /// Contingência do Rio Grande do Sul (tpEmis 7).
    SvcRs,
    /// Ambiente Nacional (distribuição de DF-e).
    AN,
}

impl Authorizer {
    pub fn is_contingency(self) -> bool {
        matches!(self, Authorizer::SvcAn | Authorizer::SvcRs)
    }

    /// `tpEmis` a usar na chave de acesso quando emitindo por esta rota.
    pub fn tp_emis(self) -> u8 {
        match self {
            Authorizer::SvcAn => 6,
            Authorizer::SvcRs => 7,
            _ => 1,
        }
    }

    fn host(self, environment: Environment) -> &'static str {
        use Environment::{Homologation as H, Production as P};
        match (self, environment) {
            (Authorizer::AM, P) => "https://nfe.sefaz.am.gov.br",
            (Authorizer::AM, H) => "https://homnfe.sefaz.am.gov.br",
            (Authorizer::BA, P) => "https://nfe.sefaz.ba.gov.br",
            (Authorizer::BA, H) => "https://hnfe.sefaz.ba.gov.br",
            (Authorizer::GO, P) => "https://nfe.sefaz.go.gov.br",
            (Authorizer::GO, H) => "https://homolog.sefaz.go.gov.br",
            (Authorizer::MG, P) => "https://nfe.fazenda.mg.gov.br",
            (Authorizer::MG, H) => "https://hnfe.fazenda.mg.gov.br",
            (Authorizer::MS, P) => "https://nfe.sefaz.ms.gov.br",
            (Authorizer::MS, H) => "https://hom.nfe.sefaz.ms.gov.br",
            (Authorizer::MT, P) => "https://nfe.sefaz.mt.gov.br",
            (Authorizer::MT, H) => "https://homologacao.sefaz.mt.gov.br",
            (Authorizer::PE, P) => "https://nfe.sefaz.pe.gov.br",
            (Authorizer::PE, H) => "https://nfehomolog.sefaz.pe.gov.br",
            (Authorizer::PR, P) => "https://nfe.sefa.pr.gov.br",
            (Authorizer::PR, H) => "https://homologacao.nfe.sefa.pr.gov.br",
            (Authorizer::RS, P) => "https://nfe.sefazrs.rs.gov.br",
            (Authorizer::RS, H) => "https://nfe-homologacao.sefazrs.rs.gov.br",
            (Authorizer::SP, P) => "https://nfe.fazenda.sp.gov.br",
            (Authorizer::SP, H) => "https://homologacao.nfe.fazenda.sp.gov.br",
            (Authorizer::SVAN, P) => "https://www.sefazvirtual.fazenda.gov.br",
            (Authorizer::SVAN, H) => "https://hom.sefazvirtual.fazenda.gov.br",
            (Authorizer::SVRS | Authorizer::SvcRs, P) => "https://nfe.svrs.rs.gov.br",
            (Authorizer::SVRS | Authorizer::SvcRs, H) => "https://nfe-homologacao.svrs.rs.gov.br",
            (Authorizer::SvcAn, P) => "https://www.svc.fazenda.gov.br",
            (Authorizer::SvcAn, H) => "https://hom.svc.fazenda.gov.br",
            (Authorizer::AN, P) => "https://www1.nfe.fazenda.gov.br",
            (Authorizer::AN, H) => "https://hom1.nfe.fazenda.gov.br",
        }
    }

    /// Caminho do serviço no host do autorizador. `None` quando o
    /// autorizador não oferece o serviço.
    fn path(self, kind: ServiceKind) -> Option<String> {
        if kind == ServiceKind::Distribution {
            return (self == Authorizer::AN)
                .then(|| "/NFeDistribuicaoDFe/NFeDistribuicaoDFe.asmx".to_string());
        }
        let name = kind.wsdl_name();
        let path = match self {
            Authorizer::AN => return None,
            Authorizer::SP => format!("/ws/{}.asmx", name.to_ascii_lowercase()),
            Authorizer::SVRS | Authorizer::SvcRs | Authorizer::RS => {
                let p = match kind {
                    ServiceKind::Authorization => "/ws/NfeAutorizacao/NFeAutorizacao4.asmx",
                    ServiceKind::ReceiptQuery => "/ws/NfeRetAutorizacao/NFeRetAutorizacao4.asmx",
                    ServiceKind::ProtocolQuery => "/ws/NfeConsulta/NfeConsulta4.asmx",
                    ServiceKind::ServiceStatus => "/ws/NfeStatusServico/NfeStatusServico4.asmx",
                    ServiceKind::EventRegistration => "/ws/recepcaoevento/recepcaoevento4.asmx",
                    ServiceKind::Distribution => return None,
                };
                p.to_string()
            }
            Authorizer::SVAN | Authorizer::SvcAn => format!("/{name}/{name}.asmx"),
            Authorizer::BA => format!("/webservices/{name}/{name}.asmx"),
            Authorizer::MG => format!("/nfe2/services/{name}"),
            Authorizer::PR => format!("/nfe/{name}"),
            Authorizer::GO => format!("/nfe/services/{name}"),
            Authorizer::MS => format!("/ws/{name}"),
            Authorizer::PE => format!("/nfe-service/services/{name}"),
            Authorizer::MT | Authorizer::AM => {
                let prefix = if self == Authorizer::MT {
                    "/nfews/v2/services"
                } else {
                    "/services2/services"
                };
                let service = match kind {
                    ServiceKind::Authorization => "NfeAutorizacao4",
                    ServiceKind::ReceiptQuery => "NfeRetAutorizacao4",
                    ServiceKind::ProtocolQuery => "NfeConsulta4",
                    ServiceKind::ServiceStatus => "NfeStatusServico4",
                    ServiceKind::EventRegistration => "RecepcaoEvento4",
                    ServiceKind::Distribution => return None,
                };
                format!("{prefix}/{service}")
            }
        };
        Some(path)
    }
}

/// Autorizador normal da UF.
pub fn authorizer_for(uf: Uf) -> Authorizer {
    match uf {
        Uf::AM => Authorizer::AM,
        Uf::BA => Authorizer::BA,
        Uf::GO => Authorizer::GO,
        Uf::MG => Authorizer::MG,
        Uf::MS => Authorizer::MS,
        Uf::MT => Authorizer::MT,
        Uf::PE => Authorizer::PE,
        Uf::PR => Authorizer::PR,
        Uf::RS => Authorizer::RS,
        Uf::SP => Authorizer::SP,
        Uf::MA => Authorizer::SVAN,
        Uf::AC
        | Uf::AL
        | Uf::AP
        | Uf::CE
        | Uf::DF
        | Uf::ES
        | Uf::PA
        | Uf::PB
        | Uf::PI
        | Uf::RJ
        | Uf::RN
        | Uf::RO
        | Uf::RR
        | Uf::SC
        | Uf::SE
        | Uf::TO => Authorizer::SVRS,
    }
}

/// SEFAZ Virtual de Contingência designada para a UF.
pub fn contingency_for(uf: Uf) -> Authorizer {
    match uf {
        Uf::AM
        | Uf::BA
        | Uf::CE
        | Uf::GO
        | Uf::MA
        | Uf::MS
        | Uf::MT
        | Uf::PA
        | Uf::PE
        | Uf::PI
        | Uf::PR => Authorizer::SvcRs,
        _ => Authorizer::SvcAn,
    }
}

/// Parâmetros de conexão de um serviço.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebserviceDescriptor {
    pub authorizer: Authorizer,
    pub service: ServiceKind,
    pub endpoint_url: String,
    pub soap_action: String,
}

type RegistryKey = (Uf, Environment, ServiceKind, Route);

static REGISTRY: LazyLock<HashMap<RegistryKey, WebserviceDescriptor>> = LazyLock::new(|| {
    let mut table = HashMap::new();
    for uf in Uf::ALL {
        for environment in Environment::ALL {
            for service in ServiceKind::ALL {
                for route in [Route::Primary, Route::Contingency] {
                    let authorizer = match (service, route) {
                        (ServiceKind::Distribution, _) => Authorizer::AN,
                        (_, Route::Primary) => authorizer_for(uf),
                        (_, Route::Contingency) => contingency_for(uf),
                    };
                    if let Some(path) = authorizer.path(service) {
                        table.insert(
                            (uf, environment, service, route),
                            WebserviceDescriptor {
                                authorizer,
                                service,
                                endpoint_url: format!("{}{}", authorizer.host(environment), path),
                                soap_action: format!(
                                    "{}/{}",
                                    service.wsdl_namespace(),
                                    service.operation()
                                ),
                            },
                        );
                    }
                }
            }
        }
    }
    table
});

/// Resolve o serviço pelo autorizador normal da UF.
pub fn resolve(uf: Uf, environment: Environment, service: ServiceKind) -> &'static WebserviceDescriptor {
    resolve_route(uf, environment, service, Route::Primary)
}

/// Resolve o serviço pela rota indicada.
pub fn resolve_route(
    uf: Uf,
    environment: Environment,
    service: ServiceKind,
    route: Route,
) -> &'static WebserviceDescriptor {
    // A tabela é total sobre os enums; a ausência de uma entrada é bug.
    &REGISTRY[&(uf, environment, service, route)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn every_combination_resolves() {
        for uf in Uf::ALL {
            for env in Environment::ALL {
                for kind in ServiceKind::ALL {
                    for route in [Route::Primary, Route::Contingency] {
                        let a = resolve_route(uf, env, kind, route);
                        let b = resolve_route(uf, env, kind, route);
                        assert!(a.endpoint_url.starts_with("https://"), "{uf} {env} {kind}");
                        assert!(!a.soap_action.is_empty());
                        assert_eq!(a, b);
                    }
                }
            }
        }
    }

    #[test]
    fn sao_paulo_authorization() {
        let d = resolve(Uf::SP, Environment::Homologation, ServiceKind::Authorization);
        assert_eq!(
            d.endpoint_url,
            "https://homologacao.nfe.fazenda.sp.gov.br/ws/nfeautorizacao4.asmx"
        );
        assert_eq!(
            d.soap_action,
            "http://www.portalfiscal.inf.br/nfe/wsdl/NFeAutorizacao4/nfeAutorizacaoLote"
        );
    }

    #[test]
    fn virtual_authorizers() {
        assert_eq!(authorizer_for(Uf::MA), Authorizer::SVAN);
        assert_eq!(authorizer_for(Uf::SC), Authorizer::SVRS);
        let d = resolve(Uf::SC, Environment::Production, ServiceKind::ServiceStatus);
        assert!(d.endpoint_url.starts_with("https://nfe.svrs.rs.gov.br"));
    }

    #[test]
    fn contingency_targets() {
        assert_eq!(contingency_for(Uf::SP), Authorizer::SvcAn);
        assert_eq!(contingency_for(Uf::PR), Authorizer::SvcRs);
        let d = resolve_route(
            Uf::SP,
            Environment::Production,
            ServiceKind::Authorization,
            Route::Contingency,
        );
        assert_eq!(d.authorizer, Authorizer::SvcAn);
        assert_eq!(d.authorizer.tp_emis(), 6);
        assert!(d.endpoint_url.contains("svc.fazenda.gov.br"));
    }

    #[test]
    fn distribution_is_national() {
        for uf in [Uf::SP, Uf::AM, Uf::RS] {
            let d = resolve(uf, Environment::Production, ServiceKind::Distribution);
            assert_eq!(d.authorizer, Authorizer::AN);
            assert_eq!(
                d.endpoint_url,
                "https://www1.nfe.fazenda.gov.br/NFeDistribuicaoDFe/NFeDistribuicaoDFe.asmx"
            );
        }
    }

    proptest! {
        #[test]
        fn lookups_are_deterministic(
            uf in prop::sample::select(Uf::ALL.to_vec()),
            env in prop::sample::select(Environment::ALL.to_vec()),
            kind in prop::sample::select(ServiceKind::ALL.to_vec()),
            contingency in any::<bool>(),
        ) {
            let route = if contingency { Route::Contingency } else { Route::Primary };
            let first = resolve_route(uf, env, kind, route);
            let again = resolve_route(uf, env, kind, route);
            prop_assert!(std::ptr::eq(first, again));
            prop_assert!(!first.endpoint_url.is_empty());
            prop_assert!(!first.soap_action.is_empty());
            if kind == ServiceKind::Distribution {
                prop_assert_eq!(first.authorizer, Authorizer::AN);
            }
        }
    }
}
