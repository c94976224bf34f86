//! Cliente dos webservices de NF-e da SEFAZ.
//!
//! Monta e assina o XML da NF-e e de seus eventos, resolve o endpoint de
//! cada UF/ambiente, transmite por SOAP 1.2 com TLS mútuo e interpreta os
//! retornos (`cStat`/`xMotivo`) como resultados tipados.
//!
//! ```no_run
//! # async fn exemplo() -> sefaz_nfe::NfeResult<()> {
//! use sefaz_nfe::{Certificate, ClientConfig, Environment, NfeService, Route, Uf};
//!
//! let certificate = Certificate::from_pkcs12_file("empresa.pfx", "senha")?;
//! let service = NfeService::new(ClientConfig::from_env()?, certificate)?;
//! let status = service
//!     .query_service_status(Uf::SP, Environment::Homologation, Route::Primary, None)
//!     .await?;
//! println!("{} - {}", status.code, status.reason);
//! # Ok(())
//! # }
//! ```

pub mod access_key;
pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod model;
pub mod nfe;
pub mod registry;
pub mod response;
pub mod scheduler;
pub mod service;
pub mod signature;
pub mod soap;
pub mod status;
pub mod xml;

pub use access_key::{AccessKey, AccessKeyParts};
pub use cancel::CancelToken;
pub use config::ClientConfig;
pub use error::{ErrorCategory, NfeError, NfeResult};
pub use event::{EventDetail, EventRequest};
pub use lifecycle::{DocumentState, NfeDocument};
pub use model::{Environment, EventKind, Route, ServiceKind, Uf};
pub use nfe::{assemble, attach_protocol, build_batch, sign_nfe, AssembledNfe, NfeDraft, SignedNfe};
pub use registry::{resolve, resolve_route, Authorizer, WebserviceDescriptor};
pub use response::{extract_status, ServiceResponse};
pub use scheduler::{poll_until_final, PollOutcome, PollPolicy, ReceiptPoller};
pub use service::{
    DocumentStatus, EventResult, NfeService, ServiceAvailability, SubmissionResult,
};
pub use signature::{sign_xml, verify_xml, Certificate, SignatureAlgorithm};
pub use soap::{HttpTransport, RawResponse, SoapRequest, SoapTransport};
pub use status::{is_awaiting_query, StatusCategory, StatusCode};
