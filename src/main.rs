use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use sefaz_nfe::event::build_event_batch;
use sefaz_nfe::{
    assemble, sign_nfe, AccessKey, Certificate, ClientConfig, Environment, EventKind, EventRequest,
    NfeDraft, NfeError, NfeResult, NfeService, PollOutcome, Route, SubmissionResult, Uf,
};

/// Cliente de linha de comando dos webservices de NF-e.
#[derive(Parser, Debug)]
#[command(name = "sefaz-nfe", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// UF do autorizador (sigla ou código IBGE)
    #[arg(long, global = true, env = "SEFAZ_UF", default_value = "SP")]
    uf: Uf,

    /// Ambiente: 1/producao ou 2/homologacao
    #[arg(long = "env", global = true, env = "SEFAZ_ENV", default_value = "homologacao")]
    environment: Environment,

    /// Rota: autorizador normal, SVC ou escolha pelo status do serviço
    #[arg(long, global = true, value_enum, default_value_t = RouteArg::Primary)]
    route: RouteArg,

    /// Certificado A1 (.pfx/.p12)
    #[arg(long, global = true, env = "SEFAZ_PFX")]
    pfx: Option<PathBuf>,

    /// Senha do certificado
    #[arg(long, global = true, env = "SEFAZ_PFX_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Configuração JSON; sem ela, lê as variáveis SEFAZ_*
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RouteArg {
    Primary,
    Contingency,
    Auto,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Status do serviço de autorização
    Status,
    /// Envia NF-e assinada (ou lote enviNFe) para autorização
    Submit {
        xml: PathBuf,
        /// Consulta o recibo até o resultado final
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
    /// Consulta o recibo de um lote
    Poll {
        receipt: String,
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
    /// Consulta a situação da NF-e pela chave
    Query { access_key: String },
    /// Cancela uma NF-e autorizada
    Cancel(CancelArgs),
    /// Registra carta de correção
    Cce(CceArgs),
    /// Busca o XML da NF-e no Ambiente Nacional
    Distribution {
        access_key: String,
        /// CNPJ interessado; padrão: o do certificado
        #[arg(long)]
        cnpj: Option<String>,
    },
    /// Monta e assina uma NF-e a partir de um rascunho JSON
    Sign {
        draft: PathBuf,
        /// Arquivo de saída; padrão: <chave>-nfe.xml
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Decompõe e valida uma chave de acesso
    Key { access_key: String },
}

#[derive(Args, Debug)]
struct CancelArgs {
    access_key: String,
    /// Protocolo de autorização (nProt)
    #[arg(long)]
    protocol: String,
    /// Justificativa (15 a 255 caracteres)
    #[arg(long)]
    justification: String,
    #[arg(long)]
    cnpj: Option<String>,
}

#[derive(Args, Debug)]
struct CceArgs {
    access_key: String,
    /// nSeqEvento (1 a 20)
    #[arg(long)]
    sequence: u8,
    /// Texto da correção (15 a 1000 caracteres)
    #[arg(long)]
    correction: String,
    #[arg(long)]
    cnpj: Option<String>,
}

#[derive(Serialize)]
struct KeyInfo<'a> {
    access_key: &'a str,
    uf: Uf,
    year: u8,
    month: u8,
    emitter_document: &'a str,
    model: u8,
    series: u16,
    number: u32,
    tp_emis: u8,
    numeric_code: u32,
    check_digit: u8,
}

#[derive(Serialize)]
struct SignedOutput {
    access_key: String,
    path: PathBuf,
    valid_signature: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()).await {
        eprintln!("[ERRO] {err}");
        let code = match err.category() {
            sefaz_nfe::ErrorCategory::Transport | sefaz_nfe::ErrorCategory::Http => 2,
            sefaz_nfe::ErrorCategory::Parse => 3,
            sefaz_nfe::ErrorCategory::Local => 1,
        };
        process::exit(code);
    }
}

fn print_json<T: Serialize>(value: &T) -> NfeResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> NfeResult<ClientConfig> {
    match path {
        Some(path) => ClientConfig::from_json(&fs::read_to_string(path)?),
        None => ClientConfig::from_env(),
    }
}

fn load_certificate(cli: &Cli) -> NfeResult<Certificate> {
    let pfx = cli
        .pfx
        .as_deref()
        .ok_or_else(|| NfeError::Config("informe --pfx ou SEFAZ_PFX".into()))?;
    let password = cli
        .password
        .as_deref()
        .ok_or_else(|| NfeError::Config("informe --password ou SEFAZ_PFX_PASSWORD".into()))?;
    Certificate::from_pkcs12_file(pfx, password)
}

fn author_document(cnpj: Option<&str>, certificate: &Certificate) -> NfeResult<String> {
    cnpj.map(str::to_string)
        .or_else(|| certificate.cnpj())
        .ok_or_else(|| NfeError::Config("informe --cnpj: certificado sem CNPJ no titular".into()))
}

async fn resolve_route(cli: &Cli, service: &NfeService) -> NfeResult<Route> {
    match cli.route {
        RouteArg::Primary => Ok(Route::Primary),
        RouteArg::Contingency => Ok(Route::Contingency),
        RouteArg::Auto => service.select_route(cli.uf, cli.environment, None).await,
    }
}

async fn run(cli: Cli) -> NfeResult<()> {
    // Subcomandos locais, sem certificado nem rede
    if let Command::Key { access_key } = &cli.command {
        let key = AccessKey::parse(access_key.trim())?;
        let (year, month) = key.year_month();
        return print_json(&KeyInfo {
            access_key: key.as_str(),
            uf: key.uf(),
            year,
            month,
            emitter_document: key.emitter_document(),
            model: key.model(),
            series: key.series(),
            number: key.number(),
            tp_emis: key.tp_emis(),
            numeric_code: key.numeric_code(),
            check_digit: key.check_digit(),
        });
    }

    let config = load_config(cli.config.as_deref())?;
    let certificate = load_certificate(&cli)?;

    if let Command::Sign { draft, out } = &cli.command {
        let draft: NfeDraft = serde_json::from_str(&fs::read_to_string(draft)?)?;
        let signed = sign_nfe(&assemble(&draft)?, &certificate, config.signature_algorithm)?;
        let path = out
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}-nfe.xml", signed.access_key)));
        fs::write(&path, &signed.xml)?;
        return print_json(&SignedOutput {
            access_key: signed.access_key.to_string(),
            path,
            valid_signature: sefaz_nfe::verify_xml(&signed.xml)?.is_valid(),
        });
    }

    let algorithm = config.signature_algorithm;
    let service = NfeService::new(config, certificate)?;
    let (uf, env) = (cli.uf, cli.environment);

    match &cli.command {
        Command::Status => {
            let route = resolve_route(&cli, &service).await?;
            print_json(&service.query_service_status(uf, env, route, None).await?)
        }
        Command::Submit { xml, wait } => {
            let route = resolve_route(&cli, &service).await?;
            let signed = fs::read_to_string(xml)?;
            let result = service
                .submit_for_authorization(&signed, uf, env, route, None)
                .await?;
            match (&result, *wait) {
                (
                    SubmissionResult::Pending {
                        receipt,
                        average_time_secs,
                        ..
                    },
                    true,
                ) => {
                    let outcome = service
                        .poll_until_final(receipt, uf, env, route, *average_time_secs, None)
                        .await?;
                    print_json(&outcome)
                }
                _ => print_json(&result),
            }
        }
        Command::Poll { receipt, wait } => {
            let route = resolve_route(&cli, &service).await?;
            if *wait {
                let outcome: PollOutcome = service
                    .poll_until_final(receipt, uf, env, route, None, None)
                    .await?;
                print_json(&outcome)
            } else {
                print_json(&service.poll_receipt(receipt, uf, env, route, None).await?)
            }
        }
        Command::Query { access_key } => {
            let route = resolve_route(&cli, &service).await?;
            print_json(&service.query_protocol(access_key, uf, env, route, None).await?)
        }
        Command::Cancel(args) => {
            let route = resolve_route(&cli, &service).await?;
            let request = EventRequest::cancellation(
                AccessKey::parse(args.access_key.trim())?,
                author_document(args.cnpj.as_deref(), service.certificate())?,
                env,
                args.protocol.trim(),
                args.justification.as_str(),
                chrono::Local::now().fixed_offset(),
            );
            let signed = request.sign(service.certificate(), algorithm)?;
            let result = service
                .register_event(&signed, EventKind::Cancellation, uf, env, route, None)
                .await?;
            print_json(&result)
        }
        Command::Cce(args) => {
            let route = resolve_route(&cli, &service).await?;
            let request = EventRequest::correction_letter(
                AccessKey::parse(args.access_key.trim())?,
                author_document(args.cnpj.as_deref(), service.certificate())?,
                env,
                args.sequence,
                args.correction.as_str(),
                chrono::Local::now().fixed_offset(),
            );
            let signed = request.sign(service.certificate(), algorithm)?;
            let batch = build_event_batch(&args.sequence.to_string(), &[&signed])?;
            let result = service
                .register_event(&batch, EventKind::CorrectionLetter, uf, env, route, None)
                .await?;
            print_json(&result)
        }
        Command::Distribution { access_key, cnpj } => {
            let response = service
                .query_distribution(access_key, cnpj.as_deref(), uf, env, None)
                .await?;
            if let Some(doc) = response.preferred_document() {
                tracing::info!(nsu = %doc.nsu, schema = %doc.schema, "documento localizado");
            }
            print_json(&response)
        }
        Command::Key { .. } | Command::Sign { .. } => Ok(()),
    }
}
