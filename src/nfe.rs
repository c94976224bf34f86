// ── NFe Assembly Module ────────────────────────────────────────
//! Montagem do XML da NF-e 4.00 a partir de dados estruturados.
//!
//! Valores monetários chegam já calculados e formatados (ex.: "150.00");
//! este módulo só os posiciona no leiaute.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::access_key::{random_numeric_code, AccessKey, AccessKeyParts};
use crate::error::{NfeError, NfeResult};
use crate::model::{Environment, Uf};
use crate::response::ProtocolInfo;
use crate::signature::{sign_xml, Certificate, SignatureAlgorithm};
use crate::xml::{self, push_opt_tag, push_tag, NFE_NAMESPACE};

pub const NFE_VERSION: &str = "4.00";
pub const MAX_ITEMS: usize = 990;
pub const MAX_BATCH_DOCUMENTS: usize = 50;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct NfeAddress {
    pub logradouro: String,
    pub nro: String,
    pub complemento: String,
    pub bairro: String,
    pub codigo_municipio: String,
    pub municipio: String,
    pub uf: String,
    pub cep: String,
    pub fone: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct NfeParty {
    pub name: String,
    pub cnpj_cpf: String,
    pub ie: String,
    pub address: NfeAddress,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "tipo", rename_all = "snake_case")]
pub enum NfeIcms {
    /// CST 00: tributada integralmente.
    Normal {
        orig: String,
        mod_bc: String,
        v_bc: String,
        p_icms: String,
        v_icms: String,
    },
    /// Simples Nacional sem substituição tributária: CSOSN 101, 102, 103,
    /// 300, 400, 500 e 900. O grupo (ICMSSN101, ICMSSN102, ...) sai do CSOSN.
    SimplesNacional {
        orig: String,
        csosn: String,
        /// Alíquota do crédito (obrigatória no CSOSN 101).
        #[serde(default)]
        p_cred_sn: Option<String>,
        #[serde(default)]
        v_cred_icms_sn: Option<String>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "tipo", rename_all = "snake_case")]
pub enum NfeContribuicao {
    /// CST 01/02: alíquota sobre a base de cálculo.
    Aliquota {
        cst: String,
        v_bc: String,
        aliquota: String,
        valor: String,
    },
    /// CST 04..09: não tributada.
    NaoTributada { cst: String },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NfeImposto {
    #[serde(default)]
    pub v_tot_trib: String,
    pub icms: NfeIcms,
    pub pis: NfeContribuicao,
    pub cofins: NfeContribuicao,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NfeProduto {
    pub code: String,
    #[serde(default)]
    pub ean: String,
    pub description: String,
    pub ncm: String,
    pub cfop: String,
    pub unit: String,
    pub qty: String,
    pub unit_price: String,
    pub total: String,
    pub imposto: NfeImposto,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct NfeTotais {
    pub bc_icms: String,
    pub icms: String,
    pub bc_icms_st: String,
    pub icms_st: String,
    pub total_products: String,
    pub freight: String,
    pub insurance: String,
    pub discount: String,
    pub other: String,
    pub ipi: String,
    pub pis: String,
    pub cofins: String,
    pub total_nfe: String,
    pub v_tot_trib: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct NfeTransporte {
    /// 0..4 ou 9 (sem frete).
    pub mod_frete: String,
    pub transportadora: Option<NfeParty>,
    pub vol_qvol: String,
    pub vol_esp: String,
    pub vol_marca: String,
    pub vol_nvol: String,
    pub vol_peso_l: String,
    pub vol_peso_b: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NfeDuplicata {
    pub n_dup: String,
    pub d_venc: String,
    pub v_dup: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct NfeFatura {
    pub n_fat: String,
    pub v_orig: String,
    pub v_desc: String,
    pub v_liq: String,
    pub duplicatas: Vec<NfeDuplicata>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NfePagamento {
    /// Meio de pagamento (`tPag`): 01 dinheiro, 15 boleto, 17 PIX, 90 sem pagamento...
    pub t_pag: String,
    pub v_pag: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct NfeInfoAdicional {
    pub inf_cpl: String,
    pub inf_fisco: String,
}

/// Entrada em contingência (`dhCont`/`xJust`), obrigatória quando tpEmis != 1.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NfeContingencia {
    pub entered_at: DateTime<FixedOffset>,
    pub justification: String,
}

/// Dados de uma NF-e antes da montagem do XML.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NfeDraft {
    pub uf: Uf,
    pub environment: Environment,
    #[serde(default = "default_model")]
    pub model: u8,
    pub serie: u16,
    pub numero: u32,
    /// `cNF`; sorteado quando ausente.
    #[serde(default)]
    pub numeric_code: Option<u32>,
    pub data_emissao: DateTime<FixedOffset>,
    #[serde(default)]
    pub data_saida_entrada: Option<DateTime<FixedOffset>>,
    pub nat_op: String,
    /// 0 = entrada, 1 = saída.
    pub tipo_nf: u8,
    /// 1 = interna, 2 = interestadual, 3 = exterior.
    pub id_dest: u8,
    pub codigo_municipio_fg: String,
    #[serde(default = "default_one")]
    pub tp_imp: u8,
    #[serde(default = "default_one")]
    pub tp_emis: u8,
    #[serde(default = "default_one")]
    pub fin_nfe: u8,
    #[serde(default)]
    pub ind_final: u8,
    #[serde(default = "default_one")]
    pub ind_pres: u8,
    #[serde(default = "default_ver_proc")]
    pub ver_proc: String,
    #[serde(default)]
    pub contingencia: Option<NfeContingencia>,
    pub emitente: NfeParty,
    /// Código de Regime Tributário do emitente.
    pub crt: u8,
    #[serde(default)]
    pub destinatario: Option<NfeParty>,
    /// 1 = contribuinte, 2 = isento, 9 = não contribuinte.
    #[serde(default = "default_ind_ie_dest")]
    pub ind_ie_dest: u8,
    pub produtos: Vec<NfeProduto>,
    pub totais: NfeTotais,
    #[serde(default)]
    pub transporte: NfeTransporte,
    #[serde(default)]
    pub fatura: Option<NfeFatura>,
    pub pagamentos: Vec<NfePagamento>,
    #[serde(default)]
    pub info_adicional: NfeInfoAdicional,
}

fn default_model() -> u8 {
    55
}

fn default_one() -> u8 {
    1
}

fn default_ind_ie_dest() -> u8 {
    9
}

fn default_ver_proc() -> String {
    concat!("sefaz-nfe ", env!("CARGO_PKG_VERSION")).to_string()
}

/// XML montado, ainda sem assinatura.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledNfe {
    pub access_key: AccessKey,
    pub xml: String,
}

/// XML assinado, pronto para compor um lote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedNfe {
    pub access_key: AccessKey,
    pub xml: String,
}

// ── Assembly ────────────────────────────────────────────────────

fn fmt_datetime(dt: &DateTime<FixedOffset>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

fn or_zero(value: &str) -> &str {
    if value.is_empty() {
        "0.00"
    } else {
        value
    }
}

fn push_document(out: &mut String, doc: &str) {
    let digits: String = doc.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 {
        push_tag(out, "CPF", &digits);
    } else {
        push_tag(out, "CNPJ", &digits);
    }
}

fn push_address(out: &mut String, tag: &str, a: &NfeAddress) {
    out.push_str(&format!("<{tag}>"));
    push_tag(out, "xLgr", &a.logradouro);
    push_tag(out, "nro", &a.nro);
    push_opt_tag(out, "xCpl", &a.complemento);
    push_tag(out, "xBairro", &a.bairro);
    push_tag(out, "cMun", &a.codigo_municipio);
    push_tag(out, "xMun", &a.municipio);
    push_tag(out, "UF", &a.uf);
    push_opt_tag(out, "CEP", &a.cep.replace(['-', '.'], ""));
    push_tag(out, "cPais", "1058");
    push_tag(out, "xPais", "BRASIL");
    push_opt_tag(out, "fone", &a.fone);
    out.push_str(&format!("</{tag}>"));
}

fn push_contribuicao(out: &mut String, group: &str, c: &NfeContribuicao) {
    out.push_str(&format!("<{group}>"));
    match c {
        NfeContribuicao::Aliquota {
            cst,
            v_bc,
            aliquota,
            valor,
        } => {
            out.push_str(&format!("<{group}Aliq>"));
            push_tag(out, "CST", cst);
            push_tag(out, "vBC", v_bc);
            push_tag(out, &format!("p{group}"), aliquota);
            push_tag(out, &format!("v{group}"), valor);
            out.push_str(&format!("</{group}Aliq>"));
        }
        NfeContribuicao::NaoTributada { cst } => {
            out.push_str(&format!("<{group}NT>"));
            push_tag(out, "CST", cst);
            out.push_str(&format!("</{group}NT>"));
        }
    }
    out.push_str(&format!("</{group}>"));
}

fn push_produto(out: &mut String, n_item: usize, p: &NfeProduto) {
    let ean = if p.ean.is_empty() { "SEM GTIN" } else { p.ean.as_str() };
    out.push_str(&format!("<det nItem=\"{n_item}\"><prod>"));
    push_tag(out, "cProd", &p.code);
    push_tag(out, "cEAN", ean);
    push_tag(out, "xProd", &p.description);
    push_tag(out, "NCM", &p.ncm);
    push_tag(out, "CFOP", &p.cfop);
    push_tag(out, "uCom", &p.unit);
    push_tag(out, "qCom", &p.qty);
    push_tag(out, "vUnCom", &p.unit_price);
    push_tag(out, "vProd", &p.total);
    push_tag(out, "cEANTrib", ean);
    push_tag(out, "uTrib", &p.unit);
    push_tag(out, "qTrib", &p.qty);
    push_tag(out, "vUnTrib", &p.unit_price);
    push_tag(out, "indTot", "1");
    out.push_str("</prod><imposto>");
    push_opt_tag(out, "vTotTrib", &p.imposto.v_tot_trib);
    out.push_str("<ICMS>");
    match &p.imposto.icms {
        NfeIcms::Normal {
            orig,
            mod_bc,
            v_bc,
            p_icms,
            v_icms,
        } => {
            out.push_str("<ICMS00>");
            push_tag(out, "orig", orig);
            push_tag(out, "CST", "00");
            push_tag(out, "modBC", mod_bc);
            push_tag(out, "vBC", v_bc);
            push_tag(out, "pICMS", p_icms);
            push_tag(out, "vICMS", v_icms);
            out.push_str("</ICMS00>");
        }
        NfeIcms::SimplesNacional {
            orig,
            csosn,
            p_cred_sn,
            v_cred_icms_sn,
        } => {
            // CSOSN já conferido em `validate`
            let group = simples_group(csosn).unwrap_or("ICMSSN102");
            out.push_str(&format!("<{group}>"));
            push_tag(out, "orig", orig);
            push_tag(out, "CSOSN", csosn);
            if matches!(group, "ICMSSN101" | "ICMSSN900") {
                if let (Some(p), Some(v)) = (p_cred_sn, v_cred_icms_sn) {
                    push_tag(out, "pCredSN", p);
                    push_tag(out, "vCredICMSSN", v);
                }
            }
            out.push_str(&format!("</{group}>"));
        }
    }
    out.push_str("</ICMS>");
    push_contribuicao(out, "PIS", &p.imposto.pis);
    push_contribuicao(out, "COFINS", &p.imposto.cofins);
    out.push_str("</imposto></det>");
}

fn push_totais(out: &mut String, t: &NfeTotais) {
    out.push_str("<total><ICMSTot>");
    push_tag(out, "vBC", or_zero(&t.bc_icms));
    push_tag(out, "vICMS", or_zero(&t.icms));
    push_tag(out, "vICMSDeson", "0.00");
    push_tag(out, "vFCP", "0.00");
    push_tag(out, "vBCST", or_zero(&t.bc_icms_st));
    push_tag(out, "vST", or_zero(&t.icms_st));
    push_tag(out, "vFCPST", "0.00");
    push_tag(out, "vFCPSTRet", "0.00");
    push_tag(out, "vProd", or_zero(&t.total_products));
    push_tag(out, "vFrete", or_zero(&t.freight));
    push_tag(out, "vSeg", or_zero(&t.insurance));
    push_tag(out, "vDesc", or_zero(&t.discount));
    push_tag(out, "vII", "0.00");
    push_tag(out, "vIPI", or_zero(&t.ipi));
    push_tag(out, "vIPIDevol", "0.00");
    push_tag(out, "vPIS", or_zero(&t.pis));
    push_tag(out, "vCOFINS", or_zero(&t.cofins));
    push_tag(out, "vOutro", or_zero(&t.other));
    push_tag(out, "vNF", or_zero(&t.total_nfe));
    push_opt_tag(out, "vTotTrib", &t.v_tot_trib);
    out.push_str("</ICMSTot></total>");
}

fn push_transporte(out: &mut String, t: &NfeTransporte) {
    out.push_str("<transp>");
    push_tag(out, "modFrete", if t.mod_frete.is_empty() { "9" } else { &t.mod_frete });
    if let Some(transportadora) = &t.transportadora {
        out.push_str("<transporta>");
        push_document(out, &transportadora.cnpj_cpf);
        push_opt_tag(out, "xNome", &transportadora.name);
        push_opt_tag(out, "IE", &transportadora.ie);
        push_opt_tag(out, "xEnder", &transportadora.address.logradouro);
        push_opt_tag(out, "xMun", &transportadora.address.municipio);
        push_opt_tag(out, "UF", &transportadora.address.uf);
        out.push_str("</transporta>");
    }
    let has_volume = [&t.vol_qvol, &t.vol_esp, &t.vol_marca, &t.vol_nvol, &t.vol_peso_l, &t.vol_peso_b]
        .iter()
        .any(|v| !v.is_empty());
    if has_volume {
        out.push_str("<vol>");
        push_opt_tag(out, "qVol", &t.vol_qvol);
        push_opt_tag(out, "esp", &t.vol_esp);
        push_opt_tag(out, "marca", &t.vol_marca);
        push_opt_tag(out, "nVol", &t.vol_nvol);
        push_opt_tag(out, "pesoL", &t.vol_peso_l);
        push_opt_tag(out, "pesoB", &t.vol_peso_b);
        out.push_str("</vol>");
    }
    out.push_str("</transp>");
}

fn push_fatura(out: &mut String, f: &NfeFatura) {
    out.push_str("<cobr>");
    if !f.n_fat.is_empty() {
        out.push_str("<fat>");
        push_tag(out, "nFat", &f.n_fat);
        push_opt_tag(out, "vOrig", &f.v_orig);
        push_opt_tag(out, "vDesc", &f.v_desc);
        push_opt_tag(out, "vLiq", &f.v_liq);
        out.push_str("</fat>");
    }
    for dup in &f.duplicatas {
        out.push_str("<dup>");
        push_tag(out, "nDup", &dup.n_dup);
        push_tag(out, "dVenc", &dup.d_venc);
        push_tag(out, "vDup", &dup.v_dup);
        out.push_str("</dup>");
    }
    out.push_str("</cobr>");
}

/// Grupo de ICMS do Simples Nacional para o CSOSN. `None` para os
/// CSOSN com ST (201, 202, 203) e valores fora da tabela.
fn simples_group(csosn: &str) -> Option<&'static str> {
    match csosn {
        "101" => Some("ICMSSN101"),
        "102" | "103" | "300" | "400" => Some("ICMSSN102"),
        "500" => Some("ICMSSN500"),
        "900" => Some("ICMSSN900"),
        _ => None,
    }
}

fn validate_icms(item: usize, icms: &NfeIcms) -> NfeResult<()> {
    let NfeIcms::SimplesNacional {
        csosn,
        p_cred_sn,
        v_cred_icms_sn,
        ..
    } = icms
    else {
        return Ok(());
    };
    match simples_group(csosn) {
        None => Err(NfeError::precondition(format!(
            "item {item}: CSOSN {csosn:?} não suportado"
        ))),
        Some("ICMSSN101") if p_cred_sn.is_none() || v_cred_icms_sn.is_none() => {
            Err(NfeError::precondition(format!(
                "item {item}: CSOSN 101 exige pCredSN e vCredICMSSN"
            )))
        }
        Some(_) => Ok(()),
    }
}

fn validate(draft: &NfeDraft) -> NfeResult<()> {
    if draft.produtos.is_empty() {
        return Err(NfeError::precondition("NF-e sem itens"));
    }
    if draft.produtos.len() > MAX_ITEMS {
        return Err(NfeError::precondition(format!(
            "NF-e com {} itens; máximo {MAX_ITEMS}",
            draft.produtos.len()
        )));
    }
    for (i, p) in draft.produtos.iter().enumerate() {
        validate_icms(i + 1, &p.imposto.icms)?;
    }
    if draft.nat_op.trim().is_empty() {
        return Err(NfeError::precondition("natureza da operação vazia"));
    }
    if draft.pagamentos.is_empty() {
        return Err(NfeError::precondition("grupo de pagamento vazio (use tPag 90 para sem pagamento)"));
    }
    if draft.tp_emis != 1 && draft.contingencia.is_none() {
        return Err(NfeError::precondition(format!(
            "tpEmis {} exige data e justificativa de contingência",
            draft.tp_emis
        )));
    }
    if let Some(c) = &draft.contingencia {
        let len = c.justification.chars().count();
        if !(15..=256).contains(&len) {
            return Err(NfeError::precondition("justificativa de contingência deve ter de 15 a 256 caracteres"));
        }
    }
    Ok(())
}

/// Monta o `<NFe>` e calcula a chave de acesso.
pub fn assemble(draft: &NfeDraft) -> NfeResult<AssembledNfe> {
    validate(draft)?;

    let numeric_code = draft
        .numeric_code
        .unwrap_or_else(|| random_numeric_code(draft.numero));
    let access_key = AccessKey::compute(&AccessKeyParts {
        uf: draft.uf,
        emission_date: draft.data_emissao.date_naive(),
        emitter_document: draft.emitente.cnpj_cpf.clone(),
        model: draft.model,
        series: draft.serie,
        number: draft.numero,
        tp_emis: draft.tp_emis,
        numeric_code,
    })?;

    let mut out = String::with_capacity(4096 + draft.produtos.len() * 1024);
    out.push_str(&format!(
        "<NFe xmlns=\"{NFE_NAMESPACE}\"><infNFe versao=\"{NFE_VERSION}\" Id=\"{}\">",
        access_key.id()
    ));

    // ide
    out.push_str("<ide>");
    push_tag(&mut out, "cUF", &draft.uf.code().to_string());
    push_tag(&mut out, "cNF", &format!("{numeric_code:08}"));
    push_tag(&mut out, "natOp", &draft.nat_op);
    push_tag(&mut out, "mod", &draft.model.to_string());
    push_tag(&mut out, "serie", &draft.serie.to_string());
    push_tag(&mut out, "nNF", &draft.numero.to_string());
    push_tag(&mut out, "dhEmi", &fmt_datetime(&draft.data_emissao));
    if let Some(saida) = &draft.data_saida_entrada {
        push_tag(&mut out, "dhSaiEnt", &fmt_datetime(saida));
    }
    push_tag(&mut out, "tpNF", &draft.tipo_nf.to_string());
    push_tag(&mut out, "idDest", &draft.id_dest.to_string());
    push_tag(&mut out, "cMunFG", &draft.codigo_municipio_fg);
    push_tag(&mut out, "tpImp", &draft.tp_imp.to_string());
    push_tag(&mut out, "tpEmis", &draft.tp_emis.to_string());
    push_tag(&mut out, "cDV", &access_key.check_digit().to_string());
    push_tag(&mut out, "tpAmb", &draft.environment.tp_amb().to_string());
    push_tag(&mut out, "finNFe", &draft.fin_nfe.to_string());
    push_tag(&mut out, "indFinal", &draft.ind_final.to_string());
    push_tag(&mut out, "indPres", &draft.ind_pres.to_string());
    push_tag(&mut out, "procEmi", "0");
    push_tag(&mut out, "verProc", &draft.ver_proc);
    if let Some(c) = &draft.contingencia {
        push_tag(&mut out, "dhCont", &fmt_datetime(&c.entered_at));
        push_tag(&mut out, "xJust", &c.justification);
    }
    out.push_str("</ide>");

    // emit
    out.push_str("<emit>");
    push_document(&mut out, &draft.emitente.cnpj_cpf);
    push_tag(&mut out, "xNome", &draft.emitente.name);
    push_address(&mut out, "enderEmit", &draft.emitente.address);
    push_tag(&mut out, "IE", &draft.emitente.ie);
    push_tag(&mut out, "CRT", &draft.crt.to_string());
    out.push_str("</emit>");

    // dest
    if let Some(dest) = &draft.destinatario {
        out.push_str("<dest>");
        push_document(&mut out, &dest.cnpj_cpf);
        let nome = if draft.environment == Environment::Homologation {
            "NF-E EMITIDA EM AMBIENTE DE HOMOLOGACAO - SEM VALOR FISCAL"
        } else {
            dest.name.as_str()
        };
        push_tag(&mut out, "xNome", nome);
        push_address(&mut out, "enderDest", &dest.address);
        push_tag(&mut out, "indIEDest", &draft.ind_ie_dest.to_string());
        if draft.ind_ie_dest == 1 {
            push_opt_tag(&mut out, "IE", &dest.ie);
        }
        out.push_str("</dest>");
    }

    for (i, produto) in draft.produtos.iter().enumerate() {
        push_produto(&mut out, i + 1, produto);
    }
    push_totais(&mut out, &draft.totais);
    push_transporte(&mut out, &draft.transporte);
    if let Some(fatura) = &draft.fatura {
        push_fatura(&mut out, fatura);
    }

    out.push_str("<pag>");
    for pagamento in &draft.pagamentos {
        out.push_str("<detPag>");
        push_tag(&mut out, "tPag", &pagamento.t_pag);
        push_tag(&mut out, "vPag", &pagamento.v_pag);
        out.push_str("</detPag>");
    }
    out.push_str("</pag>");

    let info = &draft.info_adicional;
    if !info.inf_cpl.is_empty() || !info.inf_fisco.is_empty() {
        out.push_str("<infAdic>");
        push_opt_tag(&mut out, "infAdFisco", &info.inf_fisco);
        push_opt_tag(&mut out, "infCpl", &info.inf_cpl);
        out.push_str("</infAdic>");
    }

    out.push_str("</infNFe></NFe>");

    tracing::debug!(chave = %access_key, itens = draft.produtos.len(), "NF-e montada");
    Ok(AssembledNfe { access_key, xml: out })
}

/// Assina o `infNFe` do documento montado.
pub fn sign_nfe(
    nfe: &AssembledNfe,
    certificate: &Certificate,
    algorithm: SignatureAlgorithm,
) -> NfeResult<SignedNfe> {
    Ok(SignedNfe {
        access_key: nfe.access_key.clone(),
        xml: sign_xml(&nfe.xml, "infNFe", certificate, algorithm)?,
    })
}

/// Chave de acesso declarada no `Id` do `infNFe`.
pub fn access_key_of(nfe_xml: &str) -> NfeResult<AccessKey> {
    let doc = xml::parse(xml::strip_declaration(nfe_xml))?;
    let inf = xml::find(doc.root_element(), "infNFe")
        .ok_or_else(|| NfeError::Xml("<infNFe> não encontrado".into()))?;
    let id = inf.attribute("Id").unwrap_or_default();
    AccessKey::parse(id.trim_start_matches("NFe"))
}

/// Monta o `<enviNFe>` com os documentos assinados.
///
/// O modo síncrono (`indSinc=1`) só aceita um documento por lote.
pub fn build_batch(batch_id: &str, synchronous: bool, signed_docs: &[&str]) -> NfeResult<String> {
    if batch_id.is_empty() || batch_id.len() > 15 || !batch_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(NfeError::precondition("idLote deve ter de 1 a 15 dígitos"));
    }
    if signed_docs.is_empty() || signed_docs.len() > MAX_BATCH_DOCUMENTS {
        return Err(NfeError::precondition(format!(
            "lote deve conter de 1 a {MAX_BATCH_DOCUMENTS} NF-e"
        )));
    }
    if synchronous && signed_docs.len() != 1 {
        return Err(NfeError::precondition("envio síncrono aceita apenas uma NF-e por lote"));
    }

    let mut out = format!(
        "<enviNFe xmlns=\"{NFE_NAMESPACE}\" versao=\"{NFE_VERSION}\"><idLote>{batch_id}</idLote><indSinc>{}</indSinc>",
        u8::from(synchronous)
    );
    for doc in signed_docs {
        let doc = xml::strip_declaration(doc);
        if !doc.starts_with("<NFe") || !doc.contains("<Signature") {
            return Err(NfeError::precondition("documento do lote não é uma NF-e assinada"));
        }
        out.push_str(doc);
    }
    out.push_str("</enviNFe>");
    Ok(out)
}

/// Junta NF-e assinada e protocolo de autorização no `<nfeProc>`.
pub fn attach_protocol(signed_nfe: &str, protocol: &ProtocolInfo) -> NfeResult<String> {
    if !protocol.status.is_authorized() && !protocol.status.is_denied() {
        return Err(NfeError::precondition(format!(
            "protocolo com cStat {} não autoriza a NF-e",
            protocol.status
        )));
    }
    let key = access_key_of(signed_nfe)?;
    if protocol.access_key.as_deref() != Some(key.as_str()) {
        return Err(NfeError::precondition(format!(
            "protocolo pertence a outra chave ({})",
            protocol.access_key.as_deref().unwrap_or("sem chave")
        )));
    }
    if protocol.raw_xml.is_empty() {
        return Err(NfeError::precondition("protocolo sem XML original"));
    }
    Ok(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><nfeProc xmlns=\"{NFE_NAMESPACE}\" versao=\"{NFE_VERSION}\">{}{}</nfeProc>",
        xml::strip_declaration(signed_nfe),
        protocol.raw_xml
    ))
}
