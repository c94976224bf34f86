// ── XML Helpers ─────────────────────────────────────────────────
//! Escrita escapada, busca por nome local e canonicalização C14N 1.0
//! (inclusiva, sem comentários) sobre `roxmltree`.

use std::fmt::Write as _;

use roxmltree::{Document, Node};

use crate::error::{NfeError, NfeResult};

pub const NFE_NAMESPACE: &str = "http://www.portalfiscal.inf.br/nfe";
pub const DSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";

// ── Writing ─────────────────────────────────────────────────────

/// Escapa conteúdo de texto e de atributo para o XML gerado.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Acrescenta `<tag>valor</tag>` com o valor escapado.
pub fn push_tag(out: &mut String, tag: &str, value: &str) {
    let _ = write!(out, "<{tag}>{}</{tag}>", escape(value));
}

/// Como [`push_tag`], mas omite a tag quando o valor é vazio.
pub fn push_opt_tag(out: &mut String, tag: &str, value: &str) {
    if !value.is_empty() {
        push_tag(out, tag, value);
    }
}

/// Remove a declaração `<?xml ...?>` inicial, se houver.
pub fn strip_declaration(xml: &str) -> &str {
    let trimmed = xml.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return trimmed[end + 2..].trim_start();
        }
    }
    trimmed
}

// ── Reading ─────────────────────────────────────────────────────

pub fn parse(xml: &str) -> NfeResult<Document<'_>> {
    Ok(Document::parse(xml)?)
}

/// Primeiro descendente (ou o próprio nó) com o nome local dado.
pub fn find<'a, 'input>(node: Node<'a, 'input>, local_name: &str) -> Option<Node<'a, 'input>> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == local_name)
}

/// Todos os descendentes com o nome local dado, em ordem de documento.
pub fn find_all<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    local_name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.descendants()
        .filter(move |n| n.is_element() && n.tag_name().name() == local_name)
}

/// Filho direto com o nome local dado.
pub fn child<'a, 'input>(node: Node<'a, 'input>, local_name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == local_name)
}

/// Texto (aparado) do primeiro descendente com o nome dado.
pub fn text_of(node: Node<'_, '_>, local_name: &str) -> Option<String> {
    find(node, local_name).map(|n| n.text().unwrap_or_default().trim().to_string())
}

/// Texto do filho direto com o nome dado.
pub fn child_text(node: Node<'_, '_>, local_name: &str) -> Option<String> {
    child(node, local_name).map(|n| n.text().unwrap_or_default().trim().to_string())
}

/// Trecho original do documento ocupado pelo nó.
pub fn raw<'input>(xml: &'input str, node: Node<'_, 'input>) -> &'input str {
    &xml[node.range()]
}

/// Posição, em `xml`, da tag de fechamento do elemento.
pub fn closing_tag_offset(xml: &str, node: Node<'_, '_>) -> NfeResult<usize> {
    let end = node.range().end;
    xml[..end]
        .rfind("</")
        .filter(|pos| *pos >= node.range().start)
        .ok_or_else(|| NfeError::Xml(format!("<{}> sem tag de fechamento", node.tag_name().name())))
}

// ── Canonicalization ────────────────────────────────────────────

/// Forma canônica (C14N 1.0 inclusiva) do elemento e sua subárvore.
///
/// Elementos `Signature` do namespace XML-DSig dentro da subárvore são
/// omitidos, o que equivale à transformação enveloped-signature.
pub fn canonicalize(node: Node<'_, '_>) -> String {
    let mut out = String::new();
    write_canonical(node, &[], &mut out);
    out
}

type NsBinding<'a> = (&'a str, &'a str);

fn write_canonical<'a>(node: Node<'a, '_>, rendered: &[NsBinding<'a>], out: &mut String) {
    if node.is_text() {
        escape_text(node.text().unwrap_or_default(), out);
        return;
    }
    if let Some(pi) = node.pi() {
        match pi.value {
            Some(v) => {
                let _ = write!(out, "<?{} {}?>", pi.target, v);
            }
            None => {
                let _ = write!(out, "<?{}?>", pi.target);
            }
        }
        return;
    }
    if !node.is_element() {
        return;
    }

    // Namespaces em escopo, exceto `xml`, ordenados por prefixo (padrão primeiro).
    let mut in_scope: Vec<NsBinding<'a>> = node
        .namespaces()
        .filter(|ns| ns.name() != Some("xml"))
        .map(|ns| (ns.name().unwrap_or(""), ns.uri()))
        .collect();
    in_scope.sort_by(|a, b| a.0.cmp(b.0));
    in_scope.dedup_by(|a, b| a.0 == b.0);

    let qname = qualified_name(node, node.tag_name().namespace(), node.tag_name().name());
    out.push('<');
    out.push_str(&qname);

    for (prefix, uri) in &in_scope {
        let already = rendered.iter().any(|(p, u)| p == prefix && u == uri);
        if already {
            continue;
        }
        if prefix.is_empty() {
            let _ = write!(out, " xmlns=\"");
        } else {
            let _ = write!(out, " xmlns:{prefix}=\"");
        }
        escape_attr(uri, out);
        out.push('"');
    }
    let default_in_scope = in_scope.iter().any(|(p, _)| p.is_empty());
    let parent_had_default = rendered.iter().any(|(p, u)| p.is_empty() && !u.is_empty());
    if !default_in_scope && parent_had_default {
        out.push_str(" xmlns=\"\"");
    }

    let mut attrs: Vec<(&str, &str, String, &str)> = node
        .attributes()
        .map(|a| {
            let ns = a.namespace().unwrap_or("");
            (ns, a.name(), qualified_name(node, a.namespace(), a.name()), a.value())
        })
        .collect();
    attrs.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    for (_, _, name, value) in &attrs {
        let _ = write!(out, " {name}=\"");
        escape_attr(value, out);
        out.push('"');
    }
    out.push('>');

    for child in node.children() {
        if is_signature(child) {
            continue;
        }
        write_canonical(child, &in_scope, out);
    }

    let _ = write!(out, "</{qname}>");
}

fn is_signature(node: Node<'_, '_>) -> bool {
    node.is_element()
        && node.tag_name().name() == "Signature"
        && node.tag_name().namespace() == Some(DSIG_NAMESPACE)
}

fn qualified_name(node: Node<'_, '_>, namespace: Option<&str>, local: &str) -> String {
    match namespace.and_then(|uri| node.lookup_prefix(uri)) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ => local.to_string(),
    }
}

fn escape_text(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}
