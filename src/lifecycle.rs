// ── Document Lifecycle ──────────────────────────────────────────
use std::fmt;

use serde::Serialize;

use crate::access_key::AccessKey;
use crate::error::{NfeError, NfeResult};
use crate::model::EventKind;

/// Estados de uma NF-e do rascunho ao registro de eventos.
///
/// ```text
/// Drafted -> Signed -> Submitted -> {Authorized | Rejected | Denied | Fault}
/// Authorized -> {Cancelled, Amended}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentState {
    Drafted,
    Signed,
    Submitted,
    Authorized,
    Rejected,
    Denied,
    Fault,
    Cancelled,
    Amended,
}

impl DocumentState {
    pub fn can_transition_to(self, next: DocumentState) -> bool {
        use DocumentState::*;
        matches!(
            (self, next),
            (Drafted, Signed)
                | (Signed, Submitted)
                | (Submitted, Authorized | Rejected | Denied | Fault)
                // falha de transporte: reenvio do mesmo lote
                | (Fault, Submitted)
                // rejeição: corrigir, reassinar e reenviar
                | (Rejected, Signed)
                | (Authorized, Cancelled | Amended)
                // várias CC-e sobre a mesma nota
                | (Amended, Amended | Cancelled)
        )
    }

    /// Estados a partir dos quais a SEFAZ não muda mais a situação da nota
    /// sem um evento novo.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            DocumentState::Authorized
                | DocumentState::Denied
                | DocumentState::Cancelled
                | DocumentState::Amended
        )
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Acompanha uma NF-e pelo ciclo de vida, recusando transições inválidas.
#[derive(Debug, Clone, Serialize)]
pub struct NfeDocument {
    access_key: AccessKey,
    state: DocumentState,
    protocol: Option<String>,
    receipt: Option<String>,
    last_status: Option<(u16, String)>,
    correction_sequence: u8,
}

impl NfeDocument {
    pub fn new(access_key: AccessKey) -> Self {
        Self {
            access_key,
            state: DocumentState::Drafted,
            protocol: None,
            receipt: None,
            last_status: None,
            correction_sequence: 0,
        }
    }

    pub fn access_key(&self) -> &AccessKey {
        &self.access_key
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn receipt(&self) -> Option<&str> {
        self.receipt.as_deref()
    }

    pub fn last_status(&self) -> Option<(u16, &str)> {
        self.last_status.as_ref().map(|(c, r)| (*c, r.as_str()))
    }

    /// Próximo `nSeqEvento` de carta de correção.
    pub fn next_correction_sequence(&self) -> u8 {
        self.correction_sequence + 1
    }

    fn transition(&mut self, next: DocumentState) -> NfeResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(NfeError::precondition(format!(
                "transição inválida {} -> {next} para {}",
                self.state, self.access_key
            )));
        }
        tracing::debug!(chave = %self.access_key, de = %self.state, para = %next, "transição de estado");
        self.state = next;
        Ok(())
    }

    pub fn mark_signed(&mut self) -> NfeResult<()> {
        self.transition(DocumentState::Signed)
    }

    pub fn mark_submitted(&mut self, receipt: Option<String>) -> NfeResult<()> {
        self.transition(DocumentState::Submitted)?;
        self.receipt = receipt;
        Ok(())
    }

    pub fn mark_authorized(&mut self, protocol: impl Into<String>) -> NfeResult<()> {
        let protocol = protocol.into();
        if protocol.is_empty() {
            return Err(NfeError::precondition("autorização sem número de protocolo"));
        }
        self.transition(DocumentState::Authorized)?;
        self.protocol = Some(protocol);
        self.receipt = None;
        Ok(())
    }

    pub fn mark_rejected(&mut self, code: u16, reason: impl Into<String>) -> NfeResult<()> {
        self.transition(DocumentState::Rejected)?;
        self.last_status = Some((code, reason.into()));
        self.receipt = None;
        Ok(())
    }

    pub fn mark_denied(&mut self, code: u16, reason: impl Into<String>) -> NfeResult<()> {
        self.transition(DocumentState::Denied)?;
        self.last_status = Some((code, reason.into()));
        self.receipt = None;
        Ok(())
    }

    /// Falha de transporte depois do envio; o lote pode ser reenviado.
    pub fn mark_fault(&mut self) -> NfeResult<()> {
        self.transition(DocumentState::Fault)
    }

    /// Garante que a nota aceita o evento pedido e devolve o protocolo de
    /// autorização a referenciar.
    pub fn ensure_eventable(&self, kind: EventKind) -> NfeResult<&str> {
        if !matches!(self.state, DocumentState::Authorized | DocumentState::Amended) {
            return Err(NfeError::precondition(format!(
                "{} exige NF-e autorizada; estado atual {}",
                kind.description(),
                self.state
            )));
        }
        self.protocol
            .as_deref()
            .ok_or_else(|| NfeError::precondition("NF-e autorizada sem protocolo registrado"))
    }

    /// Registra um evento aceito pela SEFAZ.
    pub fn apply_event(&mut self, kind: EventKind, sequence: u8) -> NfeResult<()> {
        self.ensure_eventable(kind)?;
        match kind {
            EventKind::Cancellation => self.transition(DocumentState::Cancelled),
            EventKind::CorrectionLetter => {
                self.transition(DocumentState::Amended)?;
                self.correction_sequence = self.correction_sequence.max(sequence);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> NfeDocument {
        NfeDocument::new(AccessKey::parse("35240112345678000195550010000001231123456781").unwrap())
    }

    #[test]
    fn happy_path_to_cancellation() {
        let mut d = doc();
        d.mark_signed().unwrap();
        d.mark_submitted(Some("123456789012345".into())).unwrap();
        assert_eq!(d.receipt(), Some("123456789012345"));
        d.mark_authorized("135250000001234").unwrap();
        assert_eq!(d.state(), DocumentState::Authorized);
        assert_eq!(d.receipt(), None);

        assert_eq!(d.ensure_eventable(EventKind::CorrectionLetter).unwrap(), "135250000001234");
        assert_eq!(d.next_correction_sequence(), 1);
        d.apply_event(EventKind::CorrectionLetter, 1).unwrap();
        assert_eq!(d.state(), DocumentState::Amended);
        assert_eq!(d.next_correction_sequence(), 2);
        d.apply_event(EventKind::CorrectionLetter, 2).unwrap();

        d.apply_event(EventKind::Cancellation, 1).unwrap();
        assert_eq!(d.state(), DocumentState::Cancelled);
        assert!(d.ensure_eventable(EventKind::CorrectionLetter).is_err());
    }

    #[test]
    fn invalid_transitions_are_refused() {
        let mut d = doc();
        assert!(d.mark_submitted(None).is_err());
        assert!(d.ensure_eventable(EventKind::Cancellation).is_err());
        d.mark_signed().unwrap();
        assert!(d.mark_authorized("1").is_err());
        assert_eq!(d.state(), DocumentState::Signed);
    }

    #[test]
    fn rejected_document_can_be_resigned() {
        let mut d = doc();
        d.mark_signed().unwrap();
        d.mark_submitted(None).unwrap();
        d.mark_rejected(539, "Duplicidade de NF-e").unwrap();
        assert_eq!(d.last_status(), Some((539, "Duplicidade de NF-e")));
        d.mark_signed().unwrap();
        d.mark_submitted(None).unwrap();
        d.mark_fault().unwrap();
        d.mark_submitted(None).unwrap();
        d.mark_denied(302, "Uso denegado").unwrap();
        assert!(d.state().is_settled());
        assert!(d.mark_signed().is_err());
    }
}
