// ── Receipt Poll Scheduler ──────────────────────────────────────
//! Repete a consulta de recibo com espera mínima, backoff e limite de
//! tentativas. Cada consulta continua sendo uma única chamada
//! ([`ReceiptPoller::poll_receipt`]); aqui só se decide *quando* chamar.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cancel::{run_cancellable, CancelToken};
use crate::error::{NfeError, NfeResult};
use crate::model::{Environment, Route, Uf};
use crate::service::SubmissionResult;

/// Espera mínima antes da primeira consulta de recibo; consultas
/// antecipadas são rejeitadas pela SEFAZ.
pub const MIN_POLL_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Espera antes da primeira consulta; nunca abaixo de [`MIN_POLL_DELAY`].
    pub initial_delay_secs: u64,
    /// Espera entre a primeira e a segunda consulta.
    pub interval_secs: u64,
    /// Multiplicador aplicado ao intervalo a cada nova tentativa (1.0 = fixo).
    pub backoff_factor: f64,
    pub max_interval_secs: u64,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay_secs: 5,
            interval_secs: 5,
            backoff_factor: 1.5,
            max_interval_secs: 60,
            max_attempts: 10,
        }
    }
}

impl PollPolicy {
    /// Espera antes da tentativa `attempt` (a partir de 1).
    ///
    /// `average_time_secs` é o `tMed` informado pela SEFAZ no envio; quando
    /// maior que a espera configurada, prevalece na primeira tentativa.
    pub fn delay_before(&self, attempt: u32, average_time_secs: Option<u64>) -> Duration {
        if attempt <= 1 {
            let configured = Duration::from_secs(self.initial_delay_secs);
            let hint = Duration::from_secs(average_time_secs.unwrap_or(0));
            return configured.max(hint).max(MIN_POLL_DELAY);
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let secs = self.interval_secs as f64 * self.backoff_factor.max(1.0).powi(exponent);
        let capped = secs.min(self.max_interval_secs.max(self.interval_secs) as f64);
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Resultado do ciclo de consultas.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    /// A SEFAZ concluiu o processamento (autorizada, rejeitada ou denegada).
    Final { result: SubmissionResult, attempts: u32 },
    /// Tentativas esgotadas com o lote ainda em processamento; consultar
    /// mais tarde com o mesmo recibo.
    StillPending { receipt: String, attempts: u32 },
}

/// Uma consulta de recibo, sem repetição.
#[async_trait]
pub trait ReceiptPoller: Send + Sync {
    async fn poll_receipt(
        &self,
        receipt: &str,
        uf: Uf,
        environment: Environment,
        route: Route,
        cancel: Option<&CancelToken>,
    ) -> NfeResult<SubmissionResult>;
}

/// Consulta o recibo até um resultado final ou até esgotar `policy.max_attempts`.
///
/// Falhas de transporte repetíveis contam como tentativa; a última só é
/// devolvida ao chamador se nenhuma consulta completar. Se alguma
/// consulta respondeu "em processamento", o lote segue pendente. Cancelamento
/// interrompe inclusive a espera entre tentativas.
#[allow(clippy::too_many_arguments)]
pub async fn poll_until_final<P>(
    poller: &P,
    receipt: &str,
    uf: Uf,
    environment: Environment,
    route: Route,
    policy: &PollPolicy,
    average_time_secs: Option<u64>,
    cancel: Option<&CancelToken>,
) -> NfeResult<PollOutcome>
where
    P: ReceiptPoller + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error: Option<NfeError> = None;
    let mut answered = false;

    for attempt in 1..=max_attempts {
        let delay = policy.delay_before(attempt, average_time_secs);
        tracing::debug!(recibo = receipt, attempt, delay_ms = delay.as_millis() as u64, "aguardando consulta de recibo");
        run_cancellable(cancel, async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await?;

        match poller
            .poll_receipt(receipt, uf, environment, route, cancel)
            .await
        {
            Ok(SubmissionResult::Pending { .. }) => {
                answered = true;
            }
            Ok(result) => {
                tracing::info!(recibo = receipt, attempt, status = %result.code(), "lote concluído");
                return Ok(PollOutcome::Final {
                    result,
                    attempts: attempt,
                });
            }
            Err(NfeError::Cancelled) => return Err(NfeError::Cancelled),
            Err(err) if err.is_retryable() => {
                tracing::warn!(recibo = receipt, attempt, error = %err, "consulta de recibo falhou; nova tentativa");
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    if let Some(err) = last_error.filter(|_| !answered) {
        return Err(err);
    }
    tracing::info!(recibo = receipt, attempts = max_attempts, "lote ainda em processamento");
    Ok(PollOutcome::StillPending {
        receipt: receipt.to_string(),
        attempts: max_attempts,
    })
}
