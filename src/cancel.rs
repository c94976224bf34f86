use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{NfeError, NfeResult};

/// Sinal de cancelamento fornecido pelo chamador.
///
/// Clones compartilham o mesmo estado. Cancelar interrompe a requisição
/// em andamento; como nada é persistido aqui, a operação pode ser
/// repetida com segurança.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completa quando [`CancelToken::cancel`] for chamado.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Executa `fut` até o fim ou até o cancelamento, o que vier primeiro.
pub(crate) async fn run_cancellable<T, F>(cancel: Option<&CancelToken>, fut: F) -> NfeResult<T>
where
    F: Future<Output = NfeResult<T>>,
{
    match cancel {
        None => fut.await,
        Some(token) => {
            if token.is_cancelled() {
                return Err(NfeError::Cancelled);
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(NfeError::Cancelled),
                result = fut => result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completes_without_token() {
        let r = run_cancellable(None, async { Ok::<_, NfeError>(7) }).await;
        assert_eq!(r.unwrap(), 7);
    }

    #[tokio::test]
    async fn already_cancelled_short_circuits() {
        let token = CancelToken::new();
        token.cancel();
        let r = run_cancellable(Some(&token), async { Ok::<_, NfeError>(1) }).await;
        assert!(matches!(r, Err(NfeError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_pending_future() {
        let token = CancelToken::new();
        let clone = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            clone.cancel();
        });
        let r = run_cancellable(Some(&token), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, NfeError>(())
        })
        .await;
        assert!(matches!(r, Err(NfeError::Cancelled)));
        assert!(token.is_cancelled());
    }
}
