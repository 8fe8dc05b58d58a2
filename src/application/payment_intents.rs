use crate::domain::money::Amount;
use crate::domain::payment_intent::{
    CaptureMethod, FailureReason, PaymentIntent, PaymentIntentId, PaymentIntentState, Transition,
};
use crate::domain::payment_intent_event::PaymentIntentEvent;
use crate::domain::payment_method::{PaymentMethod, PaymentMethodType};
use crate::domain::ports::{EventLogBox, PaymentProviderBox};
use crate::error::PaymentIntentError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

/// Drives payment intents through their lifecycle.
///
/// Every mutating call holds the lock for its intent id while it loads the
/// latest snapshot, applies one transition and appends the result, so two
/// callers can never derive conflicting successors from the same snapshot.
/// A lock entry lives only while some caller holds or waits on it.
pub struct PaymentIntentService {
    log: EventLogBox,
    provider: PaymentProviderBox,
    locks: LockTable,
}

type LockTable = StdMutex<HashMap<PaymentIntentId, Arc<Mutex<()>>>>;

/// Exclusive access to one intent id. Dropping it releases the id and
/// removes its table entry when no other caller is queued on it.
struct IntentLock<'a> {
    table: &'a LockTable,
    id: PaymentIntentId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IntentLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        if locks
            .get(&self.id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

impl PaymentIntentService {
    /// Creates a new service.
    ///
    /// # Arguments
    ///
    /// * `log` - Append-only event log holding every intent's history
    /// * `provider` - Payment provider consulted on confirm and capture
    pub fn new(log: EventLogBox, provider: PaymentProviderBox) -> Self {
        Self {
            log,
            provider,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Starts a new intent in `requires_payment_method_type`.
    ///
    /// Fails with `AlreadyExists` when the id has history.
    pub async fn create(
        &self,
        id: PaymentIntentId,
        payment_method_types: Vec<PaymentMethodType>,
        amount: Amount,
    ) -> Result<PaymentIntent, PaymentIntentError> {
        let _guard = self.lock(&id).await;
        if self.log.find_latest(&id).await?.is_some() {
            return Err(PaymentIntentError::AlreadyExists(id.to_string()));
        }
        let transition = PaymentIntent::generate(id, payment_method_types, amount)?;
        self.persist(transition).await
    }

    pub async fn select_payment_method(
        &self,
        id: &PaymentIntentId,
        payment_method_type: PaymentMethodType,
    ) -> Result<PaymentIntent, PaymentIntentError> {
        let _guard = self.lock(id).await;
        let intent = self.load(id).await?;
        self.persist(intent.require_payment_method(payment_method_type)?)
            .await
    }

    pub async fn provide_payment_method(
        &self,
        id: &PaymentIntentId,
        payment_method: PaymentMethod,
        capture_method: CaptureMethod,
    ) -> Result<PaymentIntent, PaymentIntentError> {
        let _guard = self.lock(id).await;
        let intent = self.load(id).await?;
        self.persist(intent.require_confirmation(payment_method, capture_method)?)
            .await
    }

    /// Asks the provider to confirm and applies its verdict.
    ///
    /// A provider failure is recorded as a retryable `ConfirmationFailed`
    /// before the error is returned.
    pub async fn confirm(&self, id: &PaymentIntentId) -> Result<PaymentIntent, PaymentIntentError> {
        let _guard = self.lock(id).await;
        let intent = self.load(id).await?;
        if !matches!(intent.state(), PaymentIntentState::RequiresConfirmation { .. }) {
            return Err(PaymentIntentError::InvalidTransition {
                operation: "confirm",
                status: intent.status(),
            });
        }

        match self.provider.confirm(&intent).await {
            Ok(next) => self.persist(intent.apply_confirmation_result(next)?).await,
            Err(err) => {
                warn!(id = %id, error = %err, "confirmation failed");
                self.persist(intent.fail(FailureReason::ConfirmationFailed, true)?)
                    .await?;
                Err(err)
            }
        }
    }

    /// Captures the full amount of a manually captured intent.
    ///
    /// A provider failure cancels the intent before the error is returned.
    pub async fn capture(&self, id: &PaymentIntentId) -> Result<PaymentIntent, PaymentIntentError> {
        let _guard = self.lock(id).await;
        let intent = self.load(id).await?;
        if !matches!(intent.state(), PaymentIntentState::RequiresCapture { .. }) {
            return Err(PaymentIntentError::InvalidTransition {
                operation: "capture",
                status: intent.status(),
            });
        }

        match self.provider.capture(&intent, intent.amount()).await {
            Ok(()) => self.persist(intent.start_processing()?).await,
            Err(err) => {
                warn!(id = %id, error = %err, "capture failed");
                self.persist(intent.fail(FailureReason::CaptureFailed, false)?)
                    .await?;
                Err(err)
            }
        }
    }

    /// Resumes an intent after the buyer completed the requested action.
    ///
    /// Returns `None` for an unknown id, and the intent unchanged when it is
    /// not waiting on an action.
    pub async fn handle_action_result(
        &self,
        id: &PaymentIntentId,
    ) -> Result<Option<PaymentIntent>, PaymentIntentError> {
        let _guard = self.lock(id).await;
        let Some(intent) = self.log.find_latest(id).await? else {
            return Ok(None);
        };
        let PaymentIntentState::RequiresAction { capture_method, .. } = intent.state() else {
            return Ok(Some(intent));
        };

        let transition = match capture_method {
            CaptureMethod::Automatic => intent.start_processing()?,
            CaptureMethod::Manual => intent.require_capture()?,
        };
        self.persist(transition).await.map(Some)
    }

    /// Settles an intent once the provider reports success.
    ///
    /// Returns `None` for an unknown id, and the intent unchanged when it is
    /// not processing.
    pub async fn handle_payment_succeeded(
        &self,
        id: &PaymentIntentId,
    ) -> Result<Option<PaymentIntent>, PaymentIntentError> {
        let _guard = self.lock(id).await;
        let Some(intent) = self.log.find_latest(id).await? else {
            return Ok(None);
        };
        if !matches!(intent.state(), PaymentIntentState::Processing { .. }) {
            return Ok(Some(intent));
        }
        self.persist(intent.complete()?).await.map(Some)
    }

    /// Records an explicit failure: back to payment method selection when
    /// `retryable`, otherwise canceled.
    pub async fn fail(
        &self,
        id: &PaymentIntentId,
        reason: FailureReason,
        retryable: bool,
    ) -> Result<PaymentIntent, PaymentIntentError> {
        let _guard = self.lock(id).await;
        let intent = self.load(id).await?;
        self.persist(intent.fail(reason, retryable)?).await
    }

    /// Latest snapshot of the intent, if any.
    pub async fn find(
        &self,
        id: &PaymentIntentId,
    ) -> Result<Option<PaymentIntent>, PaymentIntentError> {
        self.log.find_latest(id).await
    }

    pub async fn history(
        &self,
        id: &PaymentIntentId,
    ) -> Result<Vec<PaymentIntentEvent>, PaymentIntentError> {
        self.log.events(id).await
    }

    async fn lock(&self, id: &PaymentIntentId) -> IntentLock<'_> {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        let guard = entry.lock_owned().await;
        IntentLock {
            table: &self.locks,
            id: id.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn load(&self, id: &PaymentIntentId) -> Result<PaymentIntent, PaymentIntentError> {
        self.log
            .find_latest(id)
            .await?
            .ok_or_else(|| PaymentIntentError::NotFound(id.to_string()))
    }

    async fn persist(&self, (event, intent): Transition) -> Result<PaymentIntent, PaymentIntentError> {
        info!(
            id = %intent.id(),
            seq_nr = intent.seq_nr(),
            event = event.kind.name(),
            status = intent.status(),
            "payment intent transition"
        );
        self.log.save(event, intent.clone()).await?;
        Ok(intent)
    }
}
