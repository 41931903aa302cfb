//! Card operations over a store and the vault: CRUD, batch updates, key
//! rotation.

use std::{collections::HashMap, sync::Arc};

#[cfg(feature = "metrics")]
use std::time::Instant;

use {
    async_trait::async_trait,
    cardvault_vault::{
        EncryptedValue, GenerationAudit, RecordPersister, SweepAction, SweepOutcome, Vault,
        VaultError,
    },
    tokio::{sync::Semaphore, task::JoinSet},
    tracing::{info, warn},
    uuid::Uuid,
};

#[cfg(feature = "metrics")]
use cardvault_metrics::{cards as card_metrics, counter, histogram, labels};

use crate::{
    Error, Result,
    store::CardStore,
    types::{
        BatchCardUpdate, BatchUpdateRequest, BatchUpdateResponse, Card, CardRequest,
        CardResponse, CardRevision, ItemStatus, KeyStatusResponse, RotationResponse, now,
    },
    validate::{detect_brand, mask, validate_batch_item, validate_request},
};

/// Limits applied by the card service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardPolicy {
    pub min_expiry_year: i32,
    /// Size of the worker pool shared by all batch updates.
    pub max_batch_workers: usize,
}

impl Default for CardPolicy {
    fn default() -> Self {
        Self {
            min_expiry_year: 2024,
            max_batch_workers: 8,
        }
    }
}

pub struct CardService {
    store: Arc<dyn CardStore>,
    vault: Arc<Vault>,
    policy: CardPolicy,
    workers: Arc<Semaphore>,
}

impl CardService {
    pub fn new(store: Arc<dyn CardStore>, vault: Arc<Vault>, policy: CardPolicy) -> Self {
        let workers = Arc::new(Semaphore::new(policy.max_batch_workers.max(1)));
        Self {
            store,
            vault,
            policy,
            workers,
        }
    }

    #[must_use]
    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    #[must_use]
    pub fn policy(&self) -> CardPolicy {
        self.policy
    }

    pub async fn create_card(&self, user_id: Uuid, req: &CardRequest) -> Result<CardResponse> {
        let number = self.validated(req)?;
        let (card_number, cvv, key_version) = self.seal(&number, &req.cvv)?;
        let at = now();
        let card = Card {
            id: Uuid::new_v4(),
            user_id,
            cardholder_name: req.cardholder_name.clone(),
            card_number,
            expiry_month: req.expiry_month,
            expiry_year: req.expiry_year,
            cvv,
            card_type: detect_brand(&number),
            is_active: true,
            key_version,
            created_at: at,
            updated_at: at,
        };

        let result = self.store.create(&card).await;
        record_operation("create", &result);
        result?;

        info!(card_id = %card.id, %user_id, key_version, brand = %card.card_type, "card created");
        Ok(CardResponse::new(&card, mask(&number)))
    }

    pub async fn get_card(&self, user_id: Uuid, card_id: Uuid) -> Result<CardResponse> {
        let result = self.fetch(user_id, card_id).await;
        record_operation("get", &result);
        result
    }

    pub async fn list_cards(&self, user_id: Uuid) -> Result<Vec<CardResponse>> {
        let cards = self.store.list_for_user(user_id).await?;
        let result = cards.iter().map(|card| self.respond(card)).collect();
        record_operation("list", &result);
        result
    }

    /// Replace every field of a card, resealing number and CVV under the
    /// active key.
    pub async fn update_card(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        req: &CardRequest,
    ) -> Result<CardResponse> {
        let number = self.validated(req)?;
        let existing = self.store.get(user_id, card_id).await?;
        let (card_number, cvv, key_version) = self.seal(&number, &req.cvv)?;

        let mut card = Card {
            cardholder_name: req.cardholder_name.clone(),
            card_number,
            expiry_month: req.expiry_month,
            expiry_year: req.expiry_year,
            cvv,
            card_type: detect_brand(&number),
            key_version,
            ..existing.clone()
        };
        card.touch();

        let result = self.store.update(&card, existing.revision()).await;
        record_operation("update", &result);
        result?;

        info!(%card_id, key_version, "card updated");
        Ok(CardResponse::new(&card, mask(&number)))
    }

    pub async fn delete_card(&self, user_id: Uuid, card_id: Uuid) -> Result<()> {
        let result = self.store.delete(user_id, card_id).await;
        record_operation("delete", &result);
        result?;
        info!(%card_id, "card deleted");
        Ok(())
    }

    /// Apply non-sensitive field updates to many cards.
    ///
    /// Items run on the shared worker pool; each reports its own outcome and
    /// results come back in request order.
    pub async fn batch_update(
        &self,
        user_id: Uuid,
        req: BatchUpdateRequest,
    ) -> Result<Vec<BatchUpdateResponse>> {
        #[cfg(feature = "metrics")]
        let started = Instant::now();

        let ids: Vec<Uuid> = req.cards.iter().map(|u| u.id).collect();
        let mut tasks = JoinSet::new();
        for (index, update) in req.cards.into_iter().enumerate() {
            let permit = Arc::clone(&self.workers)
                .acquire_owned()
                .await
                .map_err(|e| Error::external("batch worker pool closed", e))?;
            let store = Arc::clone(&self.store);
            let min_year = self.policy.min_expiry_year;
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = apply_batch_item(store.as_ref(), user_id, &update, min_year).await;
                (index, outcome)
            });
        }

        let mut results: Vec<Option<BatchUpdateResponse>> = vec![None; ids.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => results[index] = Some(outcome),
                Err(e) => warn!(error = %e, "batch update worker failed"),
            }
        }

        let results: Vec<BatchUpdateResponse> = results
            .into_iter()
            .zip(ids)
            .map(|(outcome, id)| {
                outcome.unwrap_or_else(|| BatchUpdateResponse::failed(id, "worker task failed"))
            })
            .collect();

        #[cfg(feature = "metrics")]
        {
            for r in &results {
                counter!(
                    card_metrics::BATCH_ITEMS_TOTAL,
                    labels::STATUS => status_label(r.status)
                )
                .increment(1);
            }
            histogram!(card_metrics::BATCH_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
        }

        let failed = results
            .iter()
            .filter(|r| r.status == ItemStatus::Failed)
            .count();
        info!(%user_id, items = results.len(), failed, "batch update finished");
        Ok(results)
    }

    /// Rotate the vault key and move every stored card onto it.
    ///
    /// Cards written while the sweep ran were sealed under the outgoing key;
    /// a catch-up sweep moves those too.
    pub async fn rotate_keys(&self) -> Result<RotationResponse> {
        let persister = StorePersister {
            store: self.store.as_ref(),
        };

        let cards = self.store.list_all().await?;
        let report = self.vault.rotate_and_reencrypt(cards, &persister).await?;
        let from_version = report.rotated_from.unwrap_or(report.target_version);
        let to_version = report.target_version;

        let mut results = Vec::with_capacity(report.outcomes.len());
        let mut index = HashMap::new();
        for outcome in &report.outcomes {
            index.insert(outcome.record_id, results.len());
            results.push(item_response(outcome));
        }

        let stragglers: Vec<Card> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter(|c| c.key_version != to_version)
            .collect();
        if !stragglers.is_empty() {
            match self.vault.sweep(stragglers, &persister).await {
                Ok(catch_up) => {
                    for outcome in &catch_up.outcomes {
                        if matches!(outcome.result, Ok(SweepAction::Skipped)) {
                            continue;
                        }
                        let response = item_response(outcome);
                        match index.get(&outcome.record_id) {
                            Some(&i) => results[i] = response,
                            None => results.push(response),
                        }
                    }
                },
                // Another rotation took over; it sweeps these cards itself.
                Err(VaultError::RotationInProgress) => {
                    warn!("catch-up sweep skipped, another rotation is running");
                },
                Err(e) => return Err(e.into()),
            }
        }

        let count = |status| results.iter().filter(|r| r.status == status).count();
        let response = RotationResponse {
            from_version,
            to_version,
            reencrypted: count(ItemStatus::Success),
            skipped: count(ItemStatus::Skipped),
            failed: count(ItemStatus::Failed),
            results,
        };
        info!(
            from_version,
            to_version,
            reencrypted = response.reencrypted,
            failed = response.failed,
            "key rotation finished"
        );
        Ok(response)
    }

    /// Key generations plus how the stored cards are spread over them.
    pub async fn key_status(&self) -> Result<KeyStatusResponse> {
        let cards = self.store.list_all().await?;
        let audit = self.vault.audit(&cards);
        Ok(KeyStatusResponse {
            keys: self.vault.status(),
            cards_total: audit.total(),
            cards_on_current: audit.on_current,
            cards_at_risk: audit.at_risk.len(),
            cards_unrecoverable: audit.unrecoverable.len(),
        })
    }

    /// Check that stored cards can be opened by this process.
    ///
    /// Keys live only in memory, so cards written by an earlier process are
    /// unreadable even when their version tag matches. One card on the
    /// current version is probed to catch that case.
    pub async fn startup_check(&self) -> Result<GenerationAudit<Uuid>> {
        let cards = self.store.list_all().await?;
        let audit = self.vault.audit(&cards);
        let probe_failed = cards
            .iter()
            .find(|c| c.key_version == audit.current_version)
            .is_some_and(|c| self.vault.decrypt_field(&c.cvv, c.key_version).is_err());

        if probe_failed || !audit.unrecoverable.is_empty() {
            warn!(
                cards = audit.total(),
                unrecoverable_versions = audit.unrecoverable.len(),
                "stored cards are sealed under keys this process does not hold"
            );
        } else {
            info!(cards = audit.total(), "stored cards readable");
        }
        Ok(audit)
    }

    fn validated(&self, req: &CardRequest) -> Result<String> {
        validate_request(req, self.policy.min_expiry_year).inspect_err(|_e| {
            #[cfg(feature = "metrics")]
            counter!(card_metrics::VALIDATION_FAILURES_TOTAL).increment(1);
        })
    }

    fn seal(
        &self,
        number: &str,
        cvv: &str,
    ) -> Result<(EncryptedValue, EncryptedValue, u32)> {
        let (values, version) = self
            .vault
            .encrypt_fields(&[number.as_bytes(), cvv.as_bytes()])?;
        let [card_number, cvv]: [_; 2] = values.try_into().map_err(|_| {
            Error::Vault(VaultError::MalformedCiphertext {
                reason: "sealed field count mismatch",
            })
        })?;
        Ok((card_number, cvv, version))
    }

    async fn fetch(&self, user_id: Uuid, card_id: Uuid) -> Result<CardResponse> {
        let card = self.store.get(user_id, card_id).await?;
        self.respond(&card)
    }

    fn respond(&self, card: &Card) -> Result<CardResponse> {
        let number = self
            .vault
            .decrypt_str(&card.card_number, card.key_version)
            .inspect_err(|e| {
                warn!(
                    card_id = %card.id,
                    key_version = card.key_version,
                    error = %e,
                    "card number could not be decrypted"
                );
            })?;
        Ok(CardResponse::new(card, mask(&number)))
    }
}

async fn apply_batch_item(
    store: &dyn CardStore,
    user_id: Uuid,
    update: &BatchCardUpdate,
    min_expiry_year: i32,
) -> BatchUpdateResponse {
    if let Err(e) = validate_batch_item(update, min_expiry_year) {
        return BatchUpdateResponse::failed(update.id, e);
    }
    if update.cardholder_name.is_none()
        && update.expiry_month.is_none()
        && update.expiry_year.is_none()
    {
        return BatchUpdateResponse::skipped(update.id);
    }

    let existing = match store.get(user_id, update.id).await {
        Ok(card) => card,
        Err(Error::CardNotFound { .. }) => {
            return BatchUpdateResponse::failed(update.id, "card not found");
        },
        Err(e) => return BatchUpdateResponse::failed(update.id, e),
    };

    let mut card = existing.clone();
    if let Some(name) = &update.cardholder_name {
        card.cardholder_name.clone_from(name);
    }
    if let Some(month) = update.expiry_month {
        card.expiry_month = month;
    }
    if let Some(year) = update.expiry_year {
        card.expiry_year = year;
    }
    card.touch();

    match store.update(&card, existing.revision()).await {
        Ok(()) => BatchUpdateResponse::success(update.id),
        Err(e) => BatchUpdateResponse::failed(update.id, e),
    }
}

fn item_response(outcome: &SweepOutcome<Uuid>) -> BatchUpdateResponse {
    match &outcome.result {
        Ok(SweepAction::Reencrypted) => BatchUpdateResponse::success(outcome.record_id),
        Ok(SweepAction::Skipped) => BatchUpdateResponse::skipped(outcome.record_id),
        Err(e) => BatchUpdateResponse::failed(outcome.record_id, e),
    }
}

/// Writes resealed cards back, guarded by the revision the sweep loaded.
struct StorePersister<'a> {
    store: &'a dyn CardStore,
}

#[async_trait]
impl RecordPersister<Card> for StorePersister<'_> {
    async fn persist(
        &self,
        card: &Card,
        previous_version: u32,
    ) -> std::result::Result<(), VaultError> {
        let expected = CardRevision {
            key_version: previous_version,
            updated_at: card.updated_at,
        };
        self.store
            .update(card, expected)
            .await
            .map_err(|e| VaultError::persistence(format!("persist card {}", card.id), e))
    }
}

#[cfg(feature = "metrics")]
fn status_label(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Success => "success",
        ItemStatus::Failed => "failed",
        ItemStatus::Skipped => "skipped",
    }
}

#[allow(unused_variables)]
fn record_operation<T>(operation: &'static str, result: &Result<T>) {
    #[cfg(feature = "metrics")]
    counter!(
        card_metrics::OPERATIONS_TOTAL,
        labels::OPERATION => operation,
        labels::STATUS => if result.is_ok() { "ok" } else { "error" }
    )
    .increment(1);
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use {super::*, crate::InMemoryCardStore};

    fn service() -> (CardService, Arc<InMemoryCardStore>) {
        let store = Arc::new(InMemoryCardStore::new());
        let vault = Arc::new(Vault::new().unwrap());
        let service = CardService::new(
            Arc::clone(&store) as Arc<dyn CardStore>,
            vault,
            CardPolicy {
                min_expiry_year: 2024,
                max_batch_workers: 2,
            },
        );
        (service, store)
    }

    fn request(number: &str) -> CardRequest {
        CardRequest {
            cardholder_name: "Ada Lovelace".into(),
            card_number: number.into(),
            expiry_month: 12,
            expiry_year: 2030,
            cvv: "123".into(),
        }
    }

    fn open(service: &CardService, value: &EncryptedValue, version: u32) -> String {
        service
            .vault()
            .decrypt_str(value, version)
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn create_seals_number_and_cvv() {
        let (service, store) = service();
        let user = Uuid::new_v4();
        let created = service
            .create_card(user, &request("4111 1111 1111 1111"))
            .await
            .unwrap();

        assert_eq!(created.masked_number, "************1111");
        assert_eq!(created.card_type, crate::types::CardBrand::Visa);
        assert!(created.is_active);

        let stored = store.get(user, created.id).await.unwrap();
        assert_eq!(stored.key_version, 1);
        assert_ne!(stored.card_number.as_str(), "4111111111111111");
        assert_eq!(
            open(&service, &stored.card_number, 1),
            "4111111111111111"
        );
        assert_eq!(open(&service, &stored.cvv, 1), "123");
    }

    #[tokio::test]
    async fn invalid_card_is_rejected_before_storage() {
        let (service, store) = service();
        let err = service
            .create_card(Uuid::new_v4(), &request("4111111111111112"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cards_are_scoped_to_their_owner() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let card = service
            .create_card(owner, &request("5500005555555559"))
            .await
            .unwrap();

        let stranger = Uuid::new_v4();
        assert!(matches!(
            service.get_card(stranger, card.id).await,
            Err(Error::CardNotFound { .. })
        ));
        assert!(service.list_cards(stranger).await.unwrap().is_empty());
        assert_eq!(service.list_cards(owner).await.unwrap().len(), 1);
        assert_eq!(
            service.get_card(owner, card.id).await.unwrap().masked_number,
            "************5559"
        );
    }

    #[tokio::test]
    async fn update_reseals_under_active_key() {
        let (service, store) = service();
        let user = Uuid::new_v4();
        let card = service
            .create_card(user, &request("4111111111111111"))
            .await
            .unwrap();
        service.vault().rotate().unwrap();

        let updated = service
            .update_card(user, card.id, &request("378282246310005"))
            .await
            .unwrap();
        assert_eq!(updated.masked_number, "***********0005");
        assert_eq!(updated.card_type, crate::types::CardBrand::Amex);
        assert!(updated.updated_at > card.updated_at);
        assert_eq!(updated.created_at, card.created_at);

        let stored = store.get(user, card.id).await.unwrap();
        assert_eq!(stored.key_version, 2);
        assert_eq!(open(&service, &stored.card_number, 2), "378282246310005");
    }

    #[tokio::test]
    async fn delete_removes_card() {
        let (service, _) = service();
        let user = Uuid::new_v4();
        let card = service
            .create_card(user, &request("4111111111111111"))
            .await
            .unwrap();
        service.delete_card(user, card.id).await.unwrap();
        assert!(matches!(
            service.delete_card(user, card.id).await,
            Err(Error::CardNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn batch_update_reports_each_item_in_order() {
        let (service, store) = service();
        let user = Uuid::new_v4();
        let a = service
            .create_card(user, &request("4111111111111111"))
            .await
            .unwrap();
        let b = service
            .create_card(user, &request("5500005555555559"))
            .await
            .unwrap();
        let missing = Uuid::new_v4();

        let results = service
            .batch_update(user, BatchUpdateRequest {
                cards: vec![
                    BatchCardUpdate {
                        id: a.id,
                        cardholder_name: Some("Grace Hopper".into()),
                        expiry_month: None,
                        expiry_year: None,
                    },
                    BatchCardUpdate {
                        id: missing,
                        cardholder_name: None,
                        expiry_month: Some(3),
                        expiry_year: None,
                    },
                    BatchCardUpdate {
                        id: b.id,
                        cardholder_name: None,
                        expiry_month: Some(13),
                        expiry_year: None,
                    },
                    BatchCardUpdate {
                        id: b.id,
                        cardholder_name: None,
                        expiry_month: None,
                        expiry_year: None,
                    },
                ],
            })
            .await
            .unwrap();

        let statuses: Vec<(Uuid, ItemStatus)> =
            results.iter().map(|r| (r.card_id, r.status)).collect();
        assert_eq!(statuses, vec![
            (a.id, ItemStatus::Success),
            (missing, ItemStatus::Failed),
            (b.id, ItemStatus::Failed),
            (b.id, ItemStatus::Skipped),
        ]);
        assert_eq!(results[1].error.as_deref(), Some("card not found"));

        let renamed = store.get(user, a.id).await.unwrap();
        assert_eq!(renamed.cardholder_name, "Grace Hopper");
        assert_eq!(store.get(user, b.id).await.unwrap().expiry_month, 12);
    }

    /// Store wrapper that tracks how many reads run at once.
    struct CountingStore {
        inner: InMemoryCardStore,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl CardStore for CountingStore {
        async fn create(&self, card: &Card) -> Result<()> {
            self.inner.create(card).await
        }

        async fn get(&self, user_id: Uuid, card_id: Uuid) -> Result<Card> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.inner.get(user_id, card_id).await
        }

        async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Card>> {
            self.inner.list_for_user(user_id).await
        }

        async fn list_all(&self) -> Result<Vec<Card>> {
            self.inner.list_all().await
        }

        async fn update(&self, card: &Card, expected: CardRevision) -> Result<()> {
            self.inner.update(card, expected).await
        }

        async fn delete(&self, user_id: Uuid, card_id: Uuid) -> Result<()> {
            self.inner.delete(user_id, card_id).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn batch_concurrency_is_bounded_by_pool() {
        let store = Arc::new(CountingStore {
            inner: InMemoryCardStore::new(),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let service = CardService::new(
            Arc::clone(&store) as Arc<dyn CardStore>,
            Arc::new(Vault::new().unwrap()),
            CardPolicy {
                min_expiry_year: 2024,
                max_batch_workers: 3,
            },
        );
        let user = Uuid::new_v4();
        let mut items = Vec::new();
        for _ in 0..20 {
            let card = service
                .create_card(user, &request("4111111111111111"))
                .await
                .unwrap();
            items.push(BatchCardUpdate {
                id: card.id,
                cardholder_name: None,
                expiry_month: Some(6),
                expiry_year: None,
            });
        }

        let results = service
            .batch_update(user, BatchUpdateRequest { cards: items })
            .await
            .unwrap();

        assert!(results.iter().all(|r| r.status == ItemStatus::Success));
        let peak = store.peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak concurrency {peak}");
    }

    #[tokio::test]
    async fn rotate_keys_moves_every_card() {
        let (service, store) = service();
        let user = Uuid::new_v4();
        for number in ["4111111111111111", "5500005555555559", "378282246310005"] {
            service.create_card(user, &request(number)).await.unwrap();
        }

        let rotation = service.rotate_keys().await.unwrap();
        assert_eq!(rotation.from_version, 1);
        assert_eq!(rotation.to_version, 2);
        assert_eq!(rotation.reencrypted, 3);
        assert_eq!(rotation.failed, 0);

        for card in store.list_all().await.unwrap() {
            assert_eq!(card.key_version, 2);
            assert_eq!(open(&service, &card.cvv, 2), "123");
        }

        // Swept cards survive the next rotation.
        service.vault().rotate().unwrap();
        assert_eq!(service.list_cards(user).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rotate_keys_reports_corrupted_card() {
        let (service, store) = service();
        let user = Uuid::new_v4();
        let good = service
            .create_card(user, &request("4111111111111111"))
            .await
            .unwrap();
        let bad = service
            .create_card(user, &request("5500005555555559"))
            .await
            .unwrap();

        // Rewrite the first nonce character of the sealed CVV.
        let mut stored = store.get(user, bad.id).await.unwrap();
        let revision = stored.revision();
        let sealed = stored.cvv.as_str();
        let swap = if sealed.starts_with('A') { 'B' } else { 'A' };
        stored.cvv = EncryptedValue::new(format!("{swap}{}", &sealed[1..]));
        store.update(&stored, revision).await.unwrap();

        let rotation = service.rotate_keys().await.unwrap();
        assert_eq!(rotation.reencrypted, 1);
        assert_eq!(rotation.failed, 1);
        let failure = rotation
            .results
            .iter()
            .find(|r| r.status == ItemStatus::Failed)
            .unwrap();
        assert_eq!(failure.card_id, bad.id);

        assert_eq!(store.get(user, good.id).await.unwrap().key_version, 2);
        assert_eq!(store.get(user, bad.id).await.unwrap().key_version, 1);
    }

    #[tokio::test]
    async fn key_status_counts_cards_per_generation() {
        let (service, _) = service();
        let user = Uuid::new_v4();
        service
            .create_card(user, &request("4111111111111111"))
            .await
            .unwrap();
        service.vault().rotate().unwrap();
        service
            .create_card(user, &request("5500005555555559"))
            .await
            .unwrap();

        let status = service.key_status().await.unwrap();
        assert_eq!(status.keys.current_version, 2);
        assert_eq!(status.cards_total, 2);
        assert_eq!(status.cards_on_current, 1);
        assert_eq!(status.cards_at_risk, 1);
        assert_eq!(status.cards_unrecoverable, 0);
    }

    #[tokio::test]
    async fn cards_from_a_previous_process_are_unrecoverable() {
        let store = Arc::new(InMemoryCardStore::new());
        let first = CardService::new(
            Arc::clone(&store) as Arc<dyn CardStore>,
            Arc::new(Vault::new().unwrap()),
            CardPolicy::default(),
        );
        let user = Uuid::new_v4();
        let card = first
            .create_card(user, &request("4111111111111111"))
            .await
            .unwrap();

        // Fresh vault, fresh version 1 key: the tag matches, the key does not.
        let second = CardService::new(
            Arc::clone(&store) as Arc<dyn CardStore>,
            Arc::new(Vault::new().unwrap()),
            CardPolicy::default(),
        );
        assert!(matches!(
            second.get_card(user, card.id).await,
            Err(Error::Vault(VaultError::AuthenticationFailure))
        ));

        let audit = second.startup_check().await.unwrap();
        assert_eq!(audit.on_current, 1);
    }
}
