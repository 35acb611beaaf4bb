//! LocalLedger — an embedded job board backed by redb.
//!
//! Applies the same rules a shared ledger would: claims are exclusive per
//! worker, submissions need an active claim, and a request is settled once
//! it has `min_verification` solutions. Each action runs in one write
//! transaction; a rejected action leaves no trace.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use swarmgrid_auth::Authenticator;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::Ledger;
use crate::tables::*;
use crate::types::*;

macro_rules! map_err {
    ($variant:ident) => {
        |e| LedgerError::$variant(e.to_string())
    };
}

/// Thread-safe ledger handle; clones share the database.
#[derive(Clone)]
pub struct LocalLedger {
    db: Arc<Database>,
    auth: Authenticator,
}

impl LocalLedger {
    /// Open (or create) a ledger file.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let ledger = Self::from_db(db)?;
        debug!(?path, "ledger opened");
        Ok(ledger)
    }

    pub fn open_in_memory() -> LedgerResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        Self::from_db(db)
    }

    fn from_db(db: Database) -> LedgerResult<Self> {
        let ledger = Self {
            db: Arc::new(db),
            auth: Authenticator::disabled(),
        };
        ledger.ensure_tables()?;
        Ok(ledger)
    }

    /// Require actions to be signed by a whitelisted identity.
    pub fn with_authenticator(mut self, auth: Authenticator) -> Self {
        self.auth = auth;
        self
    }

    fn ensure_tables(&self) -> LedgerResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(QUEUE).map_err(map_err!(Table))?;
        txn.open_table(STATUS).map_err(map_err!(Table))?;
        txn.open_table(SOLUTIONS).map_err(map_err!(Table))?;
        txn.open_table(WORKERS).map_err(map_err!(Table))?;
        txn.open_table(BALANCES).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Open requests in id order.
    pub fn list_queue(&self) -> LedgerResult<Vec<QueueEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUEUE).map_err(map_err!(Table))?;
        Ok(scan_prefix(&table, "")?.into_iter().map(|(_, v)| v).collect())
    }

    pub fn get_request(&self, request_id: RequestId) -> LedgerResult<Option<QueueEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUEUE).map_err(map_err!(Table))?;
        read_json(&table, &request_key(request_id))
    }

    pub fn statuses(&self, request_id: RequestId) -> LedgerResult<Vec<WorkerStatus>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STATUS).map_err(map_err!(Table))?;
        Ok(scan_prefix(&table, &claim_prefix(request_id))?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    /// Requests `worker` has started but not yet solved.
    pub fn active_claims(&self, worker: &str) -> LedgerResult<Vec<RequestId>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STATUS).map_err(map_err!(Table))?;
        let mut claims = Vec::new();
        for (key, status) in scan_prefix::<WorkerStatus, _>(&table, "")? {
            if status.worker != worker || status.status != ClaimStatus::Started {
                continue;
            }
            let id = key
                .split_once(':')
                .and_then(|(id, _)| id.parse().ok())
                .ok_or_else(|| LedgerError::Deserialize(format!("bad claim key {key}")))?;
            claims.push(id);
        }
        Ok(claims)
    }

    pub fn list_workers(&self) -> LedgerResult<Vec<WorkerRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        Ok(scan_prefix(&table, "")?.into_iter().map(|(_, v)| v).collect())
    }

    pub fn solutions(&self, request_id: RequestId) -> LedgerResult<Vec<Solution>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SOLUTIONS).map_err(map_err!(Table))?;
        Ok(scan_prefix(&table, &claim_prefix(request_id))?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    pub fn balance(&self, account: &str) -> LedgerResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BALANCES).map_err(map_err!(Table))?;
        Ok(table
            .get(account)
            .map_err(map_err!(Read))?
            .map(|g| g.value())
            .unwrap_or(0))
    }

    /// Number of actions applied so far.
    pub fn action_count(&self) -> LedgerResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        let last = table.last().map_err(map_err!(Read))?;
        Ok(last.map(|(seq, _)| seq.value()).unwrap_or(0))
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Authenticate and apply one action atomically.
    pub fn apply(&self, signed: &SignedAction) -> LedgerResult<Receipt> {
        if let Err(e) = signed.authenticate(&self.auth) {
            warn!(actor = %signed.actor, action = signed.action.name(), error = %e, "unauthenticated action");
            return Err(LedgerError::rejected(format!("authentication failed: {e}")));
        }
        let actor = signed.actor.as_str();
        let now = now_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;

        let request_id = match &signed.action {
            LedgerAction::Enqueue {
                body,
                inputs,
                reward,
                min_verification,
            } => {
                if *min_verification == 0 {
                    return Err(LedgerError::rejected("min_verification must be at least 1"));
                }
                let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
                let id = next_counter(&mut meta, "next_request")?;
                let entry = QueueEntry {
                    id,
                    requester: actor.to_string(),
                    body: body.clone(),
                    inputs: inputs.clone(),
                    reward: *reward,
                    min_verification: *min_verification,
                    created_at: now,
                };
                let mut queue = txn.open_table(QUEUE).map_err(map_err!(Table))?;
                write_json(&mut queue, &request_key(id), &entry)?;
                info!(request = id, requester = %actor, reward, "request enqueued");
                Some(id)
            }
            LedgerAction::WorkBegin { request_id } => {
                work_begin(&txn, actor, *request_id, now)?;
                None
            }
            LedgerAction::Submit {
                request_id,
                request_hash,
                result_hash,
                cid,
            } => {
                let solution = Solution {
                    worker: actor.to_string(),
                    request_hash: request_hash.clone(),
                    result_hash: result_hash.clone(),
                    cid: cid.clone(),
                    submitted_at: now,
                };
                submit(&txn, *request_id, solution)?;
                None
            }
            LedgerAction::WorkCancel { request_id, reason } => {
                let mut status = txn.open_table(STATUS).map_err(map_err!(Table))?;
                let key = claim_key(*request_id, actor);
                match read_json::<WorkerStatus, _>(&status, &key)? {
                    Some(s) if s.status == ClaimStatus::Started => {}
                    _ => return Err(LedgerError::rejected(format!("no active claim on {request_id}"))),
                }
                status.remove(key.as_str()).map_err(map_err!(Write))?;
                info!(request = request_id, worker = %actor, %reason, "claim released");
                None
            }
            LedgerAction::RegWorker { url } => {
                let mut workers = txn.open_table(WORKERS).map_err(map_err!(Table))?;
                let record = match read_json::<WorkerRecord, _>(&workers, actor)? {
                    Some(existing) => WorkerRecord {
                        url: url.clone(),
                        ..existing
                    },
                    None => WorkerRecord {
                        account: actor.to_string(),
                        url: url.clone(),
                        cards: Vec::new(),
                        joined_at: now,
                    },
                };
                write_json(&mut workers, actor, &record)?;
                info!(worker = %actor, %url, "worker registered");
                None
            }
            LedgerAction::AddCard { card_type, info } => {
                let mut workers = txn.open_table(WORKERS).map_err(map_err!(Table))?;
                let mut record = registered(&workers, actor)?;
                record.cards.push(GpuCard {
                    index: record.cards.len() as u32,
                    card_type: card_type.clone(),
                    info: info.clone(),
                    enabled: true,
                });
                write_json(&mut workers, actor, &record)?;
                None
            }
            LedgerAction::ToggleCard { index } => {
                let mut workers = txn.open_table(WORKERS).map_err(map_err!(Table))?;
                let mut record = registered(&workers, actor)?;
                let card = record
                    .cards
                    .iter_mut()
                    .find(|c| c.index == *index)
                    .ok_or_else(|| LedgerError::rejected(format!("no card {index}")))?;
                card.enabled = !card.enabled;
                write_json(&mut workers, actor, &record)?;
                None
            }
            LedgerAction::Withdraw { quantity } => {
                let mut balances = txn.open_table(BALANCES).map_err(map_err!(Table))?;
                let balance = balances
                    .get(actor)
                    .map_err(map_err!(Read))?
                    .map(|g| g.value())
                    .unwrap_or(0);
                if balance < *quantity {
                    return Err(LedgerError::rejected(format!(
                        "insufficient balance: {balance} < {quantity}"
                    )));
                }
                balances
                    .insert(actor, balance - quantity)
                    .map_err(map_err!(Write))?;
                None
            }
        };

        let seq = {
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let seq = next_counter(&mut meta, "next_seq")?;
            let mut log = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            let bytes = serde_json::to_vec(signed).map_err(map_err!(Serialize))?;
            log.insert(seq, bytes.as_slice()).map_err(map_err!(Write))?;
            seq
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(seq, actor = %actor, action = signed.action.name(), "action applied");
        Ok(Receipt { seq, request_id })
    }
}

fn work_begin(txn: &WriteTransaction, actor: &str, request_id: RequestId, now: u64) -> LedgerResult<()> {
    let queue = txn.open_table(QUEUE).map_err(map_err!(Table))?;
    if read_json::<QueueEntry, _>(&queue, &request_key(request_id))?.is_none() {
        return Err(LedgerError::rejected(format!("unknown request {request_id}")));
    }
    let workers = txn.open_table(WORKERS).map_err(map_err!(Table))?;
    registered(&workers, actor)?;

    let mut status = txn.open_table(STATUS).map_err(map_err!(Table))?;
    let key = claim_key(request_id, actor);
    if read_json::<WorkerStatus, _>(&status, &key)?.is_some() {
        return Err(LedgerError::rejected(format!("{request_id} already claimed by {actor}")));
    }
    let claim = WorkerStatus {
        worker: actor.to_string(),
        status: ClaimStatus::Started,
        started_at: now,
    };
    write_json(&mut status, &key, &claim)?;
    info!(request = request_id, worker = %actor, "claim started");
    Ok(())
}

/// Record a solution; settle the request once enough have arrived.
fn submit(txn: &WriteTransaction, request_id: RequestId, solution: Solution) -> LedgerResult<()> {
    let worker = solution.worker.clone();
    let mut status = txn.open_table(STATUS).map_err(map_err!(Table))?;
    let key = claim_key(request_id, &worker);
    let mut claim = match read_json::<WorkerStatus, _>(&status, &key)? {
        Some(s) if s.status == ClaimStatus::Started => s,
        _ => return Err(LedgerError::rejected(format!("no active claim on {request_id}"))),
    };
    let mut queue = txn.open_table(QUEUE).map_err(map_err!(Table))?;
    let entry: QueueEntry = read_json(&queue, &request_key(request_id))?
        .ok_or_else(|| LedgerError::rejected(format!("unknown request {request_id}")))?;

    claim.status = ClaimStatus::Solved;
    write_json(&mut status, &key, &claim)?;
    let mut solutions = txn.open_table(SOLUTIONS).map_err(map_err!(Table))?;
    write_json(&mut solutions, &key, &solution)?;
    info!(request = request_id, %worker, cid = %solution.cid, "solution submitted");

    let solved = scan_prefix::<Solution, _>(&solutions, &claim_prefix(request_id))?;
    if (solved.len() as u32) < entry.min_verification {
        return Ok(());
    }

    let mut balances = txn.open_table(BALANCES).map_err(map_err!(Table))?;
    for (_, s) in &solved {
        let current = balances
            .get(s.worker.as_str())
            .map_err(map_err!(Read))?
            .map(|g| g.value())
            .unwrap_or(0);
        balances
            .insert(s.worker.as_str(), current + entry.reward)
            .map_err(map_err!(Write))?;
    }
    queue
        .remove(request_key(request_id).as_str())
        .map_err(map_err!(Write))?;
    let claims: Vec<String> = scan_prefix::<WorkerStatus, _>(&status, &claim_prefix(request_id))?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    for k in claims {
        status.remove(k.as_str()).map_err(map_err!(Write))?;
    }
    info!(request = request_id, solutions = solved.len(), reward = entry.reward, "request settled");
    Ok(())
}

fn registered<R>(workers: &R, actor: &str) -> LedgerResult<WorkerRecord>
where
    R: ReadableTable<&'static str, &'static [u8]>,
{
    read_json(workers, actor)?.ok_or_else(|| LedgerError::rejected(format!("{actor} is not a registered worker")))
}

fn next_counter(meta: &mut Table<&'static str, u64>, key: &str) -> LedgerResult<u64> {
    let current = meta.get(key).map_err(map_err!(Read))?.map(|g| g.value()).unwrap_or(1);
    meta.insert(key, current + 1).map_err(map_err!(Write))?;
    Ok(current)
}

fn read_json<T, R>(table: &R, key: &str) -> LedgerResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => serde_json::from_slice(guard.value())
            .map(Some)
            .map_err(map_err!(Deserialize)),
        None => Ok(None),
    }
}

fn write_json<T: Serialize>(table: &mut Table<&'static str, &'static [u8]>, key: &str, value: &T) -> LedgerResult<()> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
    table.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
    Ok(())
}

fn scan_prefix<T, R>(table: &R, prefix: &str) -> LedgerResult<Vec<(String, T)>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if key.value().starts_with(prefix) {
            let parsed: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push((key.value().to_string(), parsed));
        }
    }
    Ok(results)
}

impl Ledger for LocalLedger {
    async fn queue(&self) -> LedgerResult<Vec<QueueEntry>> {
        self.list_queue()
    }

    async fn worker_status(&self, request_id: RequestId) -> LedgerResult<Vec<WorkerStatus>> {
        self.statuses(request_id)
    }

    async fn claims_of(&self, worker: &str) -> LedgerResult<Vec<RequestId>> {
        self.active_claims(worker)
    }

    async fn workers(&self) -> LedgerResult<Vec<WorkerRecord>> {
        self.list_workers()
    }

    async fn push(&self, action: SignedAction) -> LedgerResult<Receipt> {
        self.apply(&action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::{DiffuseParams, JobBody};
    use swarmgrid_auth::{CertStore, Signer};

    fn body() -> String {
        JobBody::Diffuse(DiffuseParams::new("sd-1.5", "a lighthouse"))
            .to_body()
            .unwrap()
    }

    fn act(ledger: &LocalLedger, actor: &str, action: LedgerAction) -> LedgerResult<Receipt> {
        ledger.apply(&SignedAction::new(actor, action))
    }

    fn enqueue(ledger: &LocalLedger, reward: u64, min_verification: u32) -> RequestId {
        act(
            ledger,
            "alice",
            LedgerAction::Enqueue {
                body: body(),
                inputs: Vec::new(),
                reward,
                min_verification,
            },
        )
        .unwrap()
        .request_id
        .unwrap()
    }

    fn register(ledger: &LocalLedger, worker: &str) {
        act(ledger, worker, LedgerAction::RegWorker { url: format!("https://{worker}") }).unwrap();
    }

    fn begin(ledger: &LocalLedger, worker: &str, request_id: RequestId) -> LedgerResult<Receipt> {
        act(ledger, worker, LedgerAction::WorkBegin { request_id })
    }

    fn submit_action(request_id: RequestId) -> LedgerAction {
        LedgerAction::Submit {
            request_id,
            request_hash: "aa".to_string(),
            result_hash: "bb".to_string(),
            cid: "QmResult".to_string(),
        }
    }

    // ── Queue and claims ───────────────────────────────────────────

    #[test]
    fn enqueue_assigns_increasing_ids() {
        let ledger = LocalLedger::open_in_memory().unwrap();
        let a = enqueue(&ledger, 10, 1);
        let b = enqueue(&ledger, 30, 1);
        assert!(b > a);

        let queue = ledger.list_queue().unwrap();
        assert_eq!(queue.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(queue[1].reward, 30);
        assert_eq!(queue[0].requester, "alice");
    }

    #[test]
    fn zero_verification_is_rejected() {
        let ledger = LocalLedger::open_in_memory().unwrap();
        let err = act(
            &ledger,
            "alice",
            LedgerAction::Enqueue {
                body: body(),
                inputs: Vec::new(),
                reward: 1,
                min_verification: 0,
            },
        )
        .unwrap_err();
        assert!(err.is_rejected());
        assert!(ledger.list_queue().unwrap().is_empty());
    }

    #[test]
    fn claim_rules() {
        let ledger = LocalLedger::open_in_memory().unwrap();
        let id = enqueue(&ledger, 10, 1);

        assert!(begin(&ledger, "w1", id).unwrap_err().is_rejected(), "unregistered");
        register(&ledger, "w1");
        register(&ledger, "w2");
        assert!(begin(&ledger, "w1", 999).unwrap_err().is_rejected(), "unknown request");

        begin(&ledger, "w1", id).unwrap();
        assert!(begin(&ledger, "w1", id).unwrap_err().is_rejected(), "double claim");
        begin(&ledger, "w2", id).unwrap();

        let statuses = ledger.statuses(id).unwrap();
        let workers: Vec<_> = statuses.iter().map(|s| s.worker.as_str()).collect();
        assert_eq!(workers, vec!["w1", "w2"]);
        assert_eq!(ledger.active_claims("w1").unwrap(), vec![id]);
    }

    #[test]
    fn cancel_releases_claim() {
        let ledger = LocalLedger::open_in_memory().unwrap();
        let id = enqueue(&ledger, 10, 1);
        register(&ledger, "w1");
        begin(&ledger, "w1", id).unwrap();

        let cancel = LedgerAction::WorkCancel {
            request_id: id,
            reason: "input unresolvable".to_string(),
        };
        act(&ledger, "w1", cancel.clone()).unwrap();
        assert!(ledger.active_claims("w1").unwrap().is_empty());
        assert!(act(&ledger, "w1", cancel).unwrap_err().is_rejected());

        begin(&ledger, "w1", id).unwrap();
    }

    // ── Submission ─────────────────────────────────────────────────

    #[test]
    fn submit_requires_claim() {
        let ledger = LocalLedger::open_in_memory().unwrap();
        let id = enqueue(&ledger, 10, 1);
        register(&ledger, "w1");
        assert!(act(&ledger, "w1", submit_action(id)).unwrap_err().is_rejected());
    }

    #[test]
    fn single_verification_settles_request() {
        let ledger = LocalLedger::open_in_memory().unwrap();
        let id = enqueue(&ledger, 25, 1);
        register(&ledger, "w1");
        begin(&ledger, "w1", id).unwrap();
        act(&ledger, "w1", submit_action(id)).unwrap();

        assert!(ledger.get_request(id).unwrap().is_none());
        assert!(ledger.statuses(id).unwrap().is_empty());
        assert_eq!(ledger.balance("w1").unwrap(), 25);
        let solutions = ledger.solutions(id).unwrap();
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].cid, "QmResult");
    }

    #[test]
    fn request_waits_for_enough_solutions() {
        let ledger = LocalLedger::open_in_memory().unwrap();
        let id = enqueue(&ledger, 10, 2);
        register(&ledger, "w1");
        register(&ledger, "w2");
        begin(&ledger, "w1", id).unwrap();
        begin(&ledger, "w2", id).unwrap();

        act(&ledger, "w1", submit_action(id)).unwrap();
        assert!(ledger.get_request(id).unwrap().is_some());
        assert!(ledger.active_claims("w1").unwrap().is_empty(), "solved is not active");
        assert_eq!(ledger.balance("w1").unwrap(), 0);

        act(&ledger, "w2", submit_action(id)).unwrap();
        assert!(ledger.get_request(id).unwrap().is_none());
        assert_eq!(ledger.balance("w1").unwrap(), 10);
        assert_eq!(ledger.balance("w2").unwrap(), 10);
    }

    // ── Worker records ─────────────────────────────────────────────

    #[test]
    fn cards_and_withdrawals() {
        let ledger = LocalLedger::open_in_memory().unwrap();
        assert!(
            act(
                &ledger,
                "w1",
                LedgerAction::AddCard {
                    card_type: "rtx4090".to_string(),
                    info: String::new()
                }
            )
            .unwrap_err()
            .is_rejected()
        );

        register(&ledger, "w1");
        let add = LedgerAction::AddCard {
            card_type: "rtx4090".to_string(),
            info: "24GB".to_string(),
        };
        act(&ledger, "w1", add).unwrap();
        act(&ledger, "w1", LedgerAction::ToggleCard { index: 0 }).unwrap();
        assert!(
            act(&ledger, "w1", LedgerAction::ToggleCard { index: 5 })
                .unwrap_err()
                .is_rejected()
        );
        let record = &ledger.list_workers().unwrap()[0];
        assert_eq!(record.cards.len(), 1);
        assert!(!record.cards[0].enabled);

        let id = enqueue(&ledger, 40, 1);
        begin(&ledger, "w1", id).unwrap();
        act(&ledger, "w1", submit_action(id)).unwrap();
        assert!(
            act(&ledger, "w1", LedgerAction::Withdraw { quantity: 41 })
                .unwrap_err()
                .is_rejected()
        );
        act(&ledger, "w1", LedgerAction::Withdraw { quantity: 15 }).unwrap();
        assert_eq!(ledger.balance("w1").unwrap(), 25);
    }

    #[test]
    fn reregistering_keeps_cards() {
        let ledger = LocalLedger::open_in_memory().unwrap();
        register(&ledger, "w1");
        act(
            &ledger,
            "w1",
            LedgerAction::AddCard {
                card_type: "a100".to_string(),
                info: String::new(),
            },
        )
        .unwrap();
        act(&ledger, "w1", LedgerAction::RegWorker { url: "https://new".to_string() }).unwrap();
        let record = &ledger.list_workers().unwrap()[0];
        assert_eq!(record.url, "https://new");
        assert_eq!(record.cards.len(), 1);
    }

    // ── Authentication and log ─────────────────────────────────────

    #[test]
    fn signatures_enforced_when_configured() {
        let signer = Signer::generate("w1");
        let mut certs = CertStore::new();
        certs.insert(signer.certificate());
        let ledger = LocalLedger::open_in_memory()
            .unwrap()
            .with_authenticator(Authenticator::new(certs));

        let unsigned = SignedAction::new("w1", LedgerAction::RegWorker { url: String::new() });
        assert!(ledger.apply(&unsigned).unwrap_err().is_rejected());

        let signed = unsigned.signed(&signer).unwrap();
        ledger.apply(&signed).unwrap();
        assert_eq!(ledger.list_workers().unwrap().len(), 1);
    }

    #[test]
    fn rejected_actions_leave_no_log_entry() {
        let ledger = LocalLedger::open_in_memory().unwrap();
        register(&ledger, "w1");
        assert_eq!(ledger.action_count().unwrap(), 1);
        assert!(begin(&ledger, "w1", 42).is_err());
        assert_eq!(ledger.action_count().unwrap(), 1);
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.redb");
        let id = {
            let ledger = LocalLedger::open(&path).unwrap();
            enqueue(&ledger, 10, 1)
        };
        let ledger = LocalLedger::open(&path).unwrap();
        assert_eq!(ledger.get_request(id).unwrap().unwrap().reward, 10);
        assert!(enqueue(&ledger, 5, 1) > id);
    }

    #[tokio::test]
    async fn trait_reads_match_store() {
        let ledger = LocalLedger::open_in_memory().unwrap();
        let id = enqueue(&ledger, 10, 1);
        ledger
            .push(SignedAction::new("w1", LedgerAction::RegWorker { url: String::new() }))
            .await
            .unwrap();
        ledger
            .push(SignedAction::new("w1", LedgerAction::WorkBegin { request_id: id }))
            .await
            .unwrap();

        assert_eq!(ledger.queue().await.unwrap().len(), 1);
        assert_eq!(ledger.worker_status(id).await.unwrap()[0].worker, "w1");
        assert_eq!(ledger.claims_of("w1").await.unwrap(), vec![id]);
        assert_eq!(ledger.workers().await.unwrap()[0].account, "w1");
    }
}
