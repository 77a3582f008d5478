//! Batch validation: sequential, or fanned out over a persistent pool of
//! worker threads that each own a read-only [`Engine`].

use crate::checks::CheckRegistry;
use crate::config::CoordinationConfig;
use crate::coordination::provider_for;
use crate::engine::{schema_identity, Engine};
use crate::error::{Result, VlibError};
use crate::fetch::LogicDir;
use crate::rule::RuleResult;
use crate::schema::SchemaIdentity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

pub const UNKNOWN: &str = "unknown";
pub const DEFAULT_ID_FIELD: &str = "id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityReport {
    pub entity_id: String,
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<RuleResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntityReport {
    pub fn failed(entity_id: String, entity_type: String, error: impl Into<String>) -> Self {
        Self {
            entity_id,
            entity_type,
            results: None,
            error: Some(error.into()),
        }
    }

    pub fn without_timing(&self) -> Self {
        Self {
            results: self
                .results
                .as_ref()
                .map(|rs| rs.iter().map(RuleResult::without_timing).collect()),
            ..self.clone()
        }
    }
}

pub fn default_id_fields() -> Vec<String> {
    vec![DEFAULT_ID_FIELD.to_string()]
}

/// Non-empty values of `id_fields` joined with `-`, or `"unknown"`.
pub fn extract_id(entity: &Value, id_fields: &[String]) -> String {
    let parts: Vec<String> = id_fields
        .iter()
        .filter_map(|f| match entity.get(f)? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
        .collect();
    if parts.is_empty() {
        UNKNOWN.to_string()
    } else {
        parts.join("-")
    }
}

/// Entity type from the `$schema` identity, else the `entity_type` field.
pub fn determine_entity_type(entity: &Value) -> Result<String> {
    if let Some(id) = schema_identity(entity).and_then(SchemaIdentity::parse) {
        return Ok(id.entity);
    }
    match entity.get("entity_type").and_then(Value::as_str) {
        Some(t) if !t.is_empty() => Ok(t.to_string()),
        _ => Err(VlibError::EntityType(
            "record has no versioned $schema and no entity_type field".to_string(),
        )),
    }
}

/// Validate one record; every failure becomes an error record.
pub fn validate_one(engine: &Engine, entity: &Value, id_fields: &[String], ruleset: &str) -> EntityReport {
    let entity_id = extract_id(entity, id_fields);
    let entity_type = match determine_entity_type(entity) {
        Ok(t) => t,
        Err(e) => return EntityReport::failed(entity_id, UNKNOWN.to_string(), e.to_string()),
    };
    match engine.validate(&entity_type, entity, ruleset) {
        Ok(results) => EntityReport {
            entity_id,
            entity_type,
            results: Some(results),
            error: None,
        },
        Err(e) => {
            warn!(entity = entity_id.as_str(), error = %e, "entity validation failed");
            EntityReport::failed(entity_id, entity_type, e.to_string())
        }
    }
}

pub fn run_sequential(engine: &Engine, entities: &[Value], id_fields: &[String], ruleset: &str) -> Vec<EntityReport> {
    entities
        .iter()
        .map(|e| validate_one(engine, e, id_fields, ruleset))
        .collect()
}

/// Run a batch on the pool when one is running, otherwise in order on `engine`.
pub fn batch(
    engine: &Engine,
    pool: Option<&WorkerPool>,
    entities: Vec<Value>,
    id_fields: &[String],
    ruleset: &str,
) -> Result<Vec<EntityReport>> {
    match pool {
        Some(pool) => pool.run(entities, id_fields, ruleset),
        None => Ok(run_sequential(engine, &entities, id_fields, ruleset)),
    }
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// What a worker needs to build its own engine. No fetcher: workers read
/// the local mirror and never refresh it.
#[derive(Debug, Clone)]
pub struct WorkerSeed {
    pub logic_dir: LogicDir,
    pub checks: Arc<CheckRegistry>,
    pub coordination: CoordinationConfig,
}

impl WorkerSeed {
    pub fn build_engine(&self) -> Result<Engine> {
        Engine::open(
            &self.logic_dir,
            Arc::clone(&self.checks),
            Arc::from(provider_for(&self.coordination)),
        )
    }
}

type Reply = (usize, EntityReport);

struct Job {
    index: usize,
    entity: Value,
    id_fields: Arc<[String]>,
    ruleset: Arc<str>,
    reply: Sender<Reply>,
}

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers and wait until each has built its engine.
    pub fn start(seed: &WorkerSeed, size: usize) -> Result<Self> {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();

        let mut pool = Self {
            sender: Some(tx),
            workers: Vec::with_capacity(size),
        };
        for n in 0..size {
            let rx = Arc::clone(&rx);
            let ready = ready_tx.clone();
            let seed = seed.clone();
            let spawned = thread::Builder::new()
                .name(format!("vlib-worker-{n}"))
                .spawn(move || worker_loop(n, seed, rx, ready));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(VlibError::WorkerPool(format!("spawn worker {n}: {e}")));
                }
            }
        }
        drop(ready_tx);

        for _ in 0..size {
            let reason = match ready_rx.recv() {
                Ok(Ok(())) => continue,
                Ok(Err(reason)) => reason,
                Err(_) => "worker exited during startup".to_string(),
            };
            pool.shutdown();
            return Err(VlibError::WorkerPool(reason));
        }
        info!(workers = size, "worker pool started");
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Dispatch every entity and block until all have reported. Output order
    /// equals input order.
    pub fn run(&self, entities: Vec<Value>, id_fields: &[String], ruleset: &str) -> Result<Vec<EntityReport>> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| VlibError::WorkerPool("pool is shut down".to_string()))?;
        let id_fields: Arc<[String]> = id_fields.into();
        let ruleset: Arc<str> = ruleset.into();
        let (reply_tx, reply_rx) = mpsc::channel::<Reply>();

        let mut labels = Vec::with_capacity(entities.len());
        for (index, entity) in entities.into_iter().enumerate() {
            labels.push((
                extract_id(&entity, &id_fields),
                determine_entity_type(&entity).unwrap_or_else(|_| UNKNOWN.to_string()),
            ));
            let job = Job {
                index,
                entity,
                id_fields: Arc::clone(&id_fields),
                ruleset: Arc::clone(&ruleset),
                reply: reply_tx.clone(),
            };
            if sender.send(job).is_err() {
                warn!(index, "no live workers; remaining entities left unanswered");
            }
        }
        drop(reply_tx);
        debug!(entities = labels.len(), workers = self.workers.len(), "batch dispatched");

        Ok(assemble(labels, reply_rx))
    }

    /// Close the queue, let workers drain it and join them.
    pub fn shutdown(&mut self) {
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Place replies by input index; slots nobody answered become error records.
fn assemble(labels: Vec<(String, String)>, replies: impl IntoIterator<Item = Reply>) -> Vec<EntityReport> {
    let mut slots: Vec<Option<EntityReport>> = labels.iter().map(|_| None).collect();
    for (index, report) in replies {
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(report);
        }
    }
    slots
        .into_iter()
        .zip(labels)
        .map(|(slot, (entity_id, entity_type))| {
            slot.unwrap_or_else(|| {
                EntityReport::failed(entity_id, entity_type, "worker exited before reporting")
            })
        })
        .collect()
}

fn worker_loop(
    n: usize,
    seed: WorkerSeed,
    jobs: Arc<Mutex<Receiver<Job>>>,
    ready: Sender<std::result::Result<(), String>>,
) {
    let engine = match seed.build_engine() {
        Ok(engine) => engine,
        Err(e) => {
            let _ = ready.send(Err(format!("worker {n}: {e}")));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    drop(ready);

    loop {
        let next = jobs.lock().unwrap_or_else(|p| p.into_inner()).recv();
        let Ok(job) = next else { break };
        let report = catch_unwind(AssertUnwindSafe(|| {
            validate_one(&engine, &job.entity, &job.id_fields, &job.ruleset)
        }))
        .unwrap_or_else(|_| {
            EntityReport::failed(
                extract_id(&job.entity, &job.id_fields),
                determine_entity_type(&job.entity).unwrap_or_else(|_| UNKNOWN.to_string()),
                format!("worker {n} panicked while validating"),
            )
        });
        let _ = job.reply.send((job.index, report));
    }
    debug!(worker = n, "worker stopped");
}
