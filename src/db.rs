//! Master persistence: job definitions, nodes and run records.
//!
//! Two backends implement the repository traits: [`MongoStore`] for
//! deployments and [`MemoryStore`] for tests and single-process setups.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};

use crate::config::Database;
use crate::error::{Error, Result};
use crate::job::{Active, JobDefinition, JobRecord, NodeDescriptor};

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 50;

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub node_id: Option<i64>,
    pub user_id: Option<i64>,
    pub active: Option<Active>,
}

impl JobFilter {
    fn matches(&self, job: &JobDefinition) -> bool {
        self.node_id.map_or(true, |n| job.node_id == n)
            && self.user_id.map_or(true, |u| job.user_id == u)
            && self.active.map_or(true, |a| job.active == a)
    }
}

/// 1-based page request. Sizes are clamped to `1..=MAX_PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub num: u64,
    pub size: u64,
}

impl Page {
    pub fn new(num: Option<u64>, size: Option<u64>) -> Self {
        let size = match size {
            None | Some(0) => DEFAULT_PAGE_SIZE,
            Some(s) => s.min(MAX_PAGE_SIZE),
        };
        Self {
            num: num.unwrap_or(1).max(1),
            size,
        }
    }

    // Capped at i64::MAX so absurd page numbers still make a valid Mongo skip.
    fn skip(&self) -> u64 {
        (self.num - 1).saturating_mul(self.size).min(i64::MAX as u64)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    pub total: u64,
    pub page_num: u64,
    pub page_size: u64,
    pub data: Vec<JobRecord>,
}

#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Assigns an id when `job.id` is zero.
    async fn insert_job(&self, job: JobDefinition) -> Result<JobDefinition>;
    async fn get_job(&self, id: i64) -> Result<Option<JobDefinition>>;
    async fn update_job(&self, job: &JobDefinition) -> Result<()>;
    async fn delete_job(&self, id: i64) -> Result<()>;
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobDefinition>>;
}

#[async_trait]
pub trait NodeRepo: Send + Sync {
    async fn insert_node(&self, node: NodeDescriptor) -> Result<NodeDescriptor>;
    async fn get_node(&self, id: i64) -> Result<Option<NodeDescriptor>>;
    async fn list_nodes(&self) -> Result<Vec<NodeDescriptor>>;
    async fn delete_node(&self, id: i64) -> Result<()>;
}

/// Run history is append-only; rows are only removed by explicit deletes.
#[async_trait]
pub trait JobRecordRepo: Send + Sync {
    async fn insert_record(&self, record: JobRecord) -> Result<JobRecord>;
    async fn get_record(&self, id: i64) -> Result<Option<JobRecord>>;
    /// Newest first. `None` lists across all jobs.
    async fn list_records(&self, job_id: Option<i64>, page: Page) -> Result<RecordPage>;
    async fn delete_record(&self, id: i64) -> Result<()>;
}

#[derive(Default)]
struct Tables {
    jobs: BTreeMap<i64, JobDefinition>,
    nodes: BTreeMap<i64, NodeDescriptor>,
    records: BTreeMap<i64, JobRecord>,
    next_job: i64,
    next_node: i64,
    next_record: i64,
}

fn assign(id: i64, next: &mut i64) -> i64 {
    if id > 0 {
        *next = (*next).max(id);
        id
    } else {
        *next += 1;
        *next
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobRepo for MemoryStore {
    async fn insert_job(&self, mut job: JobDefinition) -> Result<JobDefinition> {
        let mut tables = self.tables();
        job.id = assign(job.id, &mut tables.next_job);
        tables.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: i64) -> Result<Option<JobDefinition>> {
        Ok(self.tables().jobs.get(&id).cloned())
    }

    async fn update_job(&self, job: &JobDefinition) -> Result<()> {
        let mut tables = self.tables();
        match tables.jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(Error::JobNotFound(job.id)),
        }
    }

    async fn delete_job(&self, id: i64) -> Result<()> {
        self.tables().jobs.remove(&id);
        Ok(())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobDefinition>> {
        Ok(self
            .tables()
            .jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NodeRepo for MemoryStore {
    async fn insert_node(&self, mut node: NodeDescriptor) -> Result<NodeDescriptor> {
        let mut tables = self.tables();
        node.id = assign(node.id, &mut tables.next_node);
        tables.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    async fn get_node(&self, id: i64) -> Result<Option<NodeDescriptor>> {
        Ok(self.tables().nodes.get(&id).cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeDescriptor>> {
        Ok(self.tables().nodes.values().cloned().collect())
    }

    async fn delete_node(&self, id: i64) -> Result<()> {
        self.tables().nodes.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl JobRecordRepo for MemoryStore {
    async fn insert_record(&self, mut record: JobRecord) -> Result<JobRecord> {
        let mut tables = self.tables();
        record.id = assign(record.id, &mut tables.next_record);
        tables.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_record(&self, id: i64) -> Result<Option<JobRecord>> {
        Ok(self.tables().records.get(&id).cloned())
    }

    async fn list_records(&self, job_id: Option<i64>, page: Page) -> Result<RecordPage> {
        let tables = self.tables();
        let matching: Vec<&JobRecord> = tables
            .records
            .values()
            .rev()
            .filter(|r| job_id.map_or(true, |id| r.job_id == id))
            .collect();
        Ok(RecordPage {
            total: matching.len() as u64,
            page_num: page.num,
            page_size: page.size,
            data: matching
                .into_iter()
                .skip(usize::try_from(page.skip()).unwrap_or(usize::MAX))
                .take(page.size as usize)
                .cloned()
                .collect(),
        })
    }

    async fn delete_record(&self, id: i64) -> Result<()> {
        self.tables().records.remove(&id);
        Ok(())
    }
}

const JOB_COLLECTION: &str = "job";
const NODE_COLLECTION: &str = "node";
const RECORD_COLLECTION: &str = "job_record";
const COUNTER_COLLECTION: &str = "counters";

/// MongoDB backend. Integer ids come from a `counters` collection.
pub struct MongoStore {
    db: mongodb::Database,
}

impl MongoStore {
    pub async fn connect(config: &Database) -> Result<MongoStore> {
        let url = format!(
            "mongodb+srv://{}:{}@{}/{}?w=majority",
            config.username, config.password, config.cluster_url, config.name
        );
        let client_options = ClientOptions::parse(url).await?;
        let client = Client::with_options(client_options)?;
        client
            .database("admin")
            .run_command(doc! {"ping": 1}, None)
            .await?;
        tracing::info!(cluster = %config.cluster_url, database = %config.name, "connected to mongodb");
        Ok(MongoStore {
            db: client.database(&config.name),
        })
    }

    fn jobs(&self) -> Collection<JobDefinition> {
        self.db.collection(JOB_COLLECTION)
    }

    fn nodes(&self) -> Collection<NodeDescriptor> {
        self.db.collection(NODE_COLLECTION)
    }

    fn records(&self) -> Collection<JobRecord> {
        self.db.collection(RECORD_COLLECTION)
    }

    async fn next_id(&self, name: &str) -> Result<i64> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let counter = self
            .db
            .collection::<Document>(COUNTER_COLLECTION)
            .find_one_and_update(doc! {"_id": name}, doc! {"$inc": {"seq": 1i64}}, options)
            .await?
            .ok_or_else(|| Error::Internal(format!("counter {} missing after upsert", name)))?;
        counter
            .get_i64("seq")
            .map_err(|e| Error::Internal(format!("counter {}: {}", name, e)))
    }
}

fn job_filter_doc(filter: &JobFilter) -> Result<Document> {
    let mut query = Document::new();
    if let Some(node_id) = filter.node_id {
        query.insert("node_id", node_id);
    }
    if let Some(user_id) = filter.user_id {
        query.insert("user_id", user_id);
    }
    if let Some(active) = filter.active {
        let value = mongodb::bson::to_bson(&active).map_err(|e| Error::Internal(e.to_string()))?;
        query.insert("active", value);
    }
    Ok(query)
}

#[async_trait]
impl JobRepo for MongoStore {
    async fn insert_job(&self, mut job: JobDefinition) -> Result<JobDefinition> {
        if job.id <= 0 {
            job.id = self.next_id(JOB_COLLECTION).await?;
        }
        self.jobs().insert_one(&job, None).await?;
        Ok(job)
    }

    async fn get_job(&self, id: i64) -> Result<Option<JobDefinition>> {
        Ok(self.jobs().find_one(doc! {"id": id}, None).await?)
    }

    async fn update_job(&self, job: &JobDefinition) -> Result<()> {
        let result = self.jobs().replace_one(doc! {"id": job.id}, job, None).await?;
        if result.matched_count == 0 {
            return Err(Error::JobNotFound(job.id));
        }
        Ok(())
    }

    async fn delete_job(&self, id: i64) -> Result<()> {
        self.jobs().delete_one(doc! {"id": id}, None).await?;
        Ok(())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobDefinition>> {
        let options = FindOptions::builder().sort(doc! {"id": 1}).build();
        let cursor = self.jobs().find(job_filter_doc(filter)?, options).await?;
        Ok(cursor.try_collect().await?)
    }
}

#[async_trait]
impl NodeRepo for MongoStore {
    async fn insert_node(&self, mut node: NodeDescriptor) -> Result<NodeDescriptor> {
        if node.id <= 0 {
            node.id = self.next_id(NODE_COLLECTION).await?;
        }
        self.nodes().insert_one(&node, None).await?;
        Ok(node)
    }

    async fn get_node(&self, id: i64) -> Result<Option<NodeDescriptor>> {
        Ok(self.nodes().find_one(doc! {"id": id}, None).await?)
    }

    async fn list_nodes(&self) -> Result<Vec<NodeDescriptor>> {
        let options = FindOptions::builder().sort(doc! {"id": 1}).build();
        let cursor = self.nodes().find(doc! {}, options).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn delete_node(&self, id: i64) -> Result<()> {
        self.nodes().delete_one(doc! {"id": id}, None).await?;
        Ok(())
    }
}

#[async_trait]
impl JobRecordRepo for MongoStore {
    async fn insert_record(&self, mut record: JobRecord) -> Result<JobRecord> {
        if record.id <= 0 {
            record.id = self.next_id(RECORD_COLLECTION).await?;
        }
        self.records().insert_one(&record, None).await?;
        Ok(record)
    }

    async fn get_record(&self, id: i64) -> Result<Option<JobRecord>> {
        Ok(self.records().find_one(doc! {"id": id}, None).await?)
    }

    async fn list_records(&self, job_id: Option<i64>, page: Page) -> Result<RecordPage> {
        let filter = match job_id {
            Some(id) => doc! {"job_id": id},
            None => doc! {},
        };
        let total = self.records().count_documents(filter.clone(), None).await?;
        let options = FindOptions::builder()
            .sort(doc! {"id": -1})
            .skip(page.skip())
            .limit(page.size as i64)
            .build();
        let cursor = self.records().find(filter, options).await?;
        Ok(RecordPage {
            total,
            page_num: page.num,
            page_size: page.size,
            data: cursor.try_collect().await?,
        })
    }

    async fn delete_record(&self, id: i64) -> Result<()> {
        self.records().delete_one(doc! {"id": id}, None).await?;
        Ok(())
    }
}
