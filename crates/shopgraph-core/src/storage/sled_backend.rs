//! Reference backing store on sled.
//!
//! Each entity type lives in its own tree (`entity:<name>`), keyed by the
//! order-preserving encoding of its identity and holding rkyv-encoded
//! [`StoredEntity`] records. A query step is one round trip: scan the root
//! tree, filter, order and paginate the roots, then hash-join each relation
//! and project the requested columns.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use shopgraph_proto::{IdentityKey, OrderDirection, Value};
use sled::{Db, Tree};
use tracing::{debug, info};

use super::config::StorageConfig;
use super::filter::{sort_order, FilterEvaluator};
use super::record::StoredEntity;
use crate::error::StorageError;
use crate::exec::{BackendError, QueryBackend, ResultRow, RowSet};
use crate::graph::{Cardinality, EntityType};
use crate::plan::QueryStep;

/// Prefix of entity tree names.
const TREE_PREFIX: &str = "entity:";

/// A partially joined row: one slot per joined path, root first.
type JoinedRow = Vec<Option<Rc<StoredEntity>>>;

/// sled-backed [`QueryBackend`].
///
/// Cheap to clone; clones share the database and the round-trip counter.
#[derive(Clone)]
pub struct SledBackend {
    db: Db,
    round_trips: Arc<AtomicU64>,
}

impl SledBackend {
    /// Open or create a store.
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let db = config.to_sled_config().open()?;
        info!(
            path = %config.path.display(),
            temporary = config.temporary,
            recovered = db.was_recovered(),
            "opened store"
        );
        Ok(Self {
            db,
            round_trips: Arc::new(AtomicU64::new(0)),
        })
    }

    fn tree(&self, entity: &str) -> Result<Tree, StorageError> {
        Ok(self.db.open_tree(format!("{TREE_PREFIX}{entity}"))?)
    }

    /// Insert or replace an entity instance.
    pub fn insert(
        &self,
        entity: &EntityType,
        fields: Vec<(String, Value)>,
    ) -> Result<(), StorageError> {
        let key = fields
            .iter()
            .find(|(name, _)| *name == entity.identity_field)
            .and_then(|(_, value)| value.identity_key())
            .ok_or_else(|| StorageError::MissingIdentity {
                entity: entity.name.clone(),
                field: entity.identity_field.clone(),
            })?;
        let record = StoredEntity::new(fields);
        self.tree(&entity.name)?
            .insert(key.encode(), record.to_bytes()?)?;
        Ok(())
    }

    /// Get an entity instance by identity.
    pub fn get(&self, entity: &str, id: &Value) -> Result<Option<StoredEntity>, StorageError> {
        let Some(key) = id.identity_key() else {
            return Ok(None);
        };
        match self.tree(entity)?.get(key.encode())? {
            Some(bytes) => Ok(Some(StoredEntity::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All instances of an entity type in identity order.
    pub fn scan(&self, entity: &str) -> Result<Vec<StoredEntity>, StorageError> {
        self.tree(entity)?
            .iter()
            .map(|item| {
                let (_, bytes) = item?;
                StoredEntity::from_bytes(&bytes)
            })
            .collect()
    }

    /// Number of stored instances of an entity type.
    pub fn count(&self, entity: &str) -> Result<usize, StorageError> {
        Ok(self.tree(entity)?.len())
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    /// Round trips served since the store was opened.
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    /// Execute one step synchronously.
    fn run_step(&self, step: &QueryStep, root_ids: Option<&[Value]>) -> Result<RowSet, StorageError> {
        let roots = self.select_roots(step, root_ids)?;

        let mut paths: Vec<&str> = vec![""];
        let mut rows: Vec<JoinedRow> = roots.into_iter().map(|r| vec![Some(r)]).collect();

        for join in &step.joins {
            let parent = paths.iter().position(|p| *p == join.parent).ok_or_else(|| {
                StorageError::InvalidStep(format!(
                    "join '{}' references unjoined path '{}'",
                    join.path, join.parent
                ))
            })?;
            let index = self.join_index(&join.target, &join.foreign_field)?;

            let mut joined = Vec::with_capacity(rows.len());
            for row in rows {
                let matches = row[parent]
                    .as_ref()
                    .and_then(|owner| owner.get(&join.local_field))
                    .and_then(Value::identity_key)
                    .and_then(|key| index.get(&key))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let matches = match join.cardinality {
                    Cardinality::One => &matches[..matches.len().min(1)],
                    Cardinality::Many => matches,
                };

                if matches.is_empty() {
                    let mut row = row;
                    row.push(None);
                    joined.push(row);
                    continue;
                }
                for target in matches {
                    let mut extended = row.clone();
                    extended.push(Some(Rc::clone(target)));
                    joined.push(extended);
                }
            }
            rows = joined;
            paths.push(&join.path);
        }

        let slots: Vec<Option<usize>> = step
            .columns
            .iter()
            .map(|c| paths.iter().position(|p| *p == c.path))
            .collect();
        let rows = rows
            .into_iter()
            .map(|row| {
                let values = step
                    .columns
                    .iter()
                    .zip(&slots)
                    .map(|(column, slot)| {
                        slot.and_then(|i| row[i].as_ref())
                            .and_then(|entity| entity.get(&column.field))
                            .cloned()
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                ResultRow::new(values)
            })
            .collect();

        Ok(RowSet::new(step.id, rows))
    }

    /// Roots of a step: by explicit id set (in the given order) or by scan,
    /// then filtered, ordered and paginated.
    fn select_roots(
        &self,
        step: &QueryStep,
        root_ids: Option<&[Value]>,
    ) -> Result<Vec<Rc<StoredEntity>>, StorageError> {
        let mut roots = match root_ids {
            Some(ids) => {
                let tree = self.tree(&step.entity)?;
                let mut roots = Vec::with_capacity(ids.len());
                for key in ids.iter().filter_map(Value::identity_key) {
                    if let Some(bytes) = tree.get(key.encode())? {
                        roots.push(StoredEntity::from_bytes(&bytes)?);
                    }
                }
                roots
            }
            None => self.scan(&step.entity)?,
        };

        if !step.root_ids.is_empty() {
            let wanted: HashSet<IdentityKey> =
                step.root_ids.iter().filter_map(Value::identity_key).collect();
            roots.retain(|r| {
                r.get(&step.identity_field)
                    .and_then(Value::identity_key)
                    .is_some_and(|k| wanted.contains(&k))
            });
        }
        if let Some(filter) = &step.filter {
            roots.retain(|r| FilterEvaluator::evaluate(filter, r));
        }
        if !step.order_by.is_empty() {
            roots.sort_by(|a, b| {
                step.order_by
                    .iter()
                    .map(|o| {
                        let ord = sort_order(a.get(&o.field), b.get(&o.field));
                        match o.direction {
                            OrderDirection::Asc => ord,
                            OrderDirection::Desc => ord.reverse(),
                        }
                    })
                    .find(|ord| ord.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        if let Some(page) = &step.pagination {
            roots = roots
                .into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .collect();
        }

        Ok(roots.into_iter().map(Rc::new).collect())
    }

    /// Index an entity tree by one field, preserving identity order per key.
    fn join_index(
        &self,
        entity: &str,
        field: &str,
    ) -> Result<HashMap<IdentityKey, Vec<Rc<StoredEntity>>>, StorageError> {
        let mut index: HashMap<IdentityKey, Vec<Rc<StoredEntity>>> = HashMap::new();
        for record in self.scan(entity)? {
            if let Some(key) = record.get(field).and_then(Value::identity_key) {
                index.entry(key).or_default().push(Rc::new(record));
            }
        }
        Ok(index)
    }
}

#[async_trait]
impl QueryBackend for SledBackend {
    async fn run(
        &self,
        step: &QueryStep,
        root_ids: Option<&[Value]>,
    ) -> Result<RowSet, BackendError> {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        let backend = self.clone();
        let step = step.clone();
        let root_ids = root_ids.map(<[Value]>::to_vec);

        let rows = tokio::task::spawn_blocking(move || {
            backend.run_step(&step, root_ids.as_deref())
        })
        .await
        .map_err(|e| BackendError::new(format!("storage worker failed: {e}")))?
        .map_err(|e| BackendError::new(e.to_string()))?;

        debug!(step = rows.step, rows = rows.len(), "sled round trip");
        Ok(rows)
    }
}
