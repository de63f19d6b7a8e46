//! The flush engine.
//!
//! Takes the store's pending objects in dirty-since order, derives the
//! write order from reference edges, and executes statements one at a
//! time. Ordering happens before anything is sent: a true dependency
//! cycle fails the pass with `OrderLoop` and zero statements on the wire.
//!
//! Execution order within a pass:
//!
//! 1. inserts, parents before the children that reference them;
//! 2. updates, which include any reference-clearing assignments;
//! 3. deletes, children before parents.
//!
//! A pass is all-or-nothing: the first backend error aborts it, leaves
//! every unexecuted change pending, and surfaces the error so a retry
//! reattempts the same logical changes.

use std::collections::HashMap;

use squall_core::statement::{Delete, Insert, Statement, Update};
use squall_core::{Connection, Error, OrderLoopError, Result};

use crate::event::EventPayload;
use crate::info::{FlushState, ObjectRef, Pending};

/// Counts from one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushResult {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Objects skipped because a dependency outside the pass stayed
    /// unresolved; they remain pending for the next pass.
    pub requeued: usize,
}

/// What the store needs to settle its maps after a pass.
#[derive(Debug, Default)]
pub(crate) struct FlushReport {
    pub result: FlushResult,
    pub deleted: Vec<ObjectRef>,
    pub requeued: Vec<ObjectRef>,
}

/// Run one flush pass over `batch` (dirty-since order).
#[tracing::instrument(level = "debug", skip_all, fields(batch = batch.len()))]
pub(crate) fn run<C: Connection>(conn: &mut C, batch: &[ObjectRef]) -> Result<FlushReport> {
    let started = std::time::Instant::now();
    let mut inserts = Vec::new();
    let mut updates = Vec::new();
    let mut deletes = Vec::new();
    for obj in batch {
        match obj.pending() {
            Pending::Add => inserts.push(obj.clone()),
            Pending::Remove => deletes.push(obj.clone()),
            Pending::None => {
                if obj.is_dirty() {
                    updates.push(obj.clone());
                }
            }
        }
    }

    // Order before any write. A cycle aborts here with nothing sent.
    let inserts = order_inserts(inserts)?;
    let deletes = order_deletes(deletes);

    for obj in inserts.iter().chain(&updates).chain(&deletes) {
        obj.set_flush_state(FlushState::Flushing);
    }

    let mut report = FlushReport::default();

    for obj in &inserts {
        if !obj.resolve_references()? {
            requeue(obj, &mut report);
            continue;
        }
        obj.events().emit(&EventPayload::PreFlush);
        let (columns, values): (Vec<String>, Vec<_>) = obj.insert_columns().into_iter().unzip();
        let statement = Statement::Insert(Insert {
            table: obj.schema().table().to_string(),
            columns,
            values,
        });
        tracing::debug!(object = %obj.describe(), "flush INSERT");
        let result = execute(conn, &statement, obj, batch)?;
        obj.after_insert(result.insert_id);
        report.result.inserted += 1;
    }

    for obj in &updates {
        if !obj.resolve_references()? {
            requeue(obj, &mut report);
            continue;
        }
        let set = obj.update_assignments();
        if set.is_empty() {
            obj.set_flush_state(FlushState::Clean);
            continue;
        }
        let Ok(where_clause) = obj.key_constraints() else {
            requeue(obj, &mut report);
            continue;
        };
        obj.events().emit(&EventPayload::PreFlush);
        let statement = Statement::Update(Update {
            table: obj.schema().table().to_string(),
            set,
            where_clause,
        });
        tracing::debug!(object = %obj.describe(), "flush UPDATE");
        let result = execute(conn, &statement, obj, batch)?;
        if result.rows_affected == 0 {
            tracing::warn!(object = %obj.describe(), "UPDATE matched no row");
        }
        obj.after_update();
        report.result.updated += 1;
    }

    for obj in &deletes {
        let Ok(where_clause) = obj.key_constraints() else {
            requeue(obj, &mut report);
            continue;
        };
        obj.events().emit(&EventPayload::PreFlush);
        let statement = Statement::Delete(Delete {
            table: obj.schema().table().to_string(),
            where_clause,
        });
        tracing::debug!(object = %obj.describe(), "flush DELETE");
        let result = execute(conn, &statement, obj, batch)?;
        if result.rows_affected == 0 {
            tracing::warn!(object = %obj.describe(), "DELETE matched no row");
        }
        obj.after_delete();
        report.deleted.push(obj.clone());
        report.result.deleted += 1;
    }

    report.result.requeued = report.requeued.len();
    tracing::info!(
        inserted = report.result.inserted,
        updated = report.result.updated,
        deleted = report.result.deleted,
        requeued = report.result.requeued,
        elapsed = ?started.elapsed(),
        "flush pass complete"
    );
    Ok(report)
}

fn requeue(obj: &ObjectRef, report: &mut FlushReport) {
    tracing::debug!(object = %obj.describe(), "dependency unresolved; requeued");
    obj.set_flush_state(FlushState::Dirty);
    report.requeued.push(obj.clone());
}

/// Execute one statement; on failure, put the whole pass back in a
/// retryable state before surfacing the error.
fn execute<C: Connection>(
    conn: &mut C,
    statement: &Statement,
    current: &ObjectRef,
    batch: &[ObjectRef],
) -> Result<squall_core::ExecuteResult> {
    match conn.execute(statement) {
        Ok(result) => Ok(result),
        Err(e) => {
            tracing::warn!(
                object = %current.describe(),
                verb = statement.verb(),
                error = %e,
                "flush statement failed; pass aborted"
            );
            current.set_flush_state(FlushState::Failed);
            for obj in batch {
                if obj.flush_state() == FlushState::Flushing {
                    obj.set_flush_state(FlushState::Dirty);
                }
            }
            Err(e)
        }
    }
}

/// Topologically order pending inserts so every referenced object is
/// written before its dependents. Ties keep dirty-since order. A cycle
/// among the batch is an [`OrderLoopError`] naming the participants.
fn order_inserts(inserts: Vec<ObjectRef>) -> Result<Vec<ObjectRef>> {
    if inserts.len() < 2 {
        return Ok(inserts);
    }
    let index_of: HashMap<u64, usize> = inserts
        .iter()
        .enumerate()
        .map(|(i, obj)| (obj.object_id(), i))
        .collect();

    // dependents[i] lists the batch indexes that must wait for i.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); inserts.len()];
    let mut indegree: Vec<usize> = vec![0; inserts.len()];
    for (i, obj) in inserts.iter().enumerate() {
        for target in obj.unresolved_references() {
            if let Some(&t) = index_of.get(&target.object_id()) {
                if t != i {
                    dependents[t].push(i);
                    indegree[i] += 1;
                }
            }
        }
    }

    let mut ordered = Vec::with_capacity(inserts.len());
    let mut emitted = vec![false; inserts.len()];
    loop {
        // First ready node in dirty-since order
        let next = (0..inserts.len()).find(|&i| !emitted[i] && indegree[i] == 0);
        match next {
            Some(i) => {
                emitted[i] = true;
                for &d in &dependents[i] {
                    indegree[d] -= 1;
                }
                ordered.push(inserts[i].clone());
            }
            None if ordered.len() == inserts.len() => break,
            None => {
                let remaining: Vec<usize> =
                    (0..inserts.len()).filter(|&i| !emitted[i]).collect();
                return Err(Error::OrderLoop(OrderLoopError {
                    objects: cycle_path(&inserts, &dependents, &remaining),
                }));
            }
        }
    }
    Ok(ordered)
}

/// Walk the leftover subgraph to present one concrete loop, start node
/// repeated at the end.
fn cycle_path(
    inserts: &[ObjectRef],
    dependents: &[Vec<usize>],
    remaining: &[usize],
) -> Vec<String> {
    let start = remaining[0];
    let mut path = vec![start];
    let mut seen = vec![false; inserts.len()];
    seen[start] = true;
    let mut current = start;
    loop {
        let next = dependents[current]
            .iter()
            .copied()
            .find(|&d| remaining.contains(&d));
        let Some(next) = next else { break };
        if seen[next] {
            // Trim the tail before the loop entry and close it
            if let Some(pos) = path.iter().position(|&i| i == next) {
                path.drain(..pos);
            }
            path.push(next);
            break;
        }
        seen[next] = true;
        path.push(next);
        current = next;
    }
    path.into_iter().map(|i| inserts[i].describe()).collect()
}

/// Deletes run children-first: a table whose rows reference another
/// table in the delete set is emptied before the rows it points at.
/// Kahn ordering over table-level foreign-key edges; dirty-since order
/// breaks ties and orders rows within a table.
fn order_deletes(deletes: Vec<ObjectRef>) -> Vec<ObjectRef> {
    if deletes.len() < 2 {
        return deletes;
    }
    // Tables in dirty-since first-appearance order
    let mut tables: Vec<&str> = Vec::new();
    for obj in &deletes {
        let table = obj.schema().table();
        if !tables.contains(&table) {
            tables.push(table);
        }
    }

    // child -> parent edges between distinct tables in the set
    let mut parents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
    let mut indegree: Vec<usize> = vec![0; tables.len()];
    for obj in &deletes {
        let Some(child) = tables.iter().position(|&t| t == obj.schema().table()) else {
            continue;
        };
        for fk in obj.schema().columns().iter().filter_map(|c| c.foreign_key.as_ref()) {
            if let Some(parent) = tables.iter().position(|&t| t == fk.table) {
                if parent != child && !parents[child].contains(&parent) {
                    parents[child].push(parent);
                    indegree[parent] += 1;
                }
            }
        }
    }

    // Leaf children first; a parent becomes ready once every table
    // referencing it has been emitted.
    let mut table_order = Vec::with_capacity(tables.len());
    let mut emitted = vec![false; tables.len()];
    while let Some(i) = (0..tables.len()).find(|&i| !emitted[i] && indegree[i] == 0) {
        emitted[i] = true;
        for &p in &parents[i] {
            indegree[p] -= 1;
        }
        table_order.push(i);
    }
    // A reference cycle among the tables leaves the remainder in
    // dirty-since order; the backend decides whether that is acceptable.
    for i in 0..tables.len() {
        if !emitted[i] {
            table_order.push(i);
        }
    }

    let mut ordered = Vec::with_capacity(deletes.len());
    for &t in &table_order {
        for obj in &deletes {
            if obj.schema().table() == tables[t] {
                ordered.push(obj.clone());
            }
        }
    }
    ordered
}
