//! Property-directed cost search.
//!
//! For a logical node and a [`RequiredProperty`] the search enumerates the
//! node's physical implementations in a fixed order, asks the children for
//! the properties each implementation needs, and keeps the cheapest task.
//! A sort enforcer is tried last when an order is required. Results are
//! memoized per (node identity, property) so shared requests are solved
//! once.

use std::collections::HashMap;
use std::sync::Arc;

use sqlopt_core::catalog::{IndexInfo, StatsProvider};
use sqlopt_core::error::{Error, Result};
use sqlopt_core::expr::{AggCall, AggMode, BinOp, ColumnRef, Expr, SortItem};
use sqlopt_core::id::{ColumnId, ColumnIdGen};
use sqlopt_core::logical::{Aggregation, Apply, IndexHint, Join, JoinType, LogicalPlan, Scan};
use sqlopt_core::physical::{PhysicalOp, PhysicalPlan, TaskType};
use sqlopt_core::schema::{Field, Schema};
use tracing::{debug, trace, warn};

use crate::cost::{row_width, selectivity, CostFactors};
use crate::property::{items_from_sort, PropItem, RequiredProperty};
use crate::resolve::finalize;
use crate::stats::{node_key, PlanStats};
use crate::task::Task;

/// Choose the cheapest physical plan for `plan` and finalize it.
pub fn physical_optimize(
    plan: &Arc<LogicalPlan>,
    provider: Option<&dyn StatsProvider>,
    factors: &CostFactors,
) -> Result<PhysicalPlan> {
    let stats = PlanStats::derive(plan, provider, factors)?;
    let mut search = Search {
        stats: &stats,
        factors,
        ids: ColumnIdGen::after(plan.max_column_id()),
        memo: HashMap::new(),
    };
    let task = search.find_best_task(plan, &RequiredProperty::root())?;
    if task.is_invalid() {
        warn!(plan = %plan.explain(), "no physical plan satisfies the root property");
        return Err(Error::NoPhysicalPlan(format!(
            "no implementation found for the {} at the plan root",
            plan.name()
        )));
    }
    debug!(cost = task.cost(), memo_entries = search.memo.len(), "physical plan chosen");
    let mut physical = task.into_plan()?;
    finalize(&mut physical)?;
    Ok(physical)
}

struct Search<'a> {
    stats: &'a PlanStats,
    factors: &'a CostFactors,
    /// Fresh ids for partial aggregate outputs.
    ids: ColumnIdGen,
    memo: HashMap<(usize, RequiredProperty), Task>,
}

/// Partial/final halves of a split aggregation.
struct AggSplit {
    partial_aggs: Vec<AggCall>,
    partial_schema: Schema,
    final_aggs: Vec<AggCall>,
}

#[derive(Clone, Copy)]
enum AccessPath<'a> {
    Table,
    Index(&'a IndexInfo),
}

impl AccessPath<'_> {
    fn matches(&self, name: &str) -> bool {
        match self {
            AccessPath::Table => name.eq_ignore_ascii_case("primary"),
            AccessPath::Index(i) => i.name.eq_ignore_ascii_case(name),
        }
    }
}

/// Table path first, then indexes in table order, filtered by the hint.
fn access_paths(scan: &Scan) -> Vec<AccessPath<'_>> {
    let mut paths = vec![AccessPath::Table];
    paths.extend(scan.table.indexes.iter().map(AccessPath::Index));
    match &scan.hint {
        None => paths,
        Some(IndexHint::UseIndex(names)) => paths
            .into_iter()
            .filter(|p| names.iter().any(|n| p.matches(n)))
            .collect(),
        Some(IndexHint::IgnoreIndex(names)) => paths
            .into_iter()
            .filter(|p| !names.iter().any(|n| p.matches(n)))
            .collect(),
    }
}

fn prop_items(cols: &[ColumnRef], desc: bool) -> Vec<PropItem> {
    cols.iter()
        .map(|c| PropItem {
            col: c.clone(),
            desc,
        })
        .collect()
}

impl Search<'_> {
    fn find_best_task(&mut self, plan: &Arc<LogicalPlan>, prop: &RequiredProperty) -> Result<Task> {
        let key = (node_key(plan), prop.clone());
        if let Some(task) = self.memo.get(&key) {
            trace!(node = plan.name(), %prop, "memo hit");
            return Ok(task.clone());
        }

        let mut best = Task::Invalid;
        for candidate in self.candidates(plan, prop)? {
            if candidate.cost() < best.cost() {
                best = candidate;
            }
        }
        if prop.is_ordered() && prop.task_type == TaskType::Root {
            let enforced = self.enforce_sort(plan, prop)?;
            if enforced.cost() < best.cost() {
                best = enforced;
            }
        }
        trace!(node = plan.name(), %prop, cost = best.cost(), "best task");
        self.memo.insert(key, best.clone());
        Ok(best)
    }

    fn enforce_sort(&mut self, plan: &Arc<LogicalPlan>, prop: &RequiredProperty) -> Result<Task> {
        let child = self.find_best_task(plan, &prop.unordered())?;
        if child.is_invalid() {
            return Ok(Task::Invalid);
        }
        let rows = child.rows();
        let cost = self.factors.sort_cost(rows);
        Ok(child.finish(self.factors).attach(
            PhysicalOp::Sort {
                by: prop.sort_items(),
            },
            plan.schema().clone(),
            rows,
            cost,
        ))
    }

    /// Hand `task` over in the location `prop` asks for.
    fn deliver(&self, task: Task, prop: &RequiredProperty) -> Task {
        match (prop.task_type, task.task_type()) {
            (TaskType::Root, _) => task.finish(self.factors),
            (TaskType::Cop, Some(TaskType::Cop)) => task,
            (TaskType::Cop, _) => Task::Invalid,
        }
    }

    fn rows(&self, plan: &LogicalPlan) -> Result<f64> {
        Ok(self.stats.stats(plan)?.rows)
    }

    fn candidates(&mut self, plan: &Arc<LogicalPlan>, prop: &RequiredProperty) -> Result<Vec<Task>> {
        if let LogicalPlan::Scan(scan) = plan.as_ref() {
            return self.scan_tasks(plan, scan, prop);
        }
        if let LogicalPlan::Selection { input, conditions } = plan.as_ref() {
            return self.selection_tasks(plan, input, conditions, prop);
        }
        // Everything else only runs in the SQL layer.
        if prop.task_type == TaskType::Cop {
            return Ok(Vec::new());
        }
        match plan.as_ref() {
            LogicalPlan::Projection {
                input,
                exprs,
                schema,
            } => self.projection_tasks(plan, input, exprs, schema, prop),
            LogicalPlan::Sort { input, by } => self.sort_tasks(plan, input, by, prop),
            LogicalPlan::TopN {
                input,
                by,
                offset,
                count,
            } => self.topn_tasks(plan, input, by, *offset, *count, prop),
            LogicalPlan::Limit {
                input,
                offset,
                count,
            } => self.limit_tasks(plan, input, *offset, *count, prop),
            LogicalPlan::Aggregation(agg) => self.aggregation_tasks(plan, agg, prop),
            LogicalPlan::Join(join) => self.join_tasks(plan, join, prop),
            LogicalPlan::Apply(apply) => self.apply_tasks(plan, apply, prop),
            LogicalPlan::Scan(_) | LogicalPlan::Selection { .. } => Ok(Vec::new()),
        }
    }

    fn scan_tasks(&mut self, plan: &LogicalPlan, scan: &Scan, prop: &RequiredProperty) -> Result<Vec<Task>> {
        let base = self.stats.base(plan)?;
        let out_rows = self.rows(plan)?;
        let f = self.factors;
        let id_of = |name: &str| scan.schema.fields.iter().find(|fd| fd.name == name).map(|fd| fd.id);

        let mut tasks = Vec::new();
        for path in access_paths(scan) {
            let ordering: Vec<ColumnId> = match path {
                AccessPath::Table => scan.table.pk_is_handle.as_deref().and_then(id_of).into_iter().collect(),
                AccessPath::Index(index) => index.columns.iter().map_while(|c| id_of(c)).collect(),
            };
            let (keep_order, desc) = if prop.is_ordered() {
                if !prop.single_direction() || !prop.is_prefix_of(&ordering) {
                    continue;
                }
                (true, prop.desc())
            } else {
                (false, false)
            };

            // Comparisons on the leading column narrow the range read.
            let leading = ordering.first().copied();
            let (access, remaining): (Vec<Expr>, Vec<Expr>) = scan.filters.iter().cloned().partition(|c| {
                matches!(c.as_column_comparison(), Some((col, op, _)) if Some(col.id) == leading && op != BinOp::Ne)
            });
            let scanned = base.rows * selectivity(&access, base, f);
            let remain_sel = if scanned > 0.0 { (out_rows / scanned).min(1.0) } else { 1.0 };
            let read_rows = if prop.expected_count < f64::MAX {
                (prop.expected_count / remain_sel.max(f64::EPSILON)).min(scanned)
            } else {
                scanned
            };

            let table = scan.table.qualified_name();
            let (op, width, lookup) = match path {
                AccessPath::Table => (
                    PhysicalOp::TableScan {
                        table,
                        access_conditions: access,
                        keep_order,
                        desc,
                    },
                    row_width(&scan.schema),
                    0.0,
                ),
                AccessPath::Index(index) => {
                    let handle = scan.table.pk_is_handle.as_deref();
                    let double_read = scan
                        .schema
                        .fields
                        .iter()
                        .any(|fd| !index.columns.contains(&fd.name) && handle != Some(fd.name.as_str()));
                    let width: f64 = index
                        .columns
                        .iter()
                        .map(String::as_str)
                        .chain(handle)
                        .filter_map(|c| scan.table.column(c))
                        .map(|c| c.data_type.width())
                        .sum();
                    (
                        PhysicalOp::IndexScan {
                            table,
                            index: index.name.clone(),
                            access_conditions: access,
                            keep_order,
                            desc,
                            double_read,
                        },
                        width.max(1.0),
                        // Each double-read row is fetched again from the table.
                        if double_read {
                            read_rows * (f.lookup + row_width(&scan.schema) * f.scan_factor(desc))
                        } else {
                            0.0
                        },
                    )
                }
            };
            let cost = read_rows * width * f.scan_factor(desc) + lookup;
            let scan_plan = PhysicalPlan::new(op, vec![], scan.schema.clone(), scanned, TaskType::Cop);
            let mut task = Task::Cop {
                plan: scan_plan,
                cost,
                keep_order,
            };
            if !remaining.is_empty() {
                task = task.attach(
                    PhysicalOp::Selection {
                        conditions: remaining,
                    },
                    scan.schema.clone(),
                    out_rows,
                    read_rows * f.cop_cpu,
                );
            }
            tasks.push(self.deliver(task, prop));
        }
        Ok(tasks)
    }

    fn selection_tasks(
        &mut self,
        plan: &LogicalPlan,
        input: &Arc<LogicalPlan>,
        conditions: &[Expr],
        prop: &RequiredProperty,
    ) -> Result<Vec<Task>> {
        let out_rows = self.rows(plan)?;
        let child_rows = self.rows(input)?;
        let sel = if child_rows > 0.0 { out_rows / child_rows } else { 1.0 };
        let child_prop = if prop.expected_count < f64::MAX {
            prop.with_count(prop.expected_count / sel.max(f64::EPSILON))
        } else {
            prop.clone()
        };
        let schema = input.schema().clone();
        let op = PhysicalOp::Selection {
            conditions: conditions.to_vec(),
        };

        let mut tasks = Vec::new();
        let cop = self.find_best_task(input, &child_prop.with_task(TaskType::Cop))?;
        if !cop.is_invalid() {
            let task = cop.attach(op.clone(), schema.clone(), out_rows, child_rows * self.factors.cop_cpu);
            tasks.push(self.deliver(task, prop));
        }
        if prop.task_type == TaskType::Root {
            let root = self.find_best_task(input, &child_prop)?;
            if !root.is_invalid() {
                tasks.push(root.attach(op, schema, out_rows, child_rows * self.factors.cpu));
            }
        }
        Ok(tasks)
    }

    fn projection_tasks(
        &mut self,
        plan: &LogicalPlan,
        input: &Arc<LogicalPlan>,
        exprs: &[Expr],
        schema: &Schema,
        prop: &RequiredProperty,
    ) -> Result<Vec<Task>> {
        // Order on an output column is order on the column it projects.
        let mut items = Vec::with_capacity(prop.items.len());
        for item in &prop.items {
            let col = schema
                .index_of(item.col.id)
                .and_then(|pos| exprs.get(pos))
                .and_then(Expr::as_column);
            match col {
                Some(c) => items.push(PropItem {
                    col: c.clone(),
                    desc: item.desc,
                }),
                None => return Ok(Vec::new()),
            }
        }
        let child = self.find_best_task(input, &prop.with_items(items))?;
        if child.is_invalid() {
            return Ok(Vec::new());
        }
        let rows = self.rows(plan)?;
        Ok(vec![child.attach(
            PhysicalOp::Projection {
                exprs: exprs.to_vec(),
            },
            schema.clone(),
            rows,
            rows * self.factors.cpu,
        )])
    }

    fn sort_tasks(
        &mut self,
        plan: &LogicalPlan,
        input: &Arc<LogicalPlan>,
        by: &[SortItem],
        prop: &RequiredProperty,
    ) -> Result<Vec<Task>> {
        let sort_items = items_from_sort(by);
        if prop.is_ordered() {
            let satisfied = matches!(&sort_items, Some(si)
                if prop.items.len() <= si.len() && prop.items.iter().zip(si).all(|(a, b)| a == b));
            if !satisfied {
                return Ok(Vec::new());
            }
        }
        let rows = self.rows(plan)?;
        let mut tasks = Vec::new();
        if let Some(si) = sort_items {
            let ordered = self.find_best_task(input, &prop.with_items(si))?;
            if !ordered.is_invalid() {
                tasks.push(ordered);
            }
        }
        let child = self.find_best_task(input, &RequiredProperty::root())?;
        if !child.is_invalid() {
            let cost = self.factors.sort_cost(rows);
            tasks.push(child.attach(PhysicalOp::Sort { by: by.to_vec() }, plan.schema().clone(), rows, cost));
        }
        Ok(tasks)
    }

    #[allow(clippy::too_many_arguments)]
    fn topn_tasks(
        &mut self,
        plan: &LogicalPlan,
        input: &Arc<LogicalPlan>,
        by: &[SortItem],
        offset: u64,
        count: u64,
        prop: &RequiredProperty,
    ) -> Result<Vec<Task>> {
        let sort_items = items_from_sort(by);
        if prop.is_ordered() {
            let satisfied = matches!(&sort_items, Some(si)
                if prop.items.len() <= si.len() && prop.items.iter().zip(si).all(|(a, b)| a == b));
            if !satisfied {
                return Ok(Vec::new());
            }
        }
        let f = self.factors;
        let keep = offset.saturating_add(count);
        let n = keep as f64;
        let rows = self.rows(plan)?;
        let child_rows = self.rows(input)?;
        let schema = plan.schema().clone();
        let mut tasks = Vec::new();

        if let Some(si) = sort_items {
            // Input already ordered: a limit is enough.
            let ordered = RequiredProperty {
                task_type: TaskType::Root,
                expected_count: n,
                items: si,
            };
            let root = self.find_best_task(input, &ordered)?;
            if !root.is_invalid() {
                tasks.push(root.attach(PhysicalOp::Limit { offset, count }, schema.clone(), rows, n * f.cpu));
            }
            let cop = self.find_best_task(input, &ordered.with_task(TaskType::Cop))?;
            if !cop.is_invalid() {
                let pushed = cop
                    .attach(PhysicalOp::Limit { offset: 0, count: keep }, schema.clone(), n.min(child_rows), n * f.cop_cpu)
                    .finish(f)
                    .attach(PhysicalOp::Limit { offset, count }, schema.clone(), rows, n * f.cpu);
                tasks.push(pushed);
            }
        }

        let partial_rows = n.min(child_rows);
        let cop = self.find_best_task(input, &RequiredProperty::root().with_task(TaskType::Cop))?;
        if !cop.is_invalid() {
            let pushed = cop
                .attach(
                    PhysicalOp::TopN {
                        by: by.to_vec(),
                        offset: 0,
                        count: keep,
                    },
                    schema.clone(),
                    partial_rows,
                    f.topn_cost(child_rows, n),
                )
                .finish(f)
                .attach(
                    PhysicalOp::TopN {
                        by: by.to_vec(),
                        offset,
                        count,
                    },
                    schema.clone(),
                    rows,
                    f.topn_cost(partial_rows, n),
                );
            tasks.push(pushed);
        }
        let root = self.find_best_task(input, &RequiredProperty::root())?;
        if !root.is_invalid() {
            tasks.push(root.attach(
                PhysicalOp::TopN {
                    by: by.to_vec(),
                    offset,
                    count,
                },
                schema,
                rows,
                f.topn_cost(child_rows, n),
            ));
        }
        Ok(tasks)
    }

    fn limit_tasks(
        &mut self,
        plan: &LogicalPlan,
        input: &Arc<LogicalPlan>,
        offset: u64,
        count: u64,
        prop: &RequiredProperty,
    ) -> Result<Vec<Task>> {
        let f = self.factors;
        let keep = offset.saturating_add(count);
        let n = keep as f64;
        let rows = self.rows(plan)?;
        let child_rows = self.rows(input)?;
        let schema = plan.schema().clone();
        let child_prop = prop.with_count(n);
        let mut tasks = Vec::new();

        let cop = self.find_best_task(input, &child_prop.with_task(TaskType::Cop))?;
        if !cop.is_invalid() {
            let pushed = cop
                .attach(PhysicalOp::Limit { offset: 0, count: keep }, schema.clone(), n.min(child_rows), n * f.cop_cpu)
                .finish(f)
                .attach(PhysicalOp::Limit { offset, count }, schema.clone(), rows, n * f.cpu);
            tasks.push(pushed);
        }
        let root = self.find_best_task(input, &child_prop)?;
        if !root.is_invalid() {
            tasks.push(root.attach(PhysicalOp::Limit { offset, count }, schema, rows, n * f.cpu));
        }
        Ok(tasks)
    }

    /// Partial and final aggregate calls for a two-phase aggregation.
    fn split_aggregation(&mut self, agg: &Aggregation) -> Option<AggSplit> {
        if agg
            .aggs
            .iter()
            .any(|a| a.mode != AggMode::Complete || !a.is_decomposable())
        {
            return None;
        }
        let input_schema = agg.input.schema();
        let group_fields: Vec<Field> = agg
            .group_by
            .iter()
            .map(|g| g.as_column().and_then(|c| input_schema.field_by_id(c.id)).cloned())
            .collect::<Option<_>>()?;

        let mut partial_fields = Vec::with_capacity(agg.aggs.len() + group_fields.len());
        let mut partial_aggs = Vec::with_capacity(agg.aggs.len());
        let mut final_aggs = Vec::with_capacity(agg.aggs.len());
        for (call, field) in agg.aggs.iter().zip(agg.schema.fields.iter()) {
            let out = Field::new(
                self.ids.next_id(),
                format!("partial_{}", field.name),
                field.data_type,
                true,
            );
            partial_aggs.push(AggCall {
                mode: AggMode::Partial,
                ..call.clone()
            });
            final_aggs.push(AggCall {
                func: call.func.final_func()?,
                args: vec![Expr::Column(out.column_ref())],
                distinct: false,
                mode: AggMode::Final,
            });
            partial_fields.push(out);
        }
        partial_fields.extend(group_fields);
        Some(AggSplit {
            partial_aggs,
            partial_schema: Schema::new(partial_fields),
            final_aggs,
        })
    }

    fn aggregation_tasks(
        &mut self,
        plan: &LogicalPlan,
        agg: &Aggregation,
        prop: &RequiredProperty,
    ) -> Result<Vec<Task>> {
        let f = self.factors;
        let rows = self.rows(plan)?;
        let child_rows = self.rows(&agg.input)?;
        let group_cols: Option<Vec<ColumnRef>> = agg.group_by.iter().map(|g| g.as_column().cloned()).collect();
        let ordered = prop.is_ordered();
        if ordered {
            // Only a stream aggregation keeps its input's group order.
            let Some(out_ids) = agg.group_output_ids() else {
                return Ok(Vec::new());
            };
            if group_cols.is_none() || !prop.single_direction() || !prop.is_prefix_of(&out_ids) {
                return Ok(Vec::new());
            }
        }
        let hash = |group_by: &[Expr], aggs: &[AggCall]| PhysicalOp::HashAgg {
            group_by: group_by.to_vec(),
            aggs: aggs.to_vec(),
        };
        let stream = |group_by: &[Expr], aggs: &[AggCall]| PhysicalOp::StreamAgg {
            group_by: group_by.to_vec(),
            aggs: aggs.to_vec(),
        };
        let mut tasks = Vec::new();

        if !ordered {
            let child = self.find_best_task(&agg.input, &RequiredProperty::root())?;
            if !child.is_invalid() {
                tasks.push(child.attach(
                    hash(&agg.group_by, &agg.aggs),
                    agg.schema.clone(),
                    rows,
                    child_rows * f.cpu + rows * f.memory,
                ));
            }
            if let Some(split) = self.split_aggregation(agg) {
                let cop = self.find_best_task(&agg.input, &RequiredProperty::root().with_task(TaskType::Cop))?;
                if !cop.is_invalid() {
                    tasks.push(
                        cop.attach(
                            hash(&agg.group_by, &split.partial_aggs),
                            split.partial_schema,
                            rows,
                            child_rows * f.cop_cpu,
                        )
                        .finish(f)
                        .attach(
                            hash(&agg.group_by, &split.final_aggs),
                            agg.schema.clone(),
                            rows,
                            rows * f.cpu + rows * f.memory,
                        ),
                    );
                }
            }
        }

        match group_cols {
            Some(cols) if cols.is_empty() => {
                let child = self.find_best_task(&agg.input, &RequiredProperty::root())?;
                if !child.is_invalid() {
                    tasks.push(child.attach(stream(&[], &agg.aggs), agg.schema.clone(), rows, child_rows * f.cpu));
                }
                if let Some(split) = self.split_aggregation(agg) {
                    let cop = self.find_best_task(&agg.input, &RequiredProperty::root().with_task(TaskType::Cop))?;
                    if !cop.is_invalid() {
                        tasks.push(
                            cop.attach(stream(&[], &split.partial_aggs), split.partial_schema, rows, child_rows * f.cop_cpu)
                                .finish(f)
                                .attach(stream(&[], &split.final_aggs), agg.schema.clone(), rows, rows * f.cpu),
                        );
                    }
                }
            }
            Some(cols) => {
                let ids: Vec<ColumnId> = cols.iter().map(|c| c.id).collect();
                if self.stats.can_provide(&agg.input, &ids) {
                    let child_prop = RequiredProperty::root().with_items(prop_items(&cols, prop.desc()));
                    let child = self.find_best_task(&agg.input, &child_prop)?;
                    if !child.is_invalid() {
                        tasks.push(child.attach(
                            stream(&agg.group_by, &agg.aggs),
                            agg.schema.clone(),
                            rows,
                            child_rows * f.cpu,
                        ));
                    }
                }
            }
            None => {}
        }
        Ok(tasks)
    }

    fn join_tasks(&mut self, plan: &LogicalPlan, join: &Join, prop: &RequiredProperty) -> Result<Vec<Task>> {
        let f = self.factors;
        let rows = self.rows(plan)?;
        let l_rows = self.rows(&join.left)?;
        let r_rows = self.rows(&join.right)?;
        let left_keys: Vec<ColumnRef> = join.equal_conditions.iter().map(|(l, _)| l.clone()).collect();
        let right_keys: Vec<ColumnRef> = join.equal_conditions.iter().map(|(_, r)| r.clone()).collect();
        let left_ids: Vec<ColumnId> = left_keys.iter().map(|c| c.id).collect();
        let right_ids: Vec<ColumnId> = right_keys.iter().map(|c| c.id).collect();

        let ordered = prop.is_ordered();
        if ordered {
            let by_left = join.join_type != JoinType::RightOuter && prop.is_prefix_of(&left_ids);
            let by_right = matches!(join.join_type, JoinType::Inner | JoinType::RightOuter)
                && prop.is_prefix_of(&right_ids);
            if left_keys.is_empty() || !prop.single_direction() || !(by_left || by_right) {
                return Ok(Vec::new());
            }
        }
        let mut tasks = Vec::new();

        if !ordered {
            let l = self.find_best_task(&join.left, &RequiredProperty::root())?;
            let r = self.find_best_task(&join.right, &RequiredProperty::root())?;
            if !l.is_invalid() && !r.is_invalid() {
                let cost = l.cost() + r.cost() + (l_rows + r_rows) * f.cpu + r_rows * f.memory + rows * f.cpu;
                let op = PhysicalOp::HashJoin {
                    join_type: join.join_type,
                    equal_conditions: join.equal_conditions.clone(),
                    left_conditions: join.left_conditions.clone(),
                    right_conditions: join.right_conditions.clone(),
                    other_conditions: join.other_conditions.clone(),
                };
                tasks.push(Task::Root {
                    plan: PhysicalPlan::new(
                        op,
                        vec![l.into_plan()?, r.into_plan()?],
                        join.schema.clone(),
                        rows,
                        TaskType::Root,
                    ),
                    cost,
                });
            }
        }

        if !left_keys.is_empty()
            && self.stats.can_provide(&join.left, &left_ids)
            && self.stats.can_provide(&join.right, &right_ids)
        {
            let desc = prop.desc();
            let l_prop = RequiredProperty::root().with_items(prop_items(&left_keys, desc));
            let r_prop = RequiredProperty::root().with_items(prop_items(&right_keys, desc));
            let l = self.find_best_task(&join.left, &l_prop)?;
            let r = self.find_best_task(&join.right, &r_prop)?;
            if !l.is_invalid() && !r.is_invalid() {
                let cost = l.cost() + r.cost() + (l_rows + r_rows) * f.cpu + rows * f.cpu;
                let op = PhysicalOp::MergeJoin {
                    join_type: join.join_type,
                    equal_conditions: join.equal_conditions.clone(),
                    left_conditions: join.left_conditions.clone(),
                    right_conditions: join.right_conditions.clone(),
                    other_conditions: join.other_conditions.clone(),
                    desc,
                };
                tasks.push(Task::Root {
                    plan: PhysicalPlan::new(
                        op,
                        vec![l.into_plan()?, r.into_plan()?],
                        join.schema.clone(),
                        rows,
                        TaskType::Root,
                    ),
                    cost,
                });
            }
        }
        Ok(tasks)
    }

    fn apply_tasks(&mut self, plan: &LogicalPlan, apply: &Apply, prop: &RequiredProperty) -> Result<Vec<Task>> {
        if prop.is_ordered() {
            return Ok(Vec::new());
        }
        let rows = self.rows(plan)?;
        let outer_rows = self.rows(&apply.outer)?;
        let outer = self.find_best_task(&apply.outer, &RequiredProperty::root())?;
        let inner = self.find_best_task(&apply.inner, &RequiredProperty::root())?;
        if outer.is_invalid() || inner.is_invalid() {
            return Ok(Vec::new());
        }
        // The inner side runs once per outer row.
        let cost = outer.cost() + outer_rows.max(1.0) * inner.cost() + rows * self.factors.cpu;
        let op = PhysicalOp::NestedLoopApply {
            join_type: apply.join_type,
            conditions: apply.conditions.clone(),
        };
        Ok(vec![Task::Root {
            plan: PhysicalPlan::new(
                op,
                vec![outer.into_plan()?, inner.into_plan()?],
                apply.schema.clone(),
                rows,
                TaskType::Root,
            ),
            cost,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_util::{col, gt, scan};
    use sqlopt_core::expr::AggFunc;
    use sqlopt_core::schema::DataType;
    use sqlopt_core::types::Scalar;

    fn with_filter(plan: &Arc<LogicalPlan>, cond: Expr) -> Arc<LogicalPlan> {
        let LogicalPlan::Scan(s) = plan.as_ref() else {
            panic!("not a scan");
        };
        let mut s = s.clone();
        s.filters.push(cond);
        Arc::new(LogicalPlan::Scan(s))
    }

    fn with_hint(plan: &Arc<LogicalPlan>, hint: IndexHint) -> Arc<LogicalPlan> {
        let LogicalPlan::Scan(s) = plan.as_ref() else {
            panic!("not a scan");
        };
        let mut s = s.clone();
        s.hint = Some(hint);
        Arc::new(LogicalPlan::Scan(s))
    }

    #[test]
    fn single_scan_reads_table() {
        let s = scan("t", &["a", "b"], 1);
        let plan = physical_optimize(&s, None, &CostFactors::default()).unwrap();
        assert_eq!(plan.op_names(), vec!["Reader", "TableScan"]);
        assert_eq!(plan.id.get(), 2);
        assert_eq!(plan.children[0].id.get(), 1);
    }

    #[test]
    fn indexed_filter_uses_index() {
        let s = scan("t", &["a", "b", "c"], 1);
        let b = col(&s, "b");
        let s = with_filter(&s, Expr::binary(BinOp::Eq, Expr::Column(b), Expr::Literal(Scalar::I64(5))));
        let plan = physical_optimize(&s, None, &CostFactors::default()).unwrap();
        assert_eq!(plan.op_names(), vec!["Reader", "IndexLookUp"]);
    }

    #[test]
    fn wide_filter_prefers_table_over_lookup() {
        let s = scan("t", &["a", "b", "c"], 1);
        let unfiltered = physical_optimize(&s, None, &CostFactors::default()).unwrap();
        assert_eq!(unfiltered.op_names(), vec!["Reader", "TableScan"]);

        let s = with_filter(&s, gt(col(&s, "b"), 5));
        let plan = physical_optimize(&s, None, &CostFactors::default()).unwrap();
        assert!(!plan.contains_op("IndexLookUp"), "{}", plan.explain());
    }

    #[test]
    fn order_by_primary_key_needs_no_sort() {
        let s = scan("t", &["a", "b"], 1);
        let sort = Arc::new(LogicalPlan::Sort {
            input: s.clone(),
            by: vec![SortItem::new(Expr::Column(col(&s, "a")), false)],
        });
        let plan = physical_optimize(&sort, None, &CostFactors::default()).unwrap();
        assert!(!plan.contains_op("Sort"), "{}", plan.explain());
        assert!(matches!(plan.children[0].op, PhysicalOp::TableScan { keep_order: true, .. }));
    }

    #[test]
    fn scalar_aggregate_runs_in_two_phases() {
        let s = scan("t", &["a", "b"], 1);
        let agg = Arc::new(LogicalPlan::Aggregation(Aggregation {
            input: s,
            group_by: vec![],
            aggs: vec![AggCall::new(AggFunc::Count, vec![])],
            schema: Schema::new(vec![Field::new(ColumnId::new(9), "cnt", DataType::Int64, false)]),
        }));
        let plan = physical_optimize(&agg, None, &CostFactors::default()).unwrap();
        assert_eq!(plan.op_names(), vec!["StreamAgg", "Reader", "StreamAgg", "TableScan"]);
        let PhysicalOp::StreamAgg { aggs, .. } = &plan.op else {
            unreachable!()
        };
        assert_eq!(aggs[0].func, AggFunc::Sum);
        assert_eq!(aggs[0].mode, AggMode::Final);
    }

    #[test]
    fn hint_excluding_every_path_fails() {
        let s = scan("t", &["a", "b"], 1);
        let s = with_hint(&s, IndexHint::UseIndex(vec!["missing".into()]));
        let err = physical_optimize(&s, None, &CostFactors::default()).unwrap_err();
        assert!(matches!(err, Error::NoPhysicalPlan(_)));

        let s = with_hint(&scan("t", &["a", "b"], 1), IndexHint::UseIndex(vec!["idx_b".into()]));
        let plan = physical_optimize(&s, None, &CostFactors::default()).unwrap();
        assert!(matches!(&plan.children[0].op, PhysicalOp::IndexScan { index, .. } if index == "idx_b"));
    }
}
