//! Save planning over the record graph.
//!
//! Persisting a graph of interlinked records has one hard constraint: a
//! reference can only be embedded once its target is addressable. Edges
//! into already-persisted records impose no ordering — their identity is
//! known. Edges into newborn records do: the target must either be
//! persisted in an earlier, independent batch (a newborn *orphan* outside
//! the root set), or precede its referrer inside the final batch where a
//! temporary local id bridges the gap.
//!
//! Planning is a pure function of the in-memory graph. A cycle of
//! mutually-referencing newborn records has no valid order and fails with
//! [`Error::Inconsistency`] here, before any network call.

use crate::error::{Error, Result};
use crate::record::Record;
use crate::LocalId;
use std::collections::{HashMap, HashSet};

/// Staged persistence order for one save call.
#[derive(Debug, Clone)]
pub struct SavePlan {
    /// Orphan waves, deepest first. Each wave is an independent prior
    /// batch call; its records gain real identities before any dependent
    /// record is sent.
    pub stages: Vec<Vec<Record>>,
    /// The final batch: every remaining record with pending work, in
    /// dependency order (referenced newborns before their referrers).
    pub family: Vec<Record>,
}

impl SavePlan {
    /// All records the plan touches, stages first.
    pub fn all_records(&self) -> impl Iterator<Item = &Record> {
        self.stages.iter().flatten().chain(self.family.iter())
    }

    /// Total number of batch calls this plan will issue.
    pub fn call_count(&self) -> usize {
        self.stages.len() + usize::from(!self.family.is_empty())
    }
}

/// Transitive closure of the root set over pointer/relation edges, in
/// deterministic discovery order (roots first, then breadth-first).
pub fn family(roots: &[Record]) -> Result<Vec<Record>> {
    let ctx = crate::record::Context::shared(roots)?;

    let mut seen: HashSet<LocalId> = HashSet::new();
    let mut ordered: Vec<Record> = Vec::new();
    let mut queue: Vec<Record> = Vec::new();

    for root in roots {
        if seen.insert(root.local_id().to_string()) {
            ordered.push(root.clone());
            queue.push(root.clone());
        }
    }

    let mut cursor = 0;
    while cursor < queue.len() {
        let record = queue[cursor].clone();
        cursor += 1;

        for target in edge_targets(&record, &ctx) {
            if seen.insert(target.local_id().to_string()) {
                ordered.push(target.clone());
                queue.push(target);
            }
        }
    }

    Ok(ordered)
}

/// Compute the staged persistence plan for a root record set.
pub fn plan(roots: &[Record]) -> Result<SavePlan> {
    let ctx = crate::record::Context::shared(roots)?;
    let members = family(roots)?;

    let roots_ids: HashSet<&str> = roots.iter().map(Record::local_id).collect();
    let index: HashMap<&str, usize> = members
        .iter()
        .enumerate()
        .map(|(i, r)| (r.local_id(), i))
        .collect();

    // Newborn family members still awaiting an identity. Only edges into
    // this set constrain ordering.
    let mut pending: HashSet<&str> = members
        .iter()
        .filter(|r| r.is_newborn())
        .map(Record::local_id)
        .collect();

    // Outgoing newborn edges per member, by family index.
    let out_edges: Vec<Vec<&str>> = members
        .iter()
        .map(|record| {
            edge_targets(record, &ctx)
                .into_iter()
                .filter_map(|target| {
                    let id = *index.get(target.local_id())?;
                    let target = &members[id];
                    target.is_newborn().then(|| target.local_id())
                })
                .collect()
        })
        .collect();

    // Orphan waves: non-root newborns whose referenced newborns have all
    // been assigned to earlier waves. Deepest records become ready first.
    let mut staged: HashSet<&str> = HashSet::new();
    let mut stages: Vec<Vec<Record>> = Vec::new();
    loop {
        let wave: Vec<&Record> = members
            .iter()
            .enumerate()
            .filter(|(i, record)| {
                let id = record.local_id();
                pending.contains(id)
                    && !roots_ids.contains(id)
                    && out_edges[*i].iter().all(|t| !pending.contains(t))
            })
            .map(|(_, record)| record)
            .collect();

        if wave.is_empty() {
            break;
        }
        for record in &wave {
            pending.remove(record.local_id());
            staged.insert(record.local_id());
        }
        stages.push(wave.into_iter().cloned().collect());
    }

    // Final batch: everything left with pending work, ordered so every
    // still-newborn reference precedes its referrer. Kahn's algorithm over
    // the remaining newborn edges; leftovers mean a newborn cycle.
    let mut remaining: Vec<usize> = members
        .iter()
        .enumerate()
        .filter(|(_, r)| !staged.contains(r.local_id()) && r.is_dirty())
        .map(|(i, _)| i)
        .collect();

    let mut placed: HashSet<&str> = HashSet::new();
    let mut ordered: Vec<Record> = Vec::new();
    while !remaining.is_empty() {
        let ready: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| {
                out_edges[i]
                    .iter()
                    .all(|t| !pending.contains(t) || placed.contains(t))
            })
            .collect();

        if ready.is_empty() {
            return Err(Error::Inconsistency(
                "circular dependency between newborn records".into(),
            ));
        }

        for i in &ready {
            placed.insert(members[*i].local_id());
            ordered.push(members[*i].clone());
        }
        remaining.retain(|i| !ready.contains(i));
    }

    Ok(SavePlan {
        stages,
        family: ordered,
    })
}

fn edge_targets(record: &Record, ctx: &crate::record::Context) -> Vec<Record> {
    let mut targets = Vec::new();
    for value in record.fields().values() {
        for reference in value.references() {
            if let Some(target) = ctx.resolve(reference) {
                targets.push(target);
            }
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Context, ServerDelta};

    fn persisted(ctx: &Context, class: &str, id: &str) -> Record {
        ctx.record_for(class, id)
    }

    #[test]
    fn single_newborn_plans_one_call() {
        let ctx = Context::new();
        let record = ctx.create("player");
        record.set("name", "Ari").unwrap();

        let plan = plan(&[record.clone()]).unwrap();
        assert!(plan.stages.is_empty());
        assert_eq!(plan.family, vec![record]);
        assert_eq!(plan.call_count(), 1);
    }

    #[test]
    fn family_closes_over_edges() {
        let ctx = Context::new();
        let a = ctx.create("a");
        let b = ctx.create("b");
        let c = ctx.create("c");
        a.set_pointer("next", &b).unwrap();
        b.set_pointer("next", &c).unwrap();

        let members = family(&[a.clone()]).unwrap();
        assert_eq!(members, vec![a, b, c]);
    }

    #[test]
    fn chain_of_newborns_stages_deepest_first() {
        let ctx = Context::new();
        let a = ctx.create("doc");
        let b = ctx.create("doc");
        let c = ctx.create("doc");
        a.set_pointer("child", &b).unwrap();
        b.set_pointer("child", &c).unwrap();

        let plan = plan(&[a.clone()]).unwrap();
        assert_eq!(plan.stages, vec![vec![c], vec![b]]);
        assert_eq!(plan.family, vec![a]);
        assert_eq!(plan.call_count(), 3);
    }

    #[test]
    fn persisted_edges_impose_no_ordering() {
        let ctx = Context::new();
        let post = ctx.create("post");
        let author = persisted(&ctx, "author", "auth1");
        post.set_pointer("author", &author).unwrap();

        let plan = plan(&[post.clone()]).unwrap();
        assert!(plan.stages.is_empty());
        // The persisted author has no pending work, so only the post is
        // batched.
        assert_eq!(plan.family, vec![post]);
    }

    #[test]
    fn persisted_family_member_with_pending_work_is_batched() {
        let ctx = Context::new();
        let post = ctx.create("post");
        let author = persisted(&ctx, "author", "auth1");
        author.set("name", "Ari").unwrap();
        post.set_pointer("author", &author).unwrap();

        let plan = plan(&[post.clone()]).unwrap();
        assert!(plan.stages.is_empty());
        assert_eq!(plan.family.len(), 2);
        assert!(plan.family.contains(&author));
    }

    #[test]
    fn mutual_newborn_pointers_fail_fast() {
        let ctx = Context::new();
        let r = ctx.create("doc");
        let s = ctx.create("doc");
        r.set_pointer("x", &s).unwrap();
        s.set_pointer("y", &r).unwrap();

        let err = plan(&[r]).unwrap_err();
        assert!(matches!(err, Error::Inconsistency(_)));
    }

    #[test]
    fn mutual_newborn_roots_fail_fast() {
        let ctx = Context::new();
        let r = ctx.create("doc");
        let s = ctx.create("doc");
        r.set_pointer("x", &s).unwrap();
        s.set_pointer("y", &r).unwrap();

        let err = plan(&[r, s]).unwrap_err();
        assert!(matches!(err, Error::Inconsistency(_)));
    }

    #[test]
    fn newborn_roots_order_within_final_batch() {
        let ctx = Context::new();
        let parent = ctx.create("node");
        let child = ctx.create("node");
        parent.set_pointer("child", &child).unwrap();

        // Both are roots, so no orphan staging; the child must still
        // precede the parent inside the single batch.
        let plan = plan(&[parent.clone(), child.clone()]).unwrap();
        assert!(plan.stages.is_empty());
        assert_eq!(plan.family, vec![child, parent]);
    }

    #[test]
    fn orphan_depending_on_newborn_root_joins_final_batch() {
        let ctx = Context::new();
        let r = ctx.create("doc");
        let t = ctx.create("doc");
        let s = ctx.create("doc");
        t.set_pointer("to_s", &s).unwrap();
        s.set_pointer("to_r", &r).unwrap();

        // s is a non-root orphan but references the newborn root r, so it
        // cannot be staged earlier; it lands in the final batch after r.
        let plan = plan(&[r.clone(), t.clone()]).unwrap();
        assert!(plan.stages.is_empty());
        let order: Vec<&str> = plan.family.iter().map(Record::local_id).collect();
        let pos = |rec: &Record| order.iter().position(|id| *id == rec.local_id()).unwrap();
        assert!(pos(&r) < pos(&s));
        assert!(pos(&s) < pos(&t));
    }

    #[test]
    fn relation_edges_constrain_like_pointers() {
        let ctx = Context::new();
        let list = ctx.create("list");
        let item = ctx.create("item");
        list.add_relation("items", std::slice::from_ref(&item)).unwrap();

        let plan = plan(&[list.clone()]).unwrap();
        assert_eq!(plan.stages, vec![vec![item]]);
        assert_eq!(plan.family, vec![list]);
    }

    #[test]
    fn orphan_wave_merges_identities_between_stages() {
        let ctx = Context::new();
        let a = ctx.create("doc");
        let b = ctx.create("doc");
        a.set_pointer("child", &b).unwrap();

        let plan = plan(&[a.clone()]).unwrap();
        assert_eq!(plan.stages, vec![vec![b.clone()]]);

        // Simulate the first stage completing: b gains an identity and the
        // recomputed plan no longer stages anything.
        b.merge_delta(ServerDelta {
            identity: Some("b1".into()),
            ..ServerDelta::default()
        });
        b.clear_pending();

        let plan = super::plan(&[a.clone()]).unwrap();
        assert!(plan.stages.is_empty());
        assert_eq!(plan.family, vec![a]);
    }

    #[test]
    fn mixed_contexts_fail_before_planning() {
        let ctx_a = Context::new();
        let ctx_b = Context::new();
        let r1 = ctx_a.create("doc");
        let r2 = ctx_b.create("doc");

        assert!(matches!(
            plan(&[r1, r2]),
            Err(Error::Inconsistency(_))
        ));
    }
}
