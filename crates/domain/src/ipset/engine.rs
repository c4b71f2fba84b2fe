use std::collections::HashMap;

use super::entity::{IpSet, ReferenceKind};
use super::error::IpSetError;
use super::taxonomy::{SetKind, SetMetadata, SetType};

/// In-memory arena of set entities, keyed by hashed name.
///
/// Entities are created lazily the first time anything references their
/// metadata and destroyed only by an explicit deletion decision — there
/// is no implicit garbage collection. Parent→child list membership is
/// stored as hashed-name references into this arena, so a child shared
/// by several parents lives until its own counters release it, and no
/// ownership cycles can form.
///
/// The engine itself is not synchronized; the owning service serializes
/// access (one lock around the whole arena keeps every critical section
/// short, since no operation here blocks or performs I/O).
#[derive(Debug, Default)]
pub struct IpSetEngine {
    sets: HashMap<String, IpSet>,
    /// Growth limit on the arena; `None` is unbounded.
    max_sets: Option<usize>,
}

impl IpSetEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that refuses to grow past `limit` entities. Operations on
    /// existing sets are unaffected by the limit.
    pub fn with_capacity(limit: usize) -> Self {
        Self {
            sets: HashMap::new(),
            max_sets: Some(limit),
        }
    }

    /// Change the growth limit. Entities already past a tightened limit
    /// are never evicted; only further creation is refused.
    pub fn set_capacity(&mut self, limit: usize) {
        self.max_sets = Some(limit);
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn get(&self, hashed_name: &str) -> Option<&IpSet> {
        self.sets.get(hashed_name)
    }

    pub fn get_by_metadata(&self, metadata: &SetMetadata) -> Option<&IpSet> {
        self.sets.get(&metadata.hashed_name())
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpSet> {
        self.sets.values()
    }

    /// Fetch the entity for `metadata`, creating it if this is the first
    /// reference. Rejects unknown-typed metadata (the entity would be
    /// non-operational) and identity conflicts: kind and type are fixed
    /// at creation, so re-declaring a hashed name with a different shape
    /// is a caller bug.
    pub fn ensure(&mut self, metadata: &SetMetadata) -> Result<&mut IpSet, IpSetError> {
        if metadata.set_type == SetType::Unknown {
            return Err(IpSetError::UnknownType {
                name: metadata.name.clone(),
            });
        }
        let hashed = metadata.hashed_name();
        if !self.sets.contains_key(&hashed) {
            if let Some(limit) = self.max_sets {
                if self.sets.len() >= limit {
                    return Err(IpSetError::CapacityExhausted {
                        name: metadata.prefix_name(),
                        limit,
                    });
                }
            }
        }
        let entry = self.sets.entry(hashed).or_insert_with(|| IpSet::new(metadata));
        // Key-label and key-value-label pod sets share a prefix, so the
        // same hashed name may legitimately arrive under either type; only
        // a kind mismatch is an identity conflict.
        if entry.kind() != metadata.kind() {
            return Err(IpSetError::TypeConflict {
                name: metadata.prefix_name(),
                existing: entry.kind(),
                requested: metadata.kind(),
            });
        }
        Ok(entry)
    }

    // ── Policy references ─────────────────────────────────────────

    /// Idempotently record that `policy_name` depends on the set. Creates
    /// the entity on first reference.
    pub fn add_reference(
        &mut self,
        metadata: &SetMetadata,
        policy_name: &str,
        kind: ReferenceKind,
    ) -> Result<(), IpSetError> {
        self.ensure(metadata)?.add_reference(policy_name, kind);
        Ok(())
    }

    /// Idempotently drop a policy dependency. A missing set or absent
    /// reference is a no-op: removal events can arrive after cleanup.
    pub fn remove_reference(
        &mut self,
        metadata: &SetMetadata,
        policy_name: &str,
        kind: ReferenceKind,
    ) {
        if let Some(set) = self.sets.get_mut(&metadata.hashed_name()) {
            set.remove_reference(policy_name, kind);
        }
    }

    // ── List membership ───────────────────────────────────────────

    /// Insert `member` into the list set `list`, creating both entities
    /// lazily. Exactly one list-counter increment per new edge; adding an
    /// existing member is a no-op.
    pub fn add_member(
        &mut self,
        list: &SetMetadata,
        member: &SetMetadata,
    ) -> Result<(), IpSetError> {
        if list.kind() != SetKind::List {
            return Err(IpSetError::InvalidKind {
                name: list.prefix_name(),
                kind: list.kind(),
            });
        }
        let member_hashed = self.ensure(member)?.hashed_name().to_string();
        let inserted = self.ensure(list)?.put_list_member(&member_hashed)?;
        if inserted {
            // Child was ensured above, so the lookup always hits.
            if let Some(child) = self.sets.get_mut(&member_hashed) {
                child.inc_list_ref_count();
            }
        }
        Ok(())
    }

    /// Remove `member` from `list` and release the child's list counter.
    /// Missing list or absent member is a no-op, mirroring
    /// [`IpSetEngine::remove_reference`].
    pub fn remove_member(
        &mut self,
        list: &SetMetadata,
        member: &SetMetadata,
    ) -> Result<(), IpSetError> {
        let member_hashed = member.hashed_name();
        let Some(parent) = self.sets.get_mut(&list.hashed_name()) else {
            return Ok(());
        };
        if !parent.take_list_member(&member_hashed)? {
            return Ok(());
        }
        if let Some(child) = self.sets.get_mut(&member_hashed) {
            child.dec_list_ref_count()?;
        }
        Ok(())
    }

    // ── Leaf membership ───────────────────────────────────────────

    /// Record a leaf member (IP or IP:port) owned by `owner_key` in a
    /// hash-kind set, creating the entity lazily.
    pub fn add_leaf_member(
        &mut self,
        metadata: &SetMetadata,
        member: &str,
        owner_key: &str,
    ) -> Result<(), IpSetError> {
        self.ensure(metadata)?.put_leaf_member(member, owner_key)
    }

    /// Drop a leaf member. Missing set or member is a no-op.
    pub fn remove_leaf_member(
        &mut self,
        metadata: &SetMetadata,
        member: &str,
    ) -> Result<(), IpSetError> {
        match self.sets.get_mut(&metadata.hashed_name()) {
            Some(set) => set.take_leaf_member(member).map(|_| ()),
            None => Ok(()),
        }
    }

    // ── Kernel reference counts (reported by the dataplane sync) ──

    pub fn inc_kernel_ref_count(&mut self, hashed_name: &str) -> Result<(), IpSetError> {
        self.get_mut(hashed_name)?.inc_kernel_ref_count();
        Ok(())
    }

    pub fn dec_kernel_ref_count(&mut self, hashed_name: &str) -> Result<(), IpSetError> {
        self.get_mut(hashed_name)?.dec_kernel_ref_count()
    }

    pub fn inc_list_ref_count(&mut self, hashed_name: &str) -> Result<(), IpSetError> {
        self.get_mut(hashed_name)?.inc_list_ref_count();
        Ok(())
    }

    pub fn dec_list_ref_count(&mut self, hashed_name: &str) -> Result<(), IpSetError> {
        self.get_mut(hashed_name)?.dec_list_ref_count()
    }

    // ── Queries for the dataplane sync ────────────────────────────

    pub fn get_set_contents(&self, hashed_name: &str) -> Result<Vec<String>, IpSetError> {
        self.get_ref(hashed_name)?.get_set_contents()
    }

    pub fn has_member(
        &self,
        list_hashed_name: &str,
        member_hashed_name: &str,
    ) -> Result<bool, IpSetError> {
        self.get_ref(list_hashed_name)?.has_member(member_hashed_name)
    }

    /// Hashed names of every set the kernel dataplane should currently
    /// contain.
    pub fn sets_to_program(&self) -> Vec<String> {
        self.sets
            .values()
            .filter(|s| s.should_be_in_kernel())
            .map(|s| s.hashed_name().to_string())
            .collect()
    }

    // ── Deletion ──────────────────────────────────────────────────

    /// Reclaim a set once nothing pins it. With `ignorable_member`, a
    /// list whose sole remaining child is that member is torn down
    /// together with the pending child removal in one decision. Fails
    /// with `DeletionBlocked` while references or other contents remain.
    pub fn delete_set(
        &mut self,
        metadata: &SetMetadata,
        ignorable_member: Option<&str>,
    ) -> Result<(), IpSetError> {
        let hashed = metadata.hashed_name();
        let set = self.get_ref(&hashed)?;
        if !set.can_be_deleted(ignorable_member) {
            return Err(IpSetError::DeletionBlocked {
                name: set.name().to_string(),
                reason: deletion_block_reason(set),
            });
        }
        self.drop_entity(&hashed);
        Ok(())
    }

    /// Unconditional cleanup for orphan reclamation sweeps: contents are
    /// irrelevant, only live policy/list references block removal.
    pub fn force_delete(&mut self, hashed_name: &str) -> Result<(), IpSetError> {
        let set = self.get_ref(hashed_name)?;
        if !set.can_be_force_deleted() {
            return Err(IpSetError::DeletionBlocked {
                name: set.name().to_string(),
                reason: deletion_block_reason(set),
            });
        }
        self.drop_entity(hashed_name);
        Ok(())
    }

    /// One force-delete pass over the whole arena. Runs inside a single
    /// critical section so the sweep sees a consistent snapshot. Returns
    /// the hashed names that were reclaimed.
    pub fn sweep_deletable(&mut self) -> Vec<String> {
        // A freed parent releases its children, which may free them in
        // turn; iterate until a pass reclaims nothing.
        let mut reclaimed = Vec::new();
        loop {
            let victims: Vec<String> = self
                .sets
                .values()
                .filter(|s| s.can_be_force_deleted())
                .map(|s| s.hashed_name().to_string())
                .collect();
            if victims.is_empty() {
                return reclaimed;
            }
            for hashed in victims {
                self.drop_entity(&hashed);
                reclaimed.push(hashed);
            }
        }
    }

    /// Remove the entity and release the list counters of any children
    /// it still holds edges to.
    fn drop_entity(&mut self, hashed_name: &str) {
        let Some(set) = self.sets.remove(hashed_name) else {
            return;
        };
        if let Some(members) = set.list_members() {
            for child_hashed in members {
                if let Some(child) = self.sets.get_mut(child_hashed) {
                    // The edge existed, so the counter is at least one;
                    // the clamp in the entity covers tampering anyway.
                    child.dec_list_ref_count().ok();
                }
            }
        }
    }

    fn get_ref(&self, hashed_name: &str) -> Result<&IpSet, IpSetError> {
        self.sets.get(hashed_name).ok_or_else(|| IpSetError::NotFound {
            name: hashed_name.to_string(),
        })
    }

    fn get_mut(&mut self, hashed_name: &str) -> Result<&mut IpSet, IpSetError> {
        self.sets.get_mut(hashed_name).ok_or_else(|| IpSetError::NotFound {
            name: hashed_name.to_string(),
        })
    }
}

fn deletion_block_reason(set: &IpSet) -> String {
    if set.used_by_netpol() {
        "referenced by network policies".to_string()
    } else if set.referenced_in_list() {
        "member of other list sets".to_string()
    } else {
        "still has members".to_string()
    }
}
