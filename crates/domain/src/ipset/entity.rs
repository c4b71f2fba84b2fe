use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::error::{IpSetError, RefCounter};
use super::taxonomy::{SetKind, SetMetadata, SetType};

/// How a network policy depends on a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// The policy selects this set through a pod/namespace selector.
    Selector,
    /// The policy names this set directly inside a rule, as a traffic peer.
    NetPol,
}

impl ReferenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Selector => "selector",
            Self::NetPol => "netpol",
        }
    }
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-dependent membership storage. Exactly one shape is populated,
/// matching the entity's immutable kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetMembers {
    /// Leaf member identity (IP or IP:port) → owning workload key.
    Hash(HashMap<String, String>),
    /// Hashed names of member sets. Children are shared, not owned: the
    /// same child may sit in several parent lists, and its lifetime is
    /// governed solely by its own reference counters. The lifecycle
    /// engine's arena resolves these keys to entities.
    List(BTreeSet<String>),
    /// Storage of the unknown kind. Every content query fails with
    /// `InvalidKind`.
    Unknown,
}

/// Mutable runtime record for one grouping primitive.
///
/// Identity (names, type, kind) is fixed at construction. Everything else
/// — membership, policy references, the two counters — changes under the
/// lifecycle engine, which serializes access for concurrent callers.
#[derive(Debug, Clone)]
pub struct IpSet {
    name: String,
    unprefixed_name: String,
    hashed_name: String,
    set_type: SetType,
    kind: SetKind,
    members: SetMembers,
    /// Policies referencing this set through a pod/namespace selector.
    selector_refs: std::collections::HashSet<String>,
    /// Policies referencing this set directly inside a rule.
    netpol_refs: std::collections::HashSet<String>,
    /// Parent lists in the in-memory model currently containing this set.
    list_ref_count: usize,
    /// Active kernel-programmed usages of this set.
    kernel_ref_count: usize,
}

impl IpSet {
    pub fn new(metadata: &SetMetadata) -> Self {
        let kind = metadata.kind();
        let members = match kind {
            SetKind::Hash => SetMembers::Hash(HashMap::new()),
            SetKind::List => SetMembers::List(BTreeSet::new()),
            SetKind::Unknown => SetMembers::Unknown,
        };
        Self {
            name: metadata.prefix_name(),
            unprefixed_name: metadata.name.clone(),
            hashed_name: metadata.hashed_name(),
            set_type: metadata.set_type,
            kind,
            members,
            selector_refs: std::collections::HashSet::new(),
            netpol_refs: std::collections::HashSet::new(),
            list_ref_count: 0,
            kernel_ref_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hashed_name(&self) -> &str {
        &self.hashed_name
    }

    pub fn set_type(&self) -> SetType {
        self.set_type
    }

    pub fn kind(&self) -> SetKind {
        self.kind
    }

    /// Rebuild the metadata this entity was created from (unprefixed
    /// original name plus type).
    pub fn metadata(&self) -> SetMetadata {
        SetMetadata::new(self.unprefixed_name.clone(), self.set_type)
    }

    /// True when identity-level properties match. Membership and
    /// references are deliberately ignored.
    pub fn shallow_eq(&self, other: &IpSet) -> bool {
        self.name == other.name && self.kind == other.kind && self.set_type == other.set_type
    }

    // ── Policy references ─────────────────────────────────────────

    /// Idempotently record a policy's dependency on this set.
    pub fn add_reference(&mut self, policy_name: &str, kind: ReferenceKind) {
        match kind {
            ReferenceKind::Selector => self.selector_refs.insert(policy_name.to_string()),
            ReferenceKind::NetPol => self.netpol_refs.insert(policy_name.to_string()),
        };
    }

    /// Idempotently drop a policy's dependency. No-op if absent.
    pub fn remove_reference(&mut self, policy_name: &str, kind: ReferenceKind) {
        match kind {
            ReferenceKind::Selector => self.selector_refs.remove(policy_name),
            ReferenceKind::NetPol => self.netpol_refs.remove(policy_name),
        };
    }

    // ── Reference counters ────────────────────────────────────────

    pub fn inc_list_ref_count(&mut self) {
        self.list_ref_count += 1;
    }

    /// Decrement the in-memory list counter. A decrement at zero is a
    /// no-op that signals the caller-contract violation instead of going
    /// negative.
    pub fn dec_list_ref_count(&mut self) -> Result<(), IpSetError> {
        if self.list_ref_count == 0 {
            return Err(IpSetError::CounterUnderflow {
                name: self.name.clone(),
                counter: RefCounter::List,
            });
        }
        self.list_ref_count -= 1;
        Ok(())
    }

    pub fn inc_kernel_ref_count(&mut self) {
        self.kernel_ref_count += 1;
    }

    /// Same discipline as [`IpSet::dec_list_ref_count`], for the
    /// programmed-kernel-state counter.
    pub fn dec_kernel_ref_count(&mut self) -> Result<(), IpSetError> {
        if self.kernel_ref_count == 0 {
            return Err(IpSetError::CounterUnderflow {
                name: self.name.clone(),
                counter: RefCounter::Kernel,
            });
        }
        self.kernel_ref_count -= 1;
        Ok(())
    }

    // ── Membership (driven by the engine) ─────────────────────────

    /// Record a leaf member with its owning workload key. Only valid for
    /// hash-kind sets.
    pub(super) fn put_leaf_member(&mut self, member: &str, owner_key: &str) -> Result<(), IpSetError> {
        match &mut self.members {
            SetMembers::Hash(map) => {
                map.insert(member.to_string(), owner_key.to_string());
                Ok(())
            }
            _ => Err(self.invalid_kind()),
        }
    }

    /// Drop a leaf member. Returns whether it was present.
    pub(super) fn take_leaf_member(&mut self, member: &str) -> Result<bool, IpSetError> {
        match &mut self.members {
            SetMembers::Hash(map) => Ok(map.remove(member).is_some()),
            _ => Err(self.invalid_kind()),
        }
    }

    /// Insert a child set's hashed name. Returns whether the edge is new.
    pub(super) fn put_list_member(&mut self, member_hashed_name: &str) -> Result<bool, IpSetError> {
        match &mut self.members {
            SetMembers::List(set) => Ok(set.insert(member_hashed_name.to_string())),
            _ => Err(self.invalid_kind()),
        }
    }

    /// Remove a child edge. Returns whether it was present.
    pub(super) fn take_list_member(&mut self, member_hashed_name: &str) -> Result<bool, IpSetError> {
        match &mut self.members {
            SetMembers::List(set) => Ok(set.remove(member_hashed_name)),
            _ => Err(self.invalid_kind()),
        }
    }

    pub(super) fn list_members(&self) -> Option<&BTreeSet<String>> {
        match &self.members {
            SetMembers::List(set) => Some(set),
            _ => None,
        }
    }

    // ── Queries ───────────────────────────────────────────────────

    /// Members of the set: leaf identities for a hash set, member hashed
    /// names for a list set. Fails with `InvalidKind` for the unknown
    /// kind — unreachable while kind derives from the total taxonomy
    /// mapping, but a corrupted entity must report, not crash.
    pub fn get_set_contents(&self) -> Result<Vec<String>, IpSetError> {
        match &self.members {
            SetMembers::Hash(map) => Ok(map.keys().cloned().collect()),
            SetMembers::List(set) => Ok(set.iter().cloned().collect()),
            SetMembers::Unknown => Err(self.invalid_kind()),
        }
    }

    /// Membership test by hashed name. Only meaningful for list sets;
    /// calling on any other kind is a caller bug reported as
    /// `InvalidKind`.
    pub fn has_member(&self, member_hashed_name: &str) -> Result<bool, IpSetError> {
        match &self.members {
            SetMembers::List(set) => Ok(set.contains(member_hashed_name)),
            _ => Err(self.invalid_kind()),
        }
    }

    /// True iff any policy references this set (selector or rule peer).
    pub fn used_by_netpol(&self) -> bool {
        !self.selector_refs.is_empty() || !self.netpol_refs.is_empty()
    }

    pub fn referenced_in_list(&self) -> bool {
        self.list_ref_count > 0
    }

    pub fn referenced_in_kernel(&self) -> bool {
        self.kernel_ref_count > 0
    }

    /// Authoritative signal for the dataplane-sync actor: the set must be
    /// (or remain) programmed while any policy uses it or anything already
    /// in the kernel still points at it.
    pub fn should_be_in_kernel(&self) -> bool {
        self.used_by_netpol() || self.referenced_in_kernel()
    }

    /// Deletability for unconditional cleanup sweeps. Current member
    /// contents are irrelevant; only live references pin the set.
    pub fn can_be_force_deleted(&self) -> bool {
        !self.used_by_netpol() && !self.referenced_in_list()
    }

    /// Deletability for ordinary reclamation: no references and no
    /// contents. For a list set, `ignorable_member` makes the decision
    /// as if one specific pending child removal had already happened, so
    /// a list and its last child can be torn down in one step without a
    /// two-phase apply.
    pub fn can_be_deleted(&self, ignorable_member: Option<&str>) -> bool {
        if self.used_by_netpol() || self.referenced_in_list() {
            return false;
        }
        match &self.members {
            SetMembers::Hash(map) => map.is_empty(),
            SetMembers::List(set) => {
                set.is_empty()
                    || (set.len() == 1
                        && ignorable_member.is_some_and(|m| set.contains(m)))
            }
            SetMembers::Unknown => true,
        }
    }

    fn invalid_kind(&self) -> IpSetError {
        IpSetError::InvalidKind {
            name: self.name.clone(),
            kind: self.kind,
        }
    }

    #[cfg(test)]
    pub(super) fn corrupt_members_for_test(&mut self) {
        self.members = SetMembers::Unknown;
    }
}

impl std::fmt::Display for IpSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Name: {} HashedName: {} Type: {} Kind: {}",
            self.name, self.hashed_name, self.set_type, self.kind
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_set(name: &str) -> IpSet {
        IpSet::new(&SetMetadata::new(name, SetType::Namespace))
    }

    fn list_set(name: &str) -> IpSet {
        IpSet::new(&SetMetadata::new(name, SetType::KeyLabelOfNamespace))
    }

    #[test]
    fn new_hash_set_identity() {
        let set = hash_set("default");
        assert_eq!(set.kind(), SetKind::Hash);
        assert_eq!(set.name(), "ns-default");
        assert_eq!(set.metadata(), SetMetadata::new("default", SetType::Namespace));
        assert!(set.hashed_name().starts_with("npset-"));
    }

    #[test]
    fn references_are_idempotent() {
        let mut set = hash_set("default");
        set.add_reference("netpol-1", ReferenceKind::NetPol);
        set.add_reference("netpol-1", ReferenceKind::NetPol);
        assert!(set.used_by_netpol());

        set.remove_reference("netpol-1", ReferenceKind::NetPol);
        assert!(!set.used_by_netpol());
        // Removing again is a no-op.
        set.remove_reference("netpol-1", ReferenceKind::NetPol);
        assert!(!set.used_by_netpol());
    }

    #[test]
    fn selector_and_netpol_refs_are_distinct() {
        let mut set = hash_set("default");
        set.add_reference("netpol-1", ReferenceKind::Selector);
        set.remove_reference("netpol-1", ReferenceKind::NetPol);
        // The selector reference survives a netpol-kind removal.
        assert!(set.used_by_netpol());
    }

    #[test]
    fn should_be_in_kernel_from_netpol_reference_alone() {
        // Scenario: referenced by a policy but not yet programmed.
        let mut set = hash_set("default");
        set.add_reference("netpol-1", ReferenceKind::NetPol);
        assert!(!set.referenced_in_kernel());
        assert!(set.should_be_in_kernel());
    }

    #[test]
    fn should_be_in_kernel_from_kernel_reference_alone() {
        let mut set = hash_set("default");
        set.inc_kernel_ref_count();
        assert!(!set.used_by_netpol());
        assert!(set.should_be_in_kernel());
    }

    #[test]
    fn dec_at_zero_is_a_signalled_no_op() {
        let mut set = hash_set("default");
        for _ in 0..2 {
            let err = set.dec_list_ref_count().unwrap_err();
            assert!(matches!(
                err,
                IpSetError::CounterUnderflow {
                    counter: RefCounter::List,
                    ..
                }
            ));
            assert!(!set.referenced_in_list());
        }
        let err = set.dec_kernel_ref_count().unwrap_err();
        assert!(matches!(
            err,
            IpSetError::CounterUnderflow {
                counter: RefCounter::Kernel,
                ..
            }
        ));
    }

    #[test]
    fn counters_balance() {
        let mut set = hash_set("default");
        set.inc_list_ref_count();
        set.inc_list_ref_count();
        assert!(set.referenced_in_list());
        set.dec_list_ref_count().unwrap();
        set.dec_list_ref_count().unwrap();
        assert!(!set.referenced_in_list());
    }

    #[test]
    fn can_be_deleted_blocked_by_leaf_members() {
        let mut set = hash_set("default");
        set.put_leaf_member("10.0.0.1", "default/pod-a").unwrap();
        assert!(!set.can_be_deleted(None));
        set.take_leaf_member("10.0.0.1").unwrap();
        assert!(set.can_be_deleted(None));
    }

    #[test]
    fn can_be_deleted_blocked_by_references() {
        let mut set = hash_set("default");
        set.add_reference("netpol-1", ReferenceKind::Selector);
        assert!(!set.can_be_deleted(None));
        set.remove_reference("netpol-1", ReferenceKind::Selector);
        set.inc_list_ref_count();
        assert!(!set.can_be_deleted(None));
    }

    #[test]
    fn ignorable_member_counts_as_removed() {
        // Scenario: a list with exactly one member is deletable only when
        // that member is the one pending removal.
        let mut list = list_set("env");
        let child = hash_set("env:prod");
        list.put_list_member(child.hashed_name()).unwrap();

        assert!(!list.can_be_deleted(None));
        assert!(list.can_be_deleted(Some(child.hashed_name())));
        // A different pending member does not unblock deletion.
        assert!(!list.can_be_deleted(Some("npset-other")));
    }

    #[test]
    fn ignorable_member_irrelevant_with_two_members() {
        let mut list = list_set("env");
        list.put_list_member("npset-child-a").unwrap();
        list.put_list_member("npset-child-b").unwrap();
        assert!(!list.can_be_deleted(Some("npset-child-a")));
    }

    #[test]
    fn force_delete_ignores_contents() {
        let mut list = list_set("env");
        list.put_list_member("npset-child-a").unwrap();
        assert!(list.can_be_force_deleted());

        list.add_reference("netpol-1", ReferenceKind::NetPol);
        assert!(!list.can_be_force_deleted());
        list.remove_reference("netpol-1", ReferenceKind::NetPol);

        list.inc_list_ref_count();
        assert!(!list.can_be_force_deleted());
    }

    #[test]
    fn contents_of_hash_set() {
        let mut set = hash_set("default");
        set.put_leaf_member("10.0.0.1", "default/pod-a").unwrap();
        set.put_leaf_member("10.0.0.2", "default/pod-b").unwrap();
        let mut contents = set.get_set_contents().unwrap();
        contents.sort();
        assert_eq!(contents, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn contents_of_list_set_are_hashed_names() {
        let mut list = list_set("env");
        let child = hash_set("env:prod");
        list.put_list_member(child.hashed_name()).unwrap();
        assert_eq!(list.get_set_contents().unwrap(), vec![child.hashed_name()]);
    }

    #[test]
    fn corrupted_kind_reports_invalid_kind() {
        // Test-only injection: kind corruption is unreachable through the
        // public API, but the query must fail, not panic.
        let mut set = hash_set("default");
        set.corrupt_members_for_test();
        assert!(matches!(
            set.get_set_contents(),
            Err(IpSetError::InvalidKind { .. })
        ));
    }

    #[test]
    fn has_member_on_hash_set_is_invalid_kind() {
        let set = hash_set("default");
        assert!(matches!(
            set.has_member("npset-anything"),
            Err(IpSetError::InvalidKind { .. })
        ));
    }

    #[test]
    fn has_member_on_list_set() {
        let mut list = list_set("env");
        list.put_list_member("npset-child-a").unwrap();
        assert!(list.has_member("npset-child-a").unwrap());
        assert!(!list.has_member("npset-child-b").unwrap());
    }

    #[test]
    fn leaf_ops_on_list_set_are_invalid_kind() {
        let mut list = list_set("env");
        assert!(list.put_leaf_member("10.0.0.1", "k").is_err());
        assert!(list.take_leaf_member("10.0.0.1").is_err());
    }

    #[test]
    fn shallow_eq_compares_identity_only() {
        let mut a = hash_set("default");
        let b = hash_set("default");
        a.put_leaf_member("10.0.0.1", "default/pod-a").unwrap();
        a.add_reference("netpol-1", ReferenceKind::NetPol);
        assert!(a.shallow_eq(&b));
        assert!(!a.shallow_eq(&hash_set("other")));
        assert!(!a.shallow_eq(&list_set("default")));
    }

    #[test]
    fn display_summary() {
        let set = hash_set("default");
        let line = set.to_string();
        assert!(line.contains("Name: ns-default"));
        assert!(line.contains("Type: Namespace"));
        assert!(line.contains("Kind: set"));
    }
}
