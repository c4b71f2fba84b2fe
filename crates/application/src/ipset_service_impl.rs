use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use domain::common::error::DomainError;
use domain::ipset::engine::IpSetEngine;
use domain::ipset::entity::ReferenceKind;
use domain::ipset::error::IpSetError;
use domain::ipset::taxonomy::{SetKind, SetMetadata, SetType};
use domain::ipset::translated::{TranslatedSet, members_as_metadata};
use ports::secondary::dataplane_port::DataplanePort;
use ports::secondary::metrics_port::MetricsPort;

/// Outcome of one dataplane reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub destroyed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
struct ProgrammedSet {
    kind: SetKind,
    members: Vec<String>,
}

/// Application-level set lifecycle service.
///
/// Orchestrates the domain engine, optional kernel dataplane sync, and
/// diagnostics. Designed to be wrapped in `RwLock` for shared access from
/// the policy-event consumer and the dataplane-sync actor; every method
/// is synchronous and bounded, so critical sections stay short.
pub struct IpSetAppService {
    engine: IpSetEngine,
    dataplane: Option<Box<dyn DataplanePort + Send>>,
    metrics: Arc<dyn MetricsPort>,
    /// Kernel state as last confirmed applied, keyed by hashed name.
    programmed: HashMap<String, ProgrammedSet>,
}

impl IpSetAppService {
    pub fn new(
        engine: IpSetEngine,
        dataplane: Option<Box<dyn DataplanePort + Send>>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        Self {
            engine,
            dataplane,
            metrics,
            programmed: HashMap::new(),
        }
    }

    /// Wire the kernel driver in after startup. Until then the service
    /// runs in cache-only mode and `reconcile` is a no-op.
    pub fn set_dataplane_port(&mut self, port: Box<dyn DataplanePort + Send>) {
        self.dataplane = Some(port);
    }

    pub fn engine(&self) -> &IpSetEngine {
        &self.engine
    }

    pub fn set_count(&self) -> usize {
        self.engine.len()
    }

    /// Cap the number of entities the engine will create. Sets already
    /// cached stay; only further growth is refused.
    pub fn set_max_sets(&mut self, limit: usize) {
        self.engine.set_capacity(limit);
    }

    // ── Policy-event entry points ─────────────────────────────────

    /// Record a policy's dependency on a set, creating the entity on
    /// first reference.
    pub fn add_reference(
        &mut self,
        metadata: &SetMetadata,
        policy_name: &str,
        kind: ReferenceKind,
    ) -> Result<(), DomainError> {
        let result = self.engine.add_reference(metadata, policy_name, kind);
        self.after_mutation(result)
    }

    pub fn remove_reference(
        &mut self,
        metadata: &SetMetadata,
        policy_name: &str,
        kind: ReferenceKind,
    ) {
        self.engine.remove_reference(metadata, policy_name, kind);
        self.update_metrics();
    }

    /// Insert a member set into a list set.
    pub fn add_member(
        &mut self,
        list: &SetMetadata,
        member: &SetMetadata,
    ) -> Result<(), DomainError> {
        let result = self.engine.add_member(list, member);
        self.after_mutation(result)
    }

    pub fn remove_member(
        &mut self,
        list: &SetMetadata,
        member: &SetMetadata,
    ) -> Result<(), DomainError> {
        let result = self.engine.remove_member(list, member);
        self.after_mutation(result)
    }

    /// Materialize a translated set and its policy-scoped membership.
    ///
    /// `CIDRBlocks` members are leaf IP ranges recorded against the set's
    /// own prefixed name (translated members have no owning pod).
    /// `NestedLabelOfPod` members are key-value pod label sets inserted
    /// as list members. Other types arrive without members and are only
    /// materialized.
    pub fn apply_translated_set(&mut self, translated: &TranslatedSet) -> Result<(), DomainError> {
        let metadata = &translated.metadata;
        let result = match metadata.set_type {
            SetType::CIDRBlocks => {
                let owner = metadata.prefix_name();
                translated.members.iter().try_for_each(|member| {
                    self.engine.add_leaf_member(metadata, member, &owner)
                })
            }
            SetType::NestedLabelOfPod => members_as_metadata(&translated.members)
                .iter()
                .try_for_each(|member| self.engine.add_member(metadata, member)),
            _ => self.engine.ensure(metadata).map(|_| ()),
        };
        self.after_mutation(result)
    }

    /// Reverse of [`IpSetAppService::apply_translated_set`], called when
    /// the originating policy is removed. Only the policy-scoped members
    /// are stripped; reclaiming the entity itself is a separate, explicit
    /// deletion decision.
    pub fn remove_translated_set(&mut self, translated: &TranslatedSet) -> Result<(), DomainError> {
        let metadata = &translated.metadata;
        let result = match metadata.set_type {
            SetType::CIDRBlocks => translated
                .members
                .iter()
                .try_for_each(|member| self.engine.remove_leaf_member(metadata, member)),
            SetType::NestedLabelOfPod => members_as_metadata(&translated.members)
                .iter()
                .try_for_each(|member| self.engine.remove_member(metadata, member)),
            _ => Ok(()),
        };
        self.after_mutation(result)
    }

    // ── Kernel reference report-back ──────────────────────────────

    /// Called by an external kernel programmer (e.g. the ACL rule
    /// applier) once a kernel reference to this set has been confirmed
    /// applied.
    pub fn inc_kernel_ref_count(&mut self, hashed_name: &str) -> Result<(), DomainError> {
        self.engine.inc_kernel_ref_count(hashed_name).map_err(Into::into)
    }

    /// Counterpart of [`IpSetAppService::inc_kernel_ref_count`]. An
    /// underflow is clamped and surfaced as a contract-violation
    /// diagnostic, not an error: state is already consistent.
    pub fn dec_kernel_ref_count(&mut self, hashed_name: &str) -> Result<(), DomainError> {
        let result = self.engine.dec_kernel_ref_count(hashed_name);
        self.absorb_underflow(result)
    }

    /// Direct list-counter decrement, exposed for the same report-back
    /// discipline. Ordinary membership changes go through
    /// [`IpSetAppService::remove_member`], which balances the counter
    /// itself.
    pub fn dec_list_ref_count(&mut self, hashed_name: &str) -> Result<(), DomainError> {
        let result = self.engine.dec_list_ref_count(hashed_name);
        self.absorb_underflow(result)
    }

    // ── Deletion ──────────────────────────────────────────────────

    /// Explicitly reclaim a set once the deletability predicate holds.
    pub fn delete_set(
        &mut self,
        metadata: &SetMetadata,
        ignorable_member: Option<&str>,
    ) -> Result<(), DomainError> {
        self.engine.delete_set(metadata, ignorable_member)?;
        self.metrics.record_sets_reclaimed(1);
        self.update_metrics();
        Ok(())
    }

    /// Force-delete sweep over the whole arena for orphan reclamation.
    /// Returns the hashed names that were reclaimed; the next
    /// `reconcile` tears the corresponding kernel sets down.
    pub fn cleanup(&mut self) -> Vec<String> {
        let reclaimed = self.engine.sweep_deletable();
        if !reclaimed.is_empty() {
            tracing::info!(count = reclaimed.len(), "reclaimed orphaned sets");
            self.metrics.record_sets_reclaimed(reclaimed.len() as u64);
        }
        self.update_metrics();
        reclaimed
    }

    // ── Dataplane reconciliation ──────────────────────────────────

    /// Drive the kernel dataplane to match the engine's predicates.
    ///
    /// The plan is computed from engine state, then applied through the
    /// port; kernel references implied by programmed list membership are
    /// reported back into the engine (a member of a kernel-present list
    /// is kernel-referenced). Iterates to a fixpoint because programming
    /// a list pins its members and destroying one releases them.
    pub fn reconcile(&mut self) -> SyncReport {
        let mut report = SyncReport::default();
        if self.dataplane.is_none() {
            return report;
        }

        // Bounded: each extra pass exists only because the previous one
        // changed kernel state, and the universe of names is finite.
        let max_passes = self.engine.len() + self.programmed.len() + 1;
        for _ in 0..max_passes {
            let before = report.clone();
            self.reconcile_pass(&mut report);
            if report == before {
                break;
            }
        }

        let result = if report.failed == 0 { "success" } else { "failure" };
        self.metrics.record_dataplane_sync(result);
        self.update_metrics();
        report
    }

    fn reconcile_pass(&mut self, report: &mut SyncReport) {
        let desired = self.desired_closure();

        // Empty creates first, so member replacement below never names a
        // set the kernel lacks.
        for (hashed, (kind, _)) in &desired {
            if self.programmed.contains_key(hashed) {
                continue;
            }
            let Some(port) = self.dataplane.as_mut() else {
                return;
            };
            match port.create_set(hashed, *kind) {
                Ok(()) => {
                    self.programmed.insert(
                        hashed.clone(),
                        ProgrammedSet {
                            kind: *kind,
                            members: Vec::new(),
                        },
                    );
                    report.created += 1;
                }
                Err(e) => {
                    tracing::warn!(set = %hashed, "failed to create kernel set: {e}");
                    report.failed += 1;
                }
            }
        }

        for (hashed, (kind, members)) in &desired {
            let old_members = match self.programmed.get(hashed) {
                Some(current) if current.members != *members => current.members.clone(),
                // Already in sync, or its create failed above (retried
                // next pass).
                _ => continue,
            };
            let Some(port) = self.dataplane.as_mut() else {
                return;
            };
            match port.replace_members(hashed, members) {
                Ok(()) => {
                    self.programmed.insert(
                        hashed.clone(),
                        ProgrammedSet {
                            kind: *kind,
                            members: members.clone(),
                        },
                    );
                    if *kind == SetKind::List {
                        self.report_membership_diff(&old_members, members);
                    }
                    report.updated += 1;
                }
                Err(e) => {
                    tracing::warn!(set = %hashed, "failed to replace kernel set members: {e}");
                    report.failed += 1;
                }
            }
        }

        // Destroy programmed sets nothing wants anymore — but never one
        // still listed as a member of another programmed set.
        let victims: Vec<String> = self
            .programmed
            .keys()
            .filter(|hashed| !desired.contains_key(*hashed))
            .filter(|hashed| !self.is_programmed_member(hashed))
            .cloned()
            .collect();
        for hashed in victims {
            let Some(port) = self.dataplane.as_mut() else {
                return;
            };
            match port.destroy_set(&hashed) {
                Ok(()) => {
                    if let Some(gone) = self.programmed.remove(&hashed) {
                        if gone.kind == SetKind::List {
                            self.report_membership_diff(&gone.members, &[]);
                        }
                    }
                    report.destroyed += 1;
                }
                Err(e) => {
                    tracing::warn!(set = %hashed, "failed to destroy kernel set: {e}");
                    report.failed += 1;
                }
            }
        }
    }

    /// Every set that should be in the kernel, plus — transitively — the
    /// members of any list among them: a kernel list can only name sets
    /// that exist in the kernel. Deterministic order for stable plans.
    fn desired_closure(&self) -> BTreeMap<String, (SetKind, Vec<String>)> {
        let mut closure: BTreeMap<String, (SetKind, Vec<String>)> = BTreeMap::new();
        let mut queue: Vec<String> = self.engine.sets_to_program();
        while let Some(hashed) = queue.pop() {
            if closure.contains_key(&hashed) {
                continue;
            }
            let Some(set) = self.engine.get(&hashed) else {
                continue;
            };
            let Ok(mut members) = set.get_set_contents() else {
                // Unknown-kind entities are non-operational.
                continue;
            };
            members.sort();
            if set.kind() == SetKind::List {
                queue.extend(members.iter().cloned());
            }
            closure.insert(hashed, (set.kind(), members));
        }
        closure
    }

    fn is_programmed_member(&self, hashed_name: &str) -> bool {
        self.programmed
            .values()
            .any(|p| p.kind == SetKind::List && p.members.iter().any(|m| m == hashed_name))
    }

    /// Report kernel-reference changes implied by a programmed list's
    /// membership diff back into the engine.
    fn report_membership_diff(&mut self, old_members: &[String], new_members: &[String]) {
        let old: BTreeSet<&String> = old_members.iter().collect();
        let new: BTreeSet<&String> = new_members.iter().collect();
        for added in new.difference(&old) {
            // The member entity can already be gone when a list outlives
            // a reclaimed child in the kernel plan; nothing to track.
            self.engine.inc_kernel_ref_count(added).ok();
        }
        for removed in old.difference(&new) {
            match self.engine.dec_kernel_ref_count(removed) {
                Ok(()) => {}
                Err(err @ IpSetError::CounterUnderflow { .. }) => self.signal_underflow(&err),
                // Same story on the way out: the child was reclaimed
                // while the list still carried it in the kernel plan.
                Err(_) => {}
            }
        }
    }

    // ── Diagnostics plumbing ──────────────────────────────────────

    fn after_mutation(&mut self, result: Result<(), IpSetError>) -> Result<(), DomainError> {
        if let Err(IpSetError::UnknownType { name }) = &result {
            tracing::warn!(set = %name, "unknown set type reached the lifecycle engine");
            self.metrics.record_taxonomy_violation();
        }
        self.update_metrics();
        result.map_err(Into::into)
    }

    /// Clamp-and-signal handling for counter underflows: log, count, and
    /// report success — the engine already left the counter at zero.
    fn absorb_underflow(&mut self, result: Result<(), IpSetError>) -> Result<(), DomainError> {
        match result {
            Err(err @ IpSetError::CounterUnderflow { .. }) => {
                self.signal_underflow(&err);
                Ok(())
            }
            other => other.map_err(Into::into),
        }
    }

    fn signal_underflow(&self, err: &IpSetError) {
        if let IpSetError::CounterUnderflow { name, counter } = err {
            tracing::warn!(
                set = %name,
                counter = %counter,
                "reference counter decremented at zero — missing increment or double decrement upstream"
            );
            self.metrics.record_counter_underflow(counter.as_str());
        }
    }

    fn update_metrics(&self) {
        self.metrics.set_sets_in_cache(self.engine.len() as u64);
        self.metrics.set_sets_in_kernel(self.programmed.len() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ports::test_utils::{MockDataplane, NoopMetrics, RecordingMetrics};

    fn ns_meta(name: &str) -> SetMetadata {
        SetMetadata::new(name, SetType::Namespace)
    }

    fn label_meta(name: &str) -> SetMetadata {
        SetMetadata::new(name, SetType::KeyValueLabelOfPod)
    }

    fn list_meta(name: &str) -> SetMetadata {
        SetMetadata::new(name, SetType::KeyLabelOfNamespace)
    }

    fn make_service() -> IpSetAppService {
        IpSetAppService::new(IpSetEngine::new(), None, Arc::new(NoopMetrics))
    }

    fn make_synced_service() -> (IpSetAppService, MockDataplane) {
        let mock = MockDataplane::default();
        let svc = IpSetAppService::new(
            IpSetEngine::new(),
            Some(Box::new(mock.clone())),
            Arc::new(NoopMetrics),
        );
        (svc, mock)
    }

    #[test]
    fn reference_lifecycle_roundtrip() {
        let mut svc = make_service();
        let meta = ns_meta("default");
        svc.add_reference(&meta, "netpol-1", ReferenceKind::NetPol).unwrap();
        assert_eq!(svc.set_count(), 1);
        assert!(svc.engine().get_by_metadata(&meta).unwrap().should_be_in_kernel());

        svc.remove_reference(&meta, "netpol-1", ReferenceKind::NetPol);
        assert!(!svc.engine().get_by_metadata(&meta).unwrap().should_be_in_kernel());
        svc.delete_set(&meta, None).unwrap();
        assert_eq!(svc.set_count(), 0);
    }

    #[test]
    fn unknown_type_counts_taxonomy_violation() {
        let metrics = Arc::new(RecordingMetrics::default());
        let mut svc = IpSetAppService::new(IpSetEngine::new(), None, metrics.clone());
        let err = svc.add_reference(
            &SetMetadata::new("mystery", SetType::Unknown),
            "netpol-1",
            ReferenceKind::Selector,
        );
        assert!(err.is_err());
        assert_eq!(metrics.violations(), 1);
        assert_eq!(svc.set_count(), 0);
    }

    #[test]
    fn double_dec_signals_exactly_twice() {
        // DecListRefCount twice on a zero counter: clamped to zero both
        // times, contract-violation signal emitted both times.
        let metrics = Arc::new(RecordingMetrics::default());
        let mut svc = IpSetAppService::new(IpSetEngine::new(), None, metrics.clone());
        let meta = ns_meta("default");
        svc.add_reference(&meta, "netpol-1", ReferenceKind::Selector).unwrap();
        let hashed = meta.hashed_name();

        svc.dec_list_ref_count(&hashed).unwrap();
        svc.dec_list_ref_count(&hashed).unwrap();
        assert_eq!(metrics.underflows(), 2);
        assert!(!svc.engine().get(&hashed).unwrap().referenced_in_list());
    }

    #[test]
    fn kernel_dec_underflow_is_absorbed_and_counted() {
        let metrics = Arc::new(RecordingMetrics::default());
        let mut svc = IpSetAppService::new(IpSetEngine::new(), None, metrics.clone());
        let meta = ns_meta("default");
        svc.add_reference(&meta, "netpol-1", ReferenceKind::Selector).unwrap();
        let hashed = meta.hashed_name();

        svc.inc_kernel_ref_count(&hashed).unwrap();
        svc.dec_kernel_ref_count(&hashed).unwrap();
        svc.dec_kernel_ref_count(&hashed).unwrap();
        assert_eq!(metrics.underflows(), 1);
    }

    #[test]
    fn missing_set_is_an_error_not_an_underflow() {
        let mut svc = make_service();
        assert!(svc.dec_kernel_ref_count("npset-missing").is_err());
    }

    #[test]
    fn translated_cidr_set_members() {
        let mut svc = make_service();
        let ts = TranslatedSet::new(
            "netpol-1-cidr-0",
            SetType::CIDRBlocks,
            ["10.0.0.0/8".to_string(), "192.168.0.0/16".to_string()],
        );
        svc.apply_translated_set(&ts).unwrap();

        let mut contents = svc
            .engine()
            .get_set_contents(&ts.metadata.hashed_name())
            .unwrap();
        contents.sort();
        assert_eq!(contents, vec!["10.0.0.0/8", "192.168.0.0/16"]);

        svc.remove_translated_set(&ts).unwrap();
        let set = svc.engine().get_by_metadata(&ts.metadata).unwrap();
        assert!(set.can_be_deleted(None));
    }

    #[test]
    fn translated_nested_set_builds_list_membership() {
        let mut svc = make_service();
        let ts = TranslatedSet::new(
            "netpol-1-nested-0",
            SetType::NestedLabelOfPod,
            ["env:prod".to_string(), "env:staging".to_string()],
        );
        svc.apply_translated_set(&ts).unwrap();
        // The list plus its two materialized members.
        assert_eq!(svc.set_count(), 3);

        let child = label_meta("env:prod");
        assert!(svc.engine().get_by_metadata(&child).unwrap().referenced_in_list());

        svc.remove_translated_set(&ts).unwrap();
        assert!(!svc.engine().get_by_metadata(&child).unwrap().referenced_in_list());
    }

    #[test]
    fn translated_skeleton_set_only_materializes() {
        let mut svc = make_service();
        let ts = TranslatedSet::new("default", SetType::Namespace, []);
        svc.apply_translated_set(&ts).unwrap();
        assert_eq!(svc.set_count(), 1);
        assert!(svc
            .engine()
            .get_set_contents(&ts.metadata.hashed_name())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn cleanup_reclaims_orphans_only() {
        let mut svc = make_service();
        let keep = ns_meta("default");
        svc.add_reference(&keep, "netpol-1", ReferenceKind::Selector).unwrap();
        svc.apply_translated_set(&TranslatedSet::new("orphan", SetType::Namespace, []))
            .unwrap();

        let reclaimed = svc.cleanup();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(svc.set_count(), 1);
        assert!(svc.engine().get_by_metadata(&keep).is_some());
    }

    #[test]
    fn reconcile_without_port_is_a_noop() {
        let mut svc = make_service();
        svc.add_reference(&ns_meta("default"), "netpol-1", ReferenceKind::NetPol)
            .unwrap();
        assert_eq!(svc.reconcile(), SyncReport::default());
    }

    #[test]
    fn reconcile_programs_referenced_sets() {
        let (mut svc, mock) = make_synced_service();
        let meta = ns_meta("default");
        svc.add_reference(&meta, "netpol-1", ReferenceKind::NetPol).unwrap();
        let ts = TranslatedSet::new(
            "netpol-1-cidr-0",
            SetType::CIDRBlocks,
            ["10.0.0.0/8".to_string()],
        );
        svc.apply_translated_set(&ts).unwrap();
        svc.add_reference(&ts.metadata, "netpol-1", ReferenceKind::NetPol).unwrap();

        let report = svc.reconcile();
        assert_eq!(report.created, 2);
        assert_eq!(report.failed, 0);

        let mut expected = vec![meta.hashed_name(), ts.metadata.hashed_name()];
        expected.sort();
        assert_eq!(mock.programmed(), expected);
        assert_eq!(
            mock.members_of(&ts.metadata.hashed_name()).unwrap(),
            vec!["10.0.0.0/8"]
        );
    }

    #[test]
    fn reconcile_pulls_list_members_into_kernel_and_pins_them() {
        let (mut svc, mock) = make_synced_service();
        let list = list_meta("env");
        let child = label_meta("env:prod");
        svc.add_member(&list, &child).unwrap();
        svc.add_reference(&list, "netpol-1", ReferenceKind::NetPol).unwrap();

        let report = svc.reconcile();
        // The child is programmed purely because the list names it.
        assert_eq!(report.created, 2);
        assert_eq!(
            mock.members_of(&list.hashed_name()).unwrap(),
            vec![child.hashed_name()]
        );

        let child_entity = svc.engine().get(&child.hashed_name()).unwrap();
        assert!(child_entity.referenced_in_kernel());
        assert!(child_entity.should_be_in_kernel());
    }

    #[test]
    fn reconcile_tears_down_unreferenced_sets_and_releases_members() {
        let (mut svc, mock) = make_synced_service();
        let list = list_meta("env");
        let child = label_meta("env:prod");
        svc.add_member(&list, &child).unwrap();
        svc.add_reference(&list, "netpol-1", ReferenceKind::NetPol).unwrap();
        svc.reconcile();

        svc.remove_reference(&list, "netpol-1", ReferenceKind::NetPol);
        let report = svc.reconcile();
        // The list goes first, then the child it was pinning.
        assert_eq!(report.destroyed, 2);
        assert_eq!(mock.programmed(), Vec::<String>::new());
        assert!(!svc
            .engine()
            .get(&child.hashed_name())
            .unwrap()
            .referenced_in_kernel());
    }

    #[test]
    fn reconcile_is_idempotent() {
        let (mut svc, _mock) = make_synced_service();
        svc.add_reference(&ns_meta("default"), "netpol-1", ReferenceKind::NetPol)
            .unwrap();
        svc.reconcile();
        let second = svc.reconcile();
        assert_eq!(second, SyncReport::default());
    }

    #[test]
    fn reconcile_reports_failures_and_retries() {
        let metrics = Arc::new(RecordingMetrics::default());
        let mock = MockDataplane::failing_creates();
        let mut svc = IpSetAppService::new(
            IpSetEngine::new(),
            Some(Box::new(mock.clone())),
            metrics.clone(),
        );
        svc.add_reference(&ns_meta("default"), "netpol-1", ReferenceKind::NetPol)
            .unwrap();

        let report = svc.reconcile();
        assert!(report.failed > 0);
        assert_eq!(report.created, 0);
        assert!(mock.programmed().is_empty());
        assert_eq!(metrics.failed_syncs(), 1);
    }

    #[test]
    fn deleted_set_is_destroyed_on_next_reconcile() {
        let (mut svc, mock) = make_synced_service();
        let meta = ns_meta("default");
        svc.add_reference(&meta, "netpol-1", ReferenceKind::NetPol).unwrap();
        svc.reconcile();
        assert_eq!(mock.programmed().len(), 1);

        svc.remove_reference(&meta, "netpol-1", ReferenceKind::NetPol);
        svc.delete_set(&meta, None).unwrap();
        let report = svc.reconcile();
        assert_eq!(report.destroyed, 1);
        assert!(mock.programmed().is_empty());
    }

    #[test]
    fn member_update_flows_to_kernel() {
        let (mut svc, mock) = make_synced_service();
        let list = list_meta("env");
        let prod = label_meta("env:prod");
        svc.add_member(&list, &prod).unwrap();
        svc.add_reference(&list, "netpol-1", ReferenceKind::NetPol).unwrap();
        svc.reconcile();

        let staging = label_meta("env:staging");
        svc.add_member(&list, &staging).unwrap();
        let report = svc.reconcile();
        assert!(report.updated >= 1);

        let mut expected = vec![prod.hashed_name(), staging.hashed_name()];
        expected.sort();
        assert_eq!(mock.members_of(&list.hashed_name()).unwrap(), expected);
        assert!(svc
            .engine()
            .get(&staging.hashed_name())
            .unwrap()
            .referenced_in_kernel());
    }

    #[test]
    fn cache_limit_rejects_growth() {
        let mut svc =
            IpSetAppService::new(IpSetEngine::with_capacity(2), None, Arc::new(NoopMetrics));
        svc.add_reference(&ns_meta("a"), "netpol-1", ReferenceKind::Selector).unwrap();
        svc.add_reference(&ns_meta("b"), "netpol-1", ReferenceKind::Selector).unwrap();

        let err = svc.add_reference(&ns_meta("c"), "netpol-1", ReferenceKind::Selector);
        assert!(err.is_err());
        assert_eq!(svc.set_count(), 2);

        // Referencing a set already in the cache is not growth.
        svc.add_reference(&ns_meta("a"), "netpol-2", ReferenceKind::NetPol).unwrap();

        svc.set_max_sets(3);
        svc.add_reference(&ns_meta("c"), "netpol-1", ReferenceKind::Selector).unwrap();
        assert_eq!(svc.set_count(), 3);
    }

    #[test]
    fn reconcile_survives_member_reclaimed_before_list_update() {
        // A cleanup sweep can reclaim a childless member while a
        // programmed list still names it in the kernel plan. The next
        // membership diff then refers to an entity that no longer
        // exists, which is not a counter underflow.
        let metrics = Arc::new(RecordingMetrics::default());
        let mock = MockDataplane::default();
        let mut svc = IpSetAppService::new(
            IpSetEngine::new(),
            Some(Box::new(mock.clone())),
            metrics.clone(),
        );
        let list = list_meta("env");
        let child = label_meta("env:prod");
        svc.add_member(&list, &child).unwrap();
        svc.add_reference(&list, "netpol-1", ReferenceKind::NetPol).unwrap();
        svc.reconcile();

        svc.remove_member(&list, &child).unwrap();
        let reclaimed = svc.cleanup();
        assert_eq!(reclaimed, vec![child.hashed_name()]);

        svc.reconcile();
        assert_eq!(mock.programmed(), vec![list.hashed_name()]);
        assert!(mock.members_of(&list.hashed_name()).unwrap().is_empty());
        assert_eq!(metrics.underflows(), 0);
    }
}
