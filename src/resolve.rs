//! Foreign reference resolution.
//!
//! Records expose their foreign ids through [`References`]. The resolver
//! classifies every id, resolves classified ids through the typed lookups in
//! [`UniverseService`], then sends whatever is still unknown through one bulk
//! name call and writes the returned categories back onto the records.
//!
//! Lookup failures are logged and counted; only cancellation stops a batch.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::classify::{EntityKind, classify_i64};
use crate::client::Pacer;
use crate::universe::{
    Alliance, Character, Constellation, Corporation, ItemType, Lookup, Region, ResolveError,
    SolarSystem, Station, Structure, UniverseService,
};

/// What a foreign id means to the record carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefRole {
    Location,
    StartLocation,
    EndLocation,
    Issuer,
    IssuerCorporation,
    Assignee,
    Acceptor,
    Contact,
    Sender,
    Recipient,
    Bidder,
    Client,
    FirstParty,
    SecondParty,
}

/// One foreign id embedded in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignRef {
    pub id: i64,
    pub role: RefRole,
    /// Kind the payload already declared (`contact_type`, `recipient_type`, ...).
    /// Overrides range classification when known.
    pub hint: Option<EntityKind>,
}

impl ForeignRef {
    #[must_use]
    pub fn new(id: i64, role: RefRole) -> Self {
        Self {
            id,
            role,
            hint: None,
        }
    }

    #[must_use]
    pub fn hinted(id: i64, role: RefRole, hint: EntityKind) -> Self {
        Self {
            id,
            role,
            hint: Some(hint),
        }
    }

    /// Hint if known, otherwise the range classification.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self.hint {
            Some(kind) if kind.is_known() => kind,
            _ => classify_i64(self.id),
        }
    }
}

/// Foreign ids carried by a record, plus a place to store resolved kinds.
///
/// Records without foreign ids use the empty defaults.
pub trait References {
    /// Foreign ids in this record. Ids `<= 0` are ignored.
    fn foreign_refs(&self) -> Vec<ForeignRef> {
        Vec::new()
    }

    /// Records the resolved kind for the reference `(role, id)`.
    fn apply_kind(&mut self, _role: RefRole, _id: i64, _kind: EntityKind) {}
}

/// Kinds with a typed lookup.
fn has_lookup(kind: EntityKind) -> bool {
    matches!(
        kind,
        EntityKind::Character
            | EntityKind::Corporation
            | EntityKind::Alliance
            | EntityKind::Station
            | EntityKind::Structure
            | EntityKind::SolarSystem
            | EntityKind::Constellation
            | EntityKind::Region
            | EntityKind::InventoryType
    )
}

/// Work derived from a batch before any I/O.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResolutionPlan {
    /// Distinct `(kind, id)` pairs that go through a typed lookup, in first-seen order.
    pub typed: Vec<(EntityKind, i64)>,
    /// Distinct ids with a known kind but no lookup (faction, mailing list).
    pub tagged: Vec<(EntityKind, i64)>,
    /// Distinct ids that need the bulk name call.
    pub unknown: BTreeSet<i64>,
}

/// Classifies every reference of `records` into a plan.
pub fn plan<R: References>(records: &[R]) -> ResolutionPlan {
    let mut plan = ResolutionPlan::default();
    let mut seen = HashSet::new();

    for reference in records.iter().flat_map(References::foreign_refs) {
        if reference.id <= 0 {
            continue;
        }
        let kind = reference.kind();
        if kind == EntityKind::Unknown {
            plan.unknown.insert(reference.id);
        } else if seen.insert((kind, reference.id)) {
            if has_lookup(kind) {
                plan.typed.push((kind, reference.id));
            } else {
                plan.tagged.push((kind, reference.id));
            }
        }
    }
    plan
}

/// Counters of one resolution batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Typed lookups that succeeded.
    pub resolved: usize,
    /// Typed lookups that failed.
    pub failed: usize,
    /// Ids the bulk call classified.
    pub bulk_resolved: usize,
    /// Ids still unknown after the bulk call.
    pub unresolved: usize,
}

/// Resolves foreign references of freshly fetched records.
#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    universe: Arc<UniverseService>,
    pacing: Option<(Arc<Pacer>, String)>,
}

impl ReferenceResolver {
    #[must_use]
    pub fn new(universe: Arc<UniverseService>) -> Self {
        Self {
            universe,
            pacing: None,
        }
    }

    /// Same resolver, waiting on `lane` of `pacer` before each remote lookup.
    #[must_use]
    pub fn paced(&self, pacer: Arc<Pacer>, lane: impl Into<String>) -> Self {
        Self {
            universe: Arc::clone(&self.universe),
            pacing: Some((pacer, lane.into())),
        }
    }

    /// The lookup service behind this resolver.
    #[must_use]
    pub fn universe(&self) -> &Arc<UniverseService> {
        &self.universe
    }

    /// Resolves every reference in `records` and writes kinds back.
    ///
    /// `member_id` authenticates structure lookups.
    ///
    /// # Errors
    ///
    /// Only [`ResolveError::Cancelled`]; every other failure is logged and
    /// counted in the report.
    #[instrument(skip(self, records, cancel), fields(records = records.len()))]
    pub async fn resolve<R: References>(
        &self,
        records: &mut [R],
        member_id: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<ResolutionReport, ResolveError> {
        let plan = plan(records);
        let mut report = ResolutionReport::default();
        let mut kinds: HashMap<i64, EntityKind> = HashMap::new();

        for &(kind, id) in &plan.typed {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            match self.lookup(kind, id, member_id, cancel).await {
                Ok(()) => {
                    report.resolved += 1;
                    kinds.insert(id, kind);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    report.failed += 1;
                    warn!(%kind, id, error = %e, "reference lookup failed");
                }
            }
        }

        for &(kind, id) in &plan.tagged {
            kinds.insert(id, kind);
        }

        // Runs after every classification so it sees the full unknown set.
        if !plan.unknown.is_empty() {
            match self.universe.names(&plan.unknown, cancel).await {
                Ok(entries) => {
                    for entry in entries {
                        let kind = entry.kind();
                        if kind.is_known() && plan.unknown.contains(&entry.id) {
                            kinds.insert(entry.id, kind);
                        }
                    }
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => warn!(ids = plan.unknown.len(), error = %e, "bulk name lookup failed"),
            }
            // Answers may repeat an id; count each unknown id once.
            report.bulk_resolved = plan
                .unknown
                .iter()
                .filter(|id| kinds.contains_key(id))
                .count();
            report.unresolved = plan.unknown.len() - report.bulk_resolved;
            if report.unresolved > 0 {
                warn!(unresolved = report.unresolved, "ids left unknown after bulk lookup");
            }
        }

        apply_kinds(records, &kinds);
        debug!(?report, "references resolved");
        Ok(report)
    }

    async fn lookup(
        &self,
        kind: EntityKind,
        id: i64,
        member_id: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<(), ResolveError> {
        match kind {
            EntityKind::Character => self.typed::<Character>(id, member_id, cancel).await,
            EntityKind::Corporation => self.typed::<Corporation>(id, member_id, cancel).await,
            EntityKind::Alliance => self.typed::<Alliance>(id, member_id, cancel).await,
            EntityKind::Station => self.typed::<Station>(id, member_id, cancel).await,
            EntityKind::Structure => self.typed::<Structure>(id, member_id, cancel).await,
            EntityKind::SolarSystem => self.typed::<SolarSystem>(id, member_id, cancel).await,
            EntityKind::Constellation => self.typed::<Constellation>(id, member_id, cancel).await,
            EntityKind::Region => self.typed::<Region>(id, member_id, cancel).await,
            EntityKind::InventoryType => self.typed::<ItemType>(id, member_id, cancel).await,
            EntityKind::Faction | EntityKind::MailingList | EntityKind::Unknown => Ok(()),
        }
    }

    /// Cache and store hits skip the pacer; only remote fetches wait.
    async fn typed<T: Lookup>(
        &self,
        id: i64,
        member_id: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<(), ResolveError> {
        let pacing = self
            .pacing
            .as_ref()
            .map(|(pacer, lane)| (pacer.as_ref(), lane.as_str()));
        self.universe
            .lookup_paced::<T>(id, member_id, pacing, cancel)
            .await
            .map(drop)
    }
}

/// Writes resolved kinds onto every reference that carries one of the ids.
/// References whose id stayed unresolved get [`EntityKind::Unknown`].
fn apply_kinds<R: References>(records: &mut [R], kinds: &HashMap<i64, EntityKind>) {
    for record in records.iter_mut() {
        for reference in record.foreign_refs() {
            if reference.id <= 0 {
                continue;
            }
            let kind = kinds.get(&reference.id).copied().unwrap_or_default();
            record.apply_kind(reference.role, reference.id, kind);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Ledger {
        counterparty: i64,
        counterparty_kind: EntityKind,
        location: i64,
        location_kind: EntityKind,
        contact_type: Option<EntityKind>,
    }

    impl References for Ledger {
        fn foreign_refs(&self) -> Vec<ForeignRef> {
            let counterparty = match self.contact_type {
                Some(hint) => ForeignRef::hinted(self.counterparty, RefRole::Client, hint),
                None => ForeignRef::new(self.counterparty, RefRole::Client),
            };
            vec![counterparty, ForeignRef::new(self.location, RefRole::Location)]
        }

        fn apply_kind(&mut self, role: RefRole, _id: i64, kind: EntityKind) {
            match role {
                RefRole::Client => self.counterparty_kind = kind,
                RefRole::Location => self.location_kind = kind,
                _ => {}
            }
        }
    }

    fn ledger(counterparty: i64, location: i64) -> Ledger {
        Ledger {
            counterparty,
            location,
            ..Ledger::default()
        }
    }

    #[test]
    fn test_plan_alliance_never_reaches_bulk() {
        let plan = plan(&[ledger(99_050_001, 0)]);
        assert_eq!(plan.typed, vec![(EntityKind::Alliance, 99_050_001)]);
        assert!(plan.unknown.is_empty());
    }

    #[test]
    fn test_plan_ambiguous_id_goes_to_bulk() {
        let plan = plan(&[ledger(500_000_000, 60_003_760)]);
        assert_eq!(plan.typed, vec![(EntityKind::Station, 60_003_760)]);
        assert_eq!(plan.unknown, BTreeSet::from([500_000_000]));
    }

    #[test]
    fn test_plan_deduplicates_across_records() {
        let plan = plan(&[
            ledger(90_000_001, 60_003_760),
            ledger(90_000_001, 60_003_760),
            ledger(500_000_000, 500_000_000),
        ]);
        assert_eq!(plan.typed.len(), 2);
        assert_eq!(plan.unknown.len(), 1);
    }

    #[test]
    fn test_plan_hint_overrides_classification() {
        let mut record = ledger(500_001, 0);
        record.contact_type = Some(EntityKind::Faction);
        let plan = plan(&[record]);
        assert_eq!(plan.tagged, vec![(EntityKind::Faction, 500_001)]);
        assert!(plan.unknown.is_empty());
    }

    #[test]
    fn test_plan_ignores_non_positive_ids() {
        let plan = plan(&[ledger(0, -5)]);
        assert_eq!(plan, ResolutionPlan::default());
    }

    #[test]
    fn test_apply_kinds_defaults_unresolved_to_unknown() {
        let mut records = [ledger(500_000_000, 60_003_760)];
        records[0].counterparty_kind = EntityKind::Character;

        let kinds = HashMap::from([(60_003_760, EntityKind::Station)]);
        apply_kinds(&mut records, &kinds);

        assert_eq!(records[0].location_kind, EntityKind::Station);
        assert_eq!(records[0].counterparty_kind, EntityKind::Unknown);
    }
}
