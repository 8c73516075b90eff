//! Post-hoc fusion of short-term track ids into long-term identities.
//!
//! The fuser walks the per-frame id sets once, in arrival order. Each id is
//! settled the first time it is seen: ids in the first non-empty frame open
//! their own groups, later ids are compared against existing groups and either
//! join the closest one or open a new group. Nothing is ever split or moved
//! once settled.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ndarray::Array2;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::FusionConfig;
use crate::fusion::comparator::{AppearanceExtractor, FeatureComparator, min_distance};
use crate::track::{TrackBuffer, TrackId};

/// Long-term identities and the short-term ids merged into each.
///
/// Groups are keyed by their representative, the first id that opened them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FusionGroups {
    groups: BTreeMap<TrackId, Vec<TrackId>>,
    fallback: BTreeSet<TrackId>,
}

impl FusionGroups {
    pub fn groups(&self) -> &BTreeMap<TrackId, Vec<TrackId>> {
        &self.groups
    }

    /// Members of the group represented by `id`, in merge order.
    pub fn members(&self, id: TrackId) -> Option<&[TrackId]> {
        self.groups.get(&id).map(Vec::as_slice)
    }

    /// Ids that had too few observations to attempt a merge and were given
    /// their own group.
    pub fn fallback(&self) -> &BTreeSet<TrackId> {
        &self.fallback
    }

    /// Number of long-term identities.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Flatten into a short-term to long-term lookup.
    pub fn remap(&self) -> IdentityRemap {
        let map = self
            .groups
            .iter()
            .flat_map(|(&long, members)| members.iter().map(move |&short| (short, long)))
            .collect();
        IdentityRemap { map }
    }
}

/// Short-term id to long-term id lookup produced by fusion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentityRemap {
    map: BTreeMap<TrackId, TrackId>,
}

impl IdentityRemap {
    pub fn get(&self, short: TrackId) -> Option<TrackId> {
        self.map.get(&short).copied()
    }

    /// Long-term id for `short`; ids fusion never saw map to themselves.
    pub fn resolve(&self, short: TrackId) -> TrackId {
        self.get(short).unwrap_or(short)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrackId, TrackId)> + '_ {
        self.map.iter().map(|(&s, &l)| (s, l))
    }
}

impl FromIterator<(TrackId, TrackId)> for IdentityRemap {
    fn from_iter<I: IntoIterator<Item = (TrackId, TrackId)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

/// Mutable state of one fusion pass.
#[derive(Debug, Default)]
struct FusionState {
    exist_ids: BTreeSet<TrackId>,
    groups: BTreeMap<TrackId, Vec<TrackId>>,
    owner: HashMap<TrackId, TrackId>,
    fallback: BTreeSet<TrackId>,
    // `None` marks an id whose embedding failed; it is not retried.
    embeddings: HashMap<TrackId, Option<Array2<f32>>>,
}

impl FusionState {
    fn open_group(&mut self, id: TrackId) {
        self.groups.insert(id, vec![id]);
        self.owner.insert(id, id);
    }

    fn merge_into(&mut self, target: TrackId, id: TrackId) {
        if let Some(members) = self.groups.get_mut(&target) {
            members.push(id);
        }
        self.owner.insert(id, target);
    }

    /// Every member of every group that has a member in `frame`.
    fn unpickable(&self, frame: &BTreeSet<TrackId>) -> BTreeSet<TrackId> {
        frame
            .iter()
            .filter_map(|id| self.owner.get(id))
            .filter_map(|key| self.groups.get(key))
            .flatten()
            .copied()
            .collect()
    }

    fn finish(self) -> FusionGroups {
        FusionGroups {
            groups: self.groups,
            fallback: self.fallback,
        }
    }
}

/// Reconciles a tracker's short-term ids into long-term identities by
/// appearance similarity.
pub struct IdentityFuser<E> {
    comparator: FeatureComparator<E>,
    min_observations: usize,
    merge_threshold: f32,
}

impl<E: AppearanceExtractor> IdentityFuser<E> {
    pub fn new(extractor: E, config: &FusionConfig) -> Self {
        Self {
            comparator: FeatureComparator::new(extractor, config.metric),
            min_observations: config.min_observations,
            merge_threshold: config.merge_threshold,
        }
    }

    pub fn comparator_mut(&mut self) -> &mut FeatureComparator<E> {
        &mut self.comparator
    }

    /// Run fusion over everything recorded in `buffer`.
    pub fn fuse(&mut self, buffer: &TrackBuffer) -> FusionGroups {
        info!(
            frames = buffer.len(),
            tracks = buffer.track_ids().len(),
            "fusing track identities"
        );

        let mut state = FusionState::default();
        for frame in buffer.frame_ids().iter().filter(|f| !f.is_empty()) {
            self.step(&mut state, frame, buffer);
        }

        let groups = state.finish();
        info!(
            identities = groups.len(),
            fallback = groups.fallback().len(),
            "fusion finished"
        );
        groups
    }

    fn step(&mut self, state: &mut FusionState, frame: &BTreeSet<TrackId>, buffer: &TrackBuffer) {
        if state.exist_ids.is_empty() {
            for &id in frame {
                state.open_group(id);
                state.exist_ids.insert(id);
            }
            return;
        }

        let new_ids: Vec<TrackId> = frame.difference(&state.exist_ids).copied().collect();
        for nid in new_ids {
            if buffer.observations(nid) < self.min_observations {
                debug!(
                    track_id = nid,
                    observations = buffer.observations(nid),
                    "too few observations, keeping as its own identity"
                );
                state.exist_ids.insert(nid);
                state.fallback.insert(nid);
                state.open_group(nid);
                continue;
            }

            let unpickable = state.unpickable(frame);
            let candidates: Vec<TrackId> = state
                .exist_ids
                .iter()
                .copied()
                .filter(|id| !unpickable.contains(id))
                .filter(|id| state.groups.contains_key(id) && !state.fallback.contains(id))
                .collect();

            self.ensure_embedded(state, nid, buffer);
            for &oid in &candidates {
                self.ensure_embedded(state, oid, buffer);
            }

            let best = self.closest(state, nid, &candidates);
            state.exist_ids.insert(nid);

            match best {
                Some((oid, dist)) if dist < self.merge_threshold => {
                    debug!(track_id = nid, into = oid, distance = dist, "merging track");
                    state.merge_into(oid, nid);
                }
                Some((oid, dist)) => {
                    debug!(track_id = nid, closest = oid, distance = dist, "no match within threshold");
                    state.open_group(nid);
                }
                None => state.open_group(nid),
            }
        }
    }

    /// Candidate with the strictly smallest distance; candidates are visited
    /// in ascending order so the lowest id wins ties.
    fn closest(&self, state: &FusionState, nid: TrackId, candidates: &[TrackId]) -> Option<(TrackId, f32)> {
        let Some(Some(feats)) = state.embeddings.get(&nid) else {
            return None;
        };

        let mut best: Option<(TrackId, f32)> = None;
        for &oid in candidates {
            let Some(Some(other)) = state.embeddings.get(&oid) else {
                continue;
            };
            let dist = match self.comparator.distance(feats, other) {
                Ok(d) => min_distance(&d),
                Err(e) => {
                    warn!(track_id = nid, candidate = oid, error = %e, "skipping candidate");
                    None
                }
            };
            if let Some(dist) = dist {
                if best.is_none_or(|(_, b)| dist < b) {
                    best = Some((oid, dist));
                }
            }
        }
        best
    }

    fn ensure_embedded(&mut self, state: &mut FusionState, id: TrackId, buffer: &TrackBuffer) {
        if state.embeddings.contains_key(&id) {
            return;
        }
        let feats = match self.comparator.embed(id, &buffer.patches(id)) {
            Ok(f) => Some(f),
            Err(e) => {
                warn!(error = %e, "embedding failed, track skipped for merging");
                None
            }
        };
        state.embeddings.insert(id, feats);
    }
}
