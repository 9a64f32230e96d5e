// 🔍 Duplicate Resolver - Pick one survivor per duplicate group
//
// Records are grouped when they share any of:
// - identity key (the merger's matching key)
// - grouping key (issuer + core name without brand / tier words)
// - storage key (two records must never fight over one repository row)
//
// Within a group: score, sort descending (stable on discovery order), keep the
// top record, emit one removal directive per loser, fold losers into the
// survivor.

use crate::entities::EntityRecord;
use crate::identity::group_key;
use crate::merge::absorb;
use crate::scoring::{score, RewardLookup};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

// ============================================================================
// REMOVAL DIRECTIVE
// ============================================================================

/// One deletion, in the order a repository must apply it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalStep {
    CategoryRewards,
    SignupBonus,
    Entity,
}

/// Advisory: remove a superseded record and its children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalDirective {
    pub identity_key: String,
    pub storage_key: String,
    pub display_name: String,
    /// Set when the loser was loaded from a repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub score: i64,

    pub survivor_identity_key: String,
    pub survivor_storage_key: String,
    pub survivor_score: i64,
}

impl RemovalDirective {
    /// Children first, parent last
    pub fn steps(&self) -> [RemovalStep; 3] {
        [RemovalStep::CategoryRewards, RemovalStep::SignupBonus, RemovalStep::Entity]
    }

    pub fn reason(&self) -> String {
        format!(
            "'{}' (score {}) superseded by '{}' (score {})",
            self.storage_key, self.score, self.survivor_storage_key, self.survivor_score
        )
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub storage_key: String,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub issuer: String,
    pub core_name: String,
    pub survivor_storage_key: String,
    /// Ranked, survivor first
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// In discovery order
    pub survivors: Vec<EntityRecord>,
    pub directives: Vec<RemovalDirective>,
    pub groups: Vec<DuplicateGroup>,
}

impl Resolution {
    pub fn summary(&self) -> String {
        format!(
            "{} survivors, {} duplicate groups, {} removals",
            self.survivors.len(),
            self.groups.len(),
            self.directives.len()
        )
    }
}

// ============================================================================
// DUPLICATE RESOLVER
// ============================================================================

pub struct DuplicateResolver {
    /// Fold each loser's data into its survivor (default: true)
    pub absorb_losers: bool,
}

impl DuplicateResolver {
    pub fn new() -> Self {
        DuplicateResolver { absorb_losers: true }
    }

    pub fn with_absorption(mut self, absorb_losers: bool) -> Self {
        self.absorb_losers = absorb_losers;
        self
    }

    pub fn resolve(&self, mut records: Vec<EntityRecord>, lookup: &dyn RewardLookup) -> Resolution {
        records.sort_by_key(|r| r.discovery_seq);

        let mut resolution = Resolution::default();
        let groups = group_indices(&records);
        let mut slots: Vec<Option<EntityRecord>> = records.into_iter().map(Some).collect();

        for members in groups {
            if members.len() == 1 {
                if let Some(record) = slots[members[0]].take() {
                    resolution.survivors.push(record);
                }
                continue;
            }

            // Members are already in discovery order; the sort is stable
            let mut ranked: Vec<(EntityRecord, i64)> = members
                .iter()
                .filter_map(|&i| slots[i].take())
                .map(|record| {
                    let s = score(&record, lookup);
                    (record, s)
                })
                .collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1));

            let mut ranked = ranked.into_iter();
            let Some((mut survivor, survivor_score)) = ranked.next() else {
                continue;
            };
            let (issuer, core_name) = group_key(&survivor.display_name, &survivor.issuer);
            let mut group = DuplicateGroup {
                issuer,
                core_name,
                survivor_storage_key: survivor.storage_key.clone(),
                members: vec![GroupMember {
                    storage_key: survivor.storage_key.clone(),
                    score: survivor_score,
                }],
            };

            for (loser, loser_score) in ranked {
                let directive = RemovalDirective {
                    identity_key: loser.identity_key.clone(),
                    storage_key: loser.storage_key.clone(),
                    display_name: loser.display_name.clone(),
                    entity_id: loser.entity_id.clone(),
                    score: loser_score,
                    survivor_identity_key: survivor.identity_key.clone(),
                    survivor_storage_key: survivor.storage_key.clone(),
                    survivor_score,
                };
                info!(target: "resolve", "{}", directive.reason());

                group.members.push(GroupMember {
                    storage_key: loser.storage_key.clone(),
                    score: loser_score,
                });
                if self.absorb_losers {
                    absorb(&mut survivor, &loser);
                }
                resolution.directives.push(directive);
            }

            // Absorption may fill an empty name or issuer and move the slug
            group.survivor_storage_key = survivor.storage_key.clone();
            resolution.groups.push(group);
            resolution.survivors.push(survivor);
        }

        resolution.survivors.sort_by_key(|r| r.discovery_seq);
        resolution
    }
}

impl Default for DuplicateResolver {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// GROUPING
// ============================================================================

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        // Keep the earlier record as root
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[child] = root;
    }
}

/// Connected groups of record indices, each group and the group list in
/// discovery order
fn group_indices(records: &[EntityRecord]) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..records.len()).collect();
    let mut by_identity: HashMap<&str, usize> = HashMap::new();
    let mut by_storage: HashMap<&str, usize> = HashMap::new();
    let mut by_group: HashMap<(String, String), usize> = HashMap::new();

    for (i, record) in records.iter().enumerate() {
        if !record.identity_key.is_empty() {
            match by_identity.get(record.identity_key.as_str()) {
                Some(&j) => union(&mut parent, i, j),
                None => {
                    by_identity.insert(record.identity_key.as_str(), i);
                }
            }
        }

        if !record.storage_key.is_empty() {
            match by_storage.get(record.storage_key.as_str()) {
                Some(&j) => union(&mut parent, i, j),
                None => {
                    by_storage.insert(record.storage_key.as_str(), i);
                }
            }
        }

        // A name made only of brand / tier words says nothing; do not group on it
        let key = group_key(&record.display_name, &record.issuer);
        if !key.1.is_empty() {
            match by_group.get(&key) {
                Some(&j) => union(&mut parent, i, j),
                None => {
                    by_group.insert(key, i);
                }
            }
        }
    }

    let mut order: Vec<usize> = Vec::new();
    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..records.len() {
        let root = find(&mut parent, i);
        members
            .entry(root)
            .or_insert_with(|| {
                order.push(root);
                Vec::new()
            })
            .push(i);
    }

    order
        .into_iter()
        .filter_map(|root| members.remove(&root))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
