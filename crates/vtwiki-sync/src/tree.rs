//! Relationship trees computed from the persisted corpus. Both builders are
//! pure; the async wrappers only load the snapshot.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use vtwiki_core::{
    AgencyRecord, EdgeKind, NodeId, PageId, Tree, TreeEdge, TreeNode, VtuberRecord,
};
use vtwiki_storage::{AgencyRepository, ProfileRepository, StorageError};

use crate::agency::AgencyDirectory;

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn sorted_by_id(records: &[VtuberRecord]) -> Vec<&VtuberRecord> {
    let mut sorted = records.iter().collect::<Vec<_>>();
    sorted.sort_by_key(|record| record.id());
    sorted
}

fn vtuber_node(record: &VtuberRecord) -> TreeNode {
    TreeNode {
        id: NodeId::Vtuber(record.id()),
        name: record.vtuber.name.clone(),
        image: record.vtuber.image.clone(),
        retired: record.vtuber.is_retired(),
    }
}

fn external_node(name: &str) -> TreeNode {
    TreeNode {
        id: NodeId::External(name.to_string()),
        name: name.to_string(),
        image: None,
        retired: false,
    }
}

/// Collects nodes and edges, dropping repeats.
#[derive(Default)]
struct TreeBuilder {
    tree: Tree,
    nodes: HashSet<NodeId>,
    edges: HashSet<(NodeId, NodeId, EdgeKind)>,
}

impl TreeBuilder {
    fn node(&mut self, node: TreeNode) {
        if self.nodes.insert(node.id.clone()) {
            self.tree.nodes.push(node);
        }
    }

    fn edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind, via: Vec<PageId>) {
        if from == to {
            return;
        }
        if self.edges.insert((from.clone(), to.clone(), kind)) {
            self.tree.edges.push(TreeEdge { from, to, kind, via });
        }
    }
}

/// Creator to vtuber edges for designers and modelers. A creator whose name
/// matches a vtuber (case-insensitive) links from that vtuber; any other
/// name becomes one external node, however many vtubers credit it.
pub fn build_family_tree(records: &[VtuberRecord]) -> Tree {
    let records = sorted_by_id(records);
    let vtubers_by_name = records
        .iter()
        .map(|record| (name_key(&record.vtuber.name), record.id()))
        .collect::<HashMap<_, _>>();

    let mut builder = TreeBuilder::default();
    for record in &records {
        builder.node(vtuber_node(record));
    }

    let mut externals: HashMap<String, NodeId> = HashMap::new();
    for record in &records {
        let vtuber = &record.vtuber;
        let roles = [
            (&vtuber.character_designers, EdgeKind::Designer),
            (&vtuber.character_2d_modelers, EdgeKind::Modeler2d),
            (&vtuber.character_3d_modelers, EdgeKind::Modeler3d),
        ];
        for (names, kind) in roles {
            for name in names.iter().map(|name| name.trim()).filter(|name| !name.is_empty()) {
                let key = name_key(name);
                let from = match vtubers_by_name.get(&key) {
                    Some(id) => NodeId::Vtuber(*id),
                    None => externals
                        .entry(key)
                        .or_insert_with(|| {
                            builder.node(external_node(name));
                            NodeId::External(name.to_string())
                        })
                        .clone(),
                };
                builder.edge(from, NodeId::Vtuber(vtuber.id), kind, Vec::new());
            }
        }
    }
    builder.tree
}

/// Agency membership plus colleague links between vtubers sharing an
/// agency. Affiliations that match no agency become external nodes with
/// their own member edges.
pub fn build_agency_tree(records: &[VtuberRecord], agencies: &[AgencyRecord]) -> Tree {
    let records = sorted_by_id(records);
    let directory = AgencyDirectory::from_records(agencies);
    let mut builder = TreeBuilder::default();
    for record in &records {
        builder.node(vtuber_node(record));
    }

    let mut members: BTreeMap<PageId, Vec<PageId>> = BTreeMap::new();
    let mut externals: HashMap<String, NodeId> = HashMap::new();
    for record in &records {
        let vtuber = &record.vtuber;
        for agency in &vtuber.agencies {
            let known = directory.by_id(agency.id).unwrap_or(agency);
            builder.node(TreeNode {
                id: NodeId::Agency(known.id),
                name: known.name.clone(),
                image: known.image.clone(),
                retired: false,
            });
            builder.edge(
                NodeId::Agency(agency.id),
                NodeId::Vtuber(vtuber.id),
                EdgeKind::Member,
                Vec::new(),
            );
            let ids = members.entry(agency.id).or_default();
            if !ids.contains(&vtuber.id) {
                ids.push(vtuber.id);
            }
        }

        let resolved = vtuber
            .agencies
            .iter()
            .map(|agency| name_key(&agency.name))
            .collect::<HashSet<_>>();
        for text in vtuber.affiliations.iter().map(|text| text.trim()) {
            let key = name_key(text);
            if text.is_empty() || resolved.contains(&key) || directory.by_name(text).is_some() {
                continue;
            }
            let from = externals
                .entry(key)
                .or_insert_with(|| {
                    builder.node(external_node(text));
                    NodeId::External(text.to_string())
                })
                .clone();
            builder.edge(from, NodeId::Vtuber(vtuber.id), EdgeKind::Member, Vec::new());
        }
    }

    let mut shared: BTreeMap<(PageId, PageId), BTreeSet<PageId>> = BTreeMap::new();
    for (agency_id, ids) in &members {
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                let pair = ((*a).min(*b), (*a).max(*b));
                shared.entry(pair).or_default().insert(*agency_id);
            }
        }
    }
    for ((low, high), via) in shared {
        builder.edge(
            NodeId::Vtuber(low),
            NodeId::Vtuber(high),
            EdgeKind::Colleague,
            via.into_iter().collect(),
        );
    }
    builder.tree
}

pub async fn family_tree(profiles: &dyn ProfileRepository) -> Result<Tree, StorageError> {
    Ok(build_family_tree(&profiles.get_all().await?))
}

pub async fn agency_tree(
    profiles: &dyn ProfileRepository,
    agencies: &dyn AgencyRepository,
) -> Result<Tree, StorageError> {
    let records = profiles.get_all().await?;
    let agencies = agencies.get_all().await?;
    Ok(build_agency_tree(&records, &agencies))
}
