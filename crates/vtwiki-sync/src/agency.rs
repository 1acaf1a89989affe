//! Agency resolution: affiliation text and page categories to agency records.

use std::collections::{BTreeMap, HashSet};

use vtwiki_adapters::category_display_name;
use vtwiki_core::{Agency, AgencyRecord, PageId, PageRef};

/// Lookup table over known agencies, keyed by id and by lowercased name.
#[derive(Debug, Clone, Default)]
pub struct AgencyDirectory {
    by_id: BTreeMap<PageId, Agency>,
    by_name: BTreeMap<String, PageId>,
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl AgencyDirectory {
    pub fn new(agencies: impl IntoIterator<Item = Agency>) -> Self {
        let mut directory = Self::default();
        for agency in agencies {
            directory.by_name.insert(name_key(&agency.name), agency.id);
            directory.by_id.insert(agency.id, agency);
        }
        directory
    }

    pub fn from_records(records: &[AgencyRecord]) -> Self {
        Self::new(records.iter().map(|record| record.agency.clone()))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn by_id(&self, id: PageId) -> Option<&Agency> {
        self.by_id.get(&id)
    }

    /// Case-insensitive, surrounding whitespace ignored.
    pub fn by_name(&self, name: &str) -> Option<&Agency> {
        self.by_name
            .get(&name_key(name))
            .and_then(|id| self.by_id.get(id))
    }

    /// Agencies among a page's categories. A category matches by page id,
    /// or by its title without the `Category:` namespace.
    pub fn from_categories(&self, categories: &[PageRef]) -> Vec<Agency> {
        categories
            .iter()
            .filter_map(|category| {
                self.by_id(category.id)
                    .or_else(|| self.by_name(category_display_name(&category.title)))
            })
            .cloned()
            .collect()
    }
}

/// Union of the agencies named in `affiliations` and `category_agencies`,
/// deduplicated by id. Affiliation order comes first. Affiliation text that
/// names no known agency is dropped here; it stays on the profile's
/// `affiliations`.
pub fn resolve_agencies(
    affiliations: &[String],
    category_agencies: &[Agency],
    directory: &AgencyDirectory,
) -> Vec<Agency> {
    let mut seen = HashSet::new();
    affiliations
        .iter()
        .filter_map(|text| directory.by_name(text))
        .chain(category_agencies)
        .filter(|agency| seen.insert(agency.id))
        .cloned()
        .collect()
}
