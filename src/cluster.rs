//! The cluster entity and the statistics attached to it by enrichment.

use std::collections::BTreeMap;

use indexmap::IndexSet;
use uuid::Uuid;

use crate::function::FunctionClassifier;

/// A cluster of proteins with one representative.
///
/// The exemplar is always a member, so callers never need to look at
/// both. Members keep their insertion order with the exemplar first.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// The unique cluster ID.
    id: String,
    /// The representative member.
    exemplar: String,
    /// All members, exemplar included.
    members: IndexSet<String>,
    /// Number of members when the cluster was built.
    number_of_members: usize,
    /// Set once by the enricher.
    stats: Option<ClusterStats>,
}

impl Cluster {
    /// Builds a cluster. A random ID is generated when `id` is `None`.
    pub fn new<I, S>(id: Option<String>, exemplar: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = IndexSet::new();
        set.insert(exemplar.to_string());
        set.extend(members.into_iter().map(Into::into));

        Cluster {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            exemplar: exemplar.to_string(),
            number_of_members: set.len(),
            members: set,
            stats: None,
        }
    }

    /// Returns the cluster ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the exemplar.
    pub fn exemplar(&self) -> &str {
        &self.exemplar
    }

    /// Returns the members, exemplar first.
    pub fn members(&self) -> &IndexSet<String> {
        &self.members
    }

    /// Returns the number of members.
    pub fn number_of_members(&self) -> usize {
        self.number_of_members
    }

    /// Returns the statistics, if the cluster has been enriched.
    pub fn stats(&self) -> Option<&ClusterStats> {
        self.stats.as_ref()
    }

    pub fn is_enriched(&self) -> bool {
        self.stats.is_some()
    }

    /// The members joined with commas, as stored in the cluster table.
    pub fn members_field(&self) -> String {
        self.members
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub(crate) fn set_stats(&mut self, stats: ClusterStats) {
        self.stats = Some(stats);
    }
}

/// Statistics over the resolved members of a cluster.
///
/// The histogram and everything derived from it are computed together and
/// never change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterStats {
    longest_id: String,
    longest_len: u32,
    shortest_id: String,
    shortest_len: u32,
    average_size: f64,
    functions: BTreeMap<String, usize>,
    function: String,
    only_hypothetical: bool,
}

impl ClusterStats {
    /// Builds the statistics from length extremes, the mean and a
    /// non-empty function histogram.
    pub(crate) fn new(
        longest: (String, u32),
        shortest: (String, u32),
        average_size: f64,
        functions: BTreeMap<String, usize>,
        classifier: &dyn FunctionClassifier,
    ) -> Option<Self> {
        let function = majority_function(&functions)?.to_string();
        let only_hypothetical = only_hypothetical(&functions, classifier);

        Some(ClusterStats {
            longest_id: longest.0,
            longest_len: longest.1,
            shortest_id: shortest.0,
            shortest_len: shortest.1,
            average_size,
            functions,
            function,
            only_hypothetical,
        })
    }

    /// Returns the id of the longest resolved member.
    pub fn longest_id(&self) -> &str {
        &self.longest_id
    }

    /// Returns the length of the longest resolved member.
    pub fn longest_len(&self) -> u32 {
        self.longest_len
    }

    /// Returns the id of the shortest resolved member.
    pub fn shortest_id(&self) -> &str {
        &self.shortest_id
    }

    /// Returns the length of the shortest resolved member.
    pub fn shortest_len(&self) -> u32 {
        self.shortest_len
    }

    /// Returns the mean length of the resolved members.
    pub fn average_size(&self) -> f64 {
        self.average_size
    }

    /// Returns the function histogram.
    pub fn functions(&self) -> &BTreeMap<String, usize> {
        &self.functions
    }

    /// Returns the most frequent function.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Returns the number of distinct functions in the histogram.
    pub fn number_of_functions(&self) -> usize {
        self.functions.len()
    }

    /// True if every function in the histogram is hypothetical.
    pub fn only_hypothetical(&self) -> bool {
        self.only_hypothetical
    }

    /// The histogram as a JSON object, as stored in the cluster table.
    pub fn functions_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.functions)
    }
}

/// The function with the highest count. Ties go to the lexicographically
/// smallest function.
pub fn majority_function(functions: &BTreeMap<String, usize>) -> Option<&str> {
    let mut best: Option<(&str, usize)> = None;
    for (function, &count) in functions {
        match best {
            Some((_, c)) if count <= c => {}
            _ => best = Some((function, count)),
        }
    }
    best.map(|(f, _)| f)
}

/// True if the histogram is non-empty and every key is hypothetical.
pub fn only_hypothetical(
    functions: &BTreeMap<String, usize>,
    classifier: &dyn FunctionClassifier,
) -> bool {
    !functions.is_empty() && functions.keys().all(|f| classifier.is_hypothetical(f))
}
