//! Write enriched clusters and their membership links to the cluster
//! database.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::cluster::Cluster;
use crate::db::{self, ClusterDb};
use crate::{Error, ErrorKind, Result};

/// Describes how a set of clusters was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDefinition {
    /// Short name of the clustering approach.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// The command line used for the clustering.
    pub command: String,
}

/// Resolves cluster members to the keys of the protein database.
pub trait MemberLookup {
    /// The surrogate row id of the member's protein.
    fn surrogate_key(&self, member: &str) -> Result<Option<i64>>;

    /// The sequence fingerprint of the member. Members that already are
    /// fingerprints map to themselves.
    fn fingerprint(&self, member: &str) -> Result<Option<String>> {
        Ok(Some(member.to_string()))
    }
}

impl MemberLookup for HashMap<String, i64> {
    fn surrogate_key(&self, member: &str) -> Result<Option<i64>> {
        Ok(self.get(member).copied())
    }
}

/// Counters for one persistence run.
#[derive(Debug, Default)]
pub struct PersistSummary {
    /// Cluster rows written.
    pub clusters: usize,
    /// `proteincluster` rows written.
    pub protein_links: usize,
    /// `md5cluster` rows written.
    pub fingerprint_links: usize,
    /// `(cluster id, member)` of every link that could not be written.
    pub missing_links: Vec<(String, String)>,
}

/// Writes clusters into a [`ClusterDb`].
pub struct Persister<'a> {
    db: &'a mut ClusterDb,
}

impl<'a> Persister<'a> {
    pub fn new(db: &'a mut ClusterDb) -> Self {
        Persister { db }
    }

    /// Inserts the cluster definition and returns its row id. The insert
    /// is committed on its own since every cluster row references it.
    pub fn insert_definition(&mut self, definition: &ClusterDefinition) -> Result<i64> {
        info!("Adding the cluster definition {}", definition.name);
        let tx = self.db.connection_mut().transaction()?;
        let rowid = db::insert_definition(
            &tx,
            &definition.name,
            &definition.description,
            &definition.command,
        )?;
        tx.commit()?;
        Ok(rowid)
    }

    /// Persists every cluster with its links, one transaction per cluster.
    ///
    /// `known_keys` holds surrogate keys already resolved during
    /// enrichment; other members go through `lookup`. Members that cannot
    /// be resolved lose their link and are recorded in the summary.
    pub fn persist<L: MemberLookup>(
        &mut self,
        clusters: &[Cluster],
        lookup: &L,
        known_keys: &HashMap<String, i64>,
        definition: i64,
    ) -> Result<PersistSummary> {
        if let Some(cluster) = clusters.iter().find(|c| !c.is_enriched()) {
            return Err(Error::new(ErrorKind::Unenriched {
                cluster: cluster.id().to_string(),
            }));
        }

        info!("Inserting {} clusters into the database", clusters.len());
        let mut summary = PersistSummary::default();
        for cluster in clusters {
            self.persist_one(cluster, lookup, known_keys, definition, &mut summary)?;
            summary.clusters += 1;
        }

        info!(
            "Wrote {} clusters, {} protein links, {} fingerprint links, {} links missing",
            summary.clusters,
            summary.protein_links,
            summary.fingerprint_links,
            summary.missing_links.len()
        );
        Ok(summary)
    }

    fn persist_one<L: MemberLookup>(
        &mut self,
        cluster: &Cluster,
        lookup: &L,
        known_keys: &HashMap<String, i64>,
        definition: i64,
        summary: &mut PersistSummary,
    ) -> Result<()> {
        let Some(stats) = cluster.stats() else {
            return Err(Error::new(ErrorKind::Unenriched {
                cluster: cluster.id().to_string(),
            }));
        };

        let tx = self.db.connection_mut().transaction()?;
        let cluster_rowid = db::insert_cluster_row(
            &tx,
            cluster.id(),
            definition,
            &cluster.members_field(),
            cluster.exemplar(),
            (stats.longest_id(), stats.longest_len()),
            (stats.shortest_id(), stats.shortest_len()),
            stats.average_size(),
            cluster.number_of_members(),
            &stats.functions_json()?,
            stats.function(),
            stats.number_of_functions(),
            stats.only_hypothetical(),
        )?;
        debug!("Cluster {} is row {}", cluster.id(), cluster_rowid);

        for member in cluster.members() {
            let key = match known_keys.get(member) {
                Some(&key) => Some(key),
                None => lookup.surrogate_key(member)?,
            };
            let fingerprint = lookup.fingerprint(member)?;

            match key {
                Some(key) => {
                    db::insert_protein_link(&tx, key, cluster_rowid)?;
                    summary.protein_links += 1;
                }
                None => warn!(
                    "Found a protein {} that does not appear in the protein table",
                    member
                ),
            }
            match fingerprint {
                Some(fingerprint) => {
                    db::insert_fingerprint_link(&tx, &fingerprint, cluster_rowid)?;
                    summary.fingerprint_links += 1;
                }
                None => warn!("No sequence fingerprint for protein {}", member),
            }
            if key.is_none() {
                summary
                    .missing_links
                    .push((cluster.id().to_string(), member.clone()));
            }
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ClusterTable;
    use crate::enrich::{Enricher, SequenceStats, SequenceStatsStore};
    use crate::function::HypotheticalMatcher;
    use pretty_assertions::assert_eq;
    use rusqlite::Connection;

    struct Lengths(Vec<(&'static str, u32, &'static str)>);

    impl SequenceStatsStore for Lengths {
        fn lookup(&self, ids: &[&str]) -> Result<Vec<SequenceStats>> {
            Ok(self
                .0
                .iter()
                .enumerate()
                .filter(|(_, (id, _, _))| ids.contains(id))
                .map(|(i, (id, length, function))| SequenceStats {
                    id: id.to_string(),
                    length: *length,
                    function: function.to_string(),
                    rowid: Some(i as i64 + 1),
                })
                .collect())
        }
    }

    fn cluster_db() -> ClusterDb {
        ClusterDb::from_connection(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn definition() -> ClusterDefinition {
        ClusterDefinition {
            name: "mmseqs".to_string(),
            description: "mmseqs easy-cluster at 50% identity".to_string(),
            command: "mmseqs easy-cluster proteins.faa clusters tmp".to_string(),
        }
    }

    fn enriched(clusters: &mut [Cluster]) -> HashMap<String, i64> {
        let store = Lengths(vec![
            ("p1", 10, "Holin"),
            ("p2", 30, "Holin"),
            ("p3", 20, "Hypothetical protein"),
            ("p4", 40, "Hypothetical protein"),
        ]);
        Enricher::new(HypotheticalMatcher::default())
            .enrich(clusters, &store)
            .unwrap()
            .member_keys
    }

    #[test]
    fn test_round_trip() {
        let mut clusters = vec![
            Cluster::new(Some("c1".to_string()), "p1", ["p2", "p3"]),
            Cluster::new(Some("c2".to_string()), "p4", Vec::<String>::new()),
        ];
        let keys = enriched(&mut clusters);

        let mut db = cluster_db();
        let mut persister = Persister::new(&mut db);
        let definition = persister.insert_definition(&definition()).unwrap();
        let summary = persister
            .persist(&clusters, &keys, &keys, definition)
            .unwrap();
        assert_eq!(summary.clusters, 2);
        assert_eq!(summary.protein_links, 4);
        assert_eq!(summary.fingerprint_links, 4);
        assert!(summary.missing_links.is_empty());

        let stored = db.load_cluster("c1").unwrap().unwrap();
        let stats = clusters[0].stats().unwrap();
        assert_eq!(stored.definition, definition);
        assert_eq!(stored.number_of_members, clusters[0].number_of_members());
        assert_eq!(stored.function, stats.function());
        assert_eq!(stored.average_size, stats.average_size());
        assert_eq!(&stored.functions, stats.functions());
        assert_eq!(stored.members, vec!["p1", "p2", "p3"]);
        assert_eq!(stored.longest_id, "p2");
        assert_eq!(stored.shortest_len, 10);
        assert!(!stored.only_hypothetical);

        let stored = db.load_cluster("c2").unwrap().unwrap();
        assert!(stored.only_hypothetical);

        assert_eq!(db.count(ClusterTable::Definition).unwrap(), 1);
        assert_eq!(db.count(ClusterTable::ProteinLink).unwrap(), 4);
        assert_eq!(db.count(ClusterTable::FingerprintLink).unwrap(), 4);
    }

    #[test]
    fn test_unenriched_clusters_are_not_written() {
        let mut db = cluster_db();
        let mut persister = Persister::new(&mut db);
        let definition = persister.insert_definition(&definition()).unwrap();

        let clusters = vec![Cluster::new(Some("c1".to_string()), "p1", ["p2"])];
        let err = persister
            .persist(&clusters, &HashMap::new(), &HashMap::new(), definition)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Unenriched { .. }));

        assert_eq!(db.count(ClusterTable::Cluster).unwrap(), 0);
        assert_eq!(db.count(ClusterTable::ProteinLink).unwrap(), 0);
        assert_eq!(db.count(ClusterTable::FingerprintLink).unwrap(), 0);
    }

    #[test]
    fn test_failed_cluster_keeps_earlier_commits() {
        // the second insert breaks the unique uuid index
        let mut clusters = vec![
            Cluster::new(Some("c1".to_string()), "p1", ["p2"]),
            Cluster::new(Some("c1".to_string()), "p4", ["p3"]),
        ];
        let keys = enriched(&mut clusters);

        let mut db = cluster_db();
        let mut persister = Persister::new(&mut db);
        let definition = persister.insert_definition(&definition()).unwrap();
        let err = persister
            .persist(&clusters, &keys, &keys, definition)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Sqlite(_)));

        assert_eq!(db.count(ClusterTable::Definition).unwrap(), 1);
        assert_eq!(db.count(ClusterTable::Cluster).unwrap(), 1);
        assert_eq!(db.count(ClusterTable::ProteinLink).unwrap(), 2);
        assert_eq!(db.count(ClusterTable::FingerprintLink).unwrap(), 2);
        let stored = db.load_cluster("c1").unwrap().unwrap();
        assert_eq!(stored.exemplar, "p1");
        assert_eq!(stored.members, vec!["p1", "p2"]);
    }

    #[test]
    fn test_missing_link_is_skipped() {
        let mut clusters = vec![Cluster::new(Some("c1".to_string()), "p1", ["p2", "p3"])];
        enriched(&mut clusters);

        // only p1 and p3 resolve at persist time
        let lookup: HashMap<String, i64> =
            HashMap::from([("p1".to_string(), 1), ("p3".to_string(), 3)]);

        let mut db = cluster_db();
        let mut persister = Persister::new(&mut db);
        let definition = persister.insert_definition(&definition()).unwrap();
        let summary = persister
            .persist(&clusters, &lookup, &HashMap::new(), definition)
            .unwrap();

        assert_eq!(summary.protein_links, 2);
        assert_eq!(summary.fingerprint_links, 3);
        assert_eq!(
            summary.missing_links,
            vec![("c1".to_string(), "p2".to_string())]
        );
        assert_eq!(db.count(ClusterTable::Cluster).unwrap(), 1);
    }
}
