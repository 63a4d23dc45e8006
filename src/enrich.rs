//! Resolve cluster members against a protein store and compute cluster
//! statistics.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use tracing::{debug, info, warn};

use crate::cluster::{Cluster, ClusterStats};
use crate::function::FunctionClassifier;
use crate::{Error, ErrorKind, Result};

/// Number of ids sent to the store in one query. SQLite limits the number
/// of bound parameters per statement.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// What the protein store knows about one member.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceStats {
    /// The id the member was looked up by.
    pub id: String,
    /// Protein length in amino acids.
    pub length: u32,
    /// The product annotation.
    pub function: String,
    /// Row id of the protein in the store, if it has one.
    pub rowid: Option<i64>,
}

/// Batch lookup of members by fingerprint or accession.
pub trait SequenceStatsStore {
    /// Returns the stats of every id in `ids` that the store knows. Unknown
    /// ids are simply absent from the result.
    fn lookup(&self, ids: &[&str]) -> Result<Vec<SequenceStats>>;
}

impl<T: SequenceStatsStore + ?Sized> SequenceStatsStore for &T {
    fn lookup(&self, ids: &[&str]) -> Result<Vec<SequenceStats>> {
        (**self).lookup(ids)
    }
}

/// Counters and lookups collected over one enrichment run.
#[derive(Debug, Default)]
pub struct EnrichSummary {
    /// Number of clusters enriched.
    pub clusters: usize,
    /// Number of store queries issued.
    pub queries: usize,
    /// Number of members resolved.
    pub resolved: usize,
    /// `(cluster id, member)` of every member the store did not know.
    pub missing_members: Vec<(String, String)>,
    /// Store row ids of the resolved members, reused when persisting links.
    pub member_keys: HashMap<String, i64>,
}

/// Fills in [`ClusterStats`] for clusters.
pub struct Enricher<C> {
    classifier: C,
    chunk_size: usize,
    audit: Option<Box<dyn Write>>,
}

impl<C: FunctionClassifier> Enricher<C> {
    pub fn new(classifier: C) -> Self {
        Enricher {
            classifier,
            chunk_size: DEFAULT_CHUNK_SIZE,
            audit: None,
        }
    }

    /// Sets the number of ids per store query.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::new(ErrorKind::Config(
                "chunk size must be at least 1".to_string(),
            )));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    /// Writes `cluster<TAB>member<TAB>length<TAB>function` for every
    /// resolved member to `writer`.
    pub fn with_audit<W: Write + 'static>(mut self, writer: W) -> Self {
        self.audit = Some(Box::new(writer));
        self
    }

    /// Enriches every cluster in place.
    ///
    /// A member missing from the store is skipped and recorded in the
    /// summary. A missing exemplar stops the run with
    /// [`ErrorKind::MissingExemplar`].
    pub fn enrich<S: SequenceStatsStore>(
        &mut self,
        clusters: &mut [Cluster],
        store: &S,
    ) -> Result<EnrichSummary> {
        info!("Adding functions to {} clusters", clusters.len());

        let mut summary = EnrichSummary::default();
        for cluster in clusters.iter_mut() {
            self.enrich_one(cluster, store, &mut summary)?;
            summary.clusters += 1;
        }

        if let Some(audit) = self.audit.as_mut() {
            audit.flush()?;
        }

        info!(
            "Resolved {} members with {} queries, {} missing",
            summary.resolved,
            summary.queries,
            summary.missing_members.len()
        );
        Ok(summary)
    }

    fn enrich_one<S: SequenceStatsStore>(
        &mut self,
        cluster: &mut Cluster,
        store: &S,
        summary: &mut EnrichSummary,
    ) -> Result<()> {
        debug!("Cluster {}", cluster.id());

        let ids: Vec<&str> = cluster.members().iter().map(String::as_str).collect();
        let mut resolved: HashMap<String, SequenceStats> = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(self.chunk_size) {
            summary.queries += 1;
            for stats in store.lookup(chunk)? {
                resolved.entry(stats.id.clone()).or_insert(stats);
            }
        }

        if !resolved.contains_key(cluster.exemplar()) {
            return Err(Error::new(ErrorKind::MissingExemplar {
                cluster: cluster.id().to_string(),
                exemplar: cluster.exemplar().to_string(),
            }));
        }

        let mut aggregate = Aggregate::default();
        for member in cluster.members() {
            let Some(stats) = resolved.get(member) else {
                warn!(
                    "Protein {} of cluster {} is not in the database",
                    member,
                    cluster.id()
                );
                summary
                    .missing_members
                    .push((cluster.id().to_string(), member.clone()));
                continue;
            };

            aggregate.add(stats);
            summary.resolved += 1;
            if let Some(rowid) = stats.rowid {
                summary.member_keys.insert(stats.id.clone(), rowid);
            }
            if let Some(audit) = self.audit.as_mut() {
                writeln!(
                    audit,
                    "{}\t{}\t{}\t{}",
                    cluster.id(),
                    stats.id,
                    stats.length,
                    stats.function
                )?;
            }
        }

        let stats = aggregate.finish(&self.classifier).ok_or_else(|| {
            Error::new(ErrorKind::EmptyAggregate {
                cluster: cluster.id().to_string(),
            })
        })?;
        cluster.set_stats(stats);
        Ok(())
    }
}

/// Running totals over the resolved members of one cluster.
#[derive(Debug, Default)]
struct Aggregate {
    longest: Option<(String, u32)>,
    shortest: Option<(String, u32)>,
    total: u64,
    count: usize,
    functions: BTreeMap<String, usize>,
}

impl Aggregate {
    fn add(&mut self, stats: &SequenceStats) {
        // only strictly longer or shorter members replace the first seen
        match self.longest {
            Some((_, len)) if stats.length <= len => {}
            _ => self.longest = Some((stats.id.clone(), stats.length)),
        }
        match self.shortest {
            Some((_, len)) if stats.length >= len => {}
            _ => self.shortest = Some((stats.id.clone(), stats.length)),
        }
        self.total += u64::from(stats.length);
        self.count += 1;
        *self.functions.entry(stats.function.clone()).or_insert(0) += 1;
    }

    fn finish(self, classifier: &dyn FunctionClassifier) -> Option<ClusterStats> {
        if self.count == 0 {
            return None;
        }
        let average_size = self.total as f64 / self.count as f64;
        ClusterStats::new(
            self.longest?,
            self.shortest?,
            average_size,
            self.functions,
            classifier,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::HypotheticalMatcher;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// An in-memory store that records every query.
    #[derive(Default)]
    struct MemoryStore {
        proteins: HashMap<String, (u32, String)>,
        queries: RefCell<Vec<Vec<String>>>,
    }

    impl MemoryStore {
        fn with(proteins: &[(&str, u32, &str)]) -> Self {
            MemoryStore {
                proteins: proteins
                    .iter()
                    .map(|(id, len, f)| (id.to_string(), (*len, f.to_string())))
                    .collect(),
                queries: RefCell::new(Vec::new()),
            }
        }
    }

    impl SequenceStatsStore for MemoryStore {
        fn lookup(&self, ids: &[&str]) -> Result<Vec<SequenceStats>> {
            self.queries
                .borrow_mut()
                .push(ids.iter().map(|s| s.to_string()).collect());
            Ok(ids
                .iter()
                .filter_map(|id| {
                    self.proteins.get(*id).map(|(length, function)| SequenceStats {
                        id: id.to_string(),
                        length: *length,
                        function: function.clone(),
                        rowid: None,
                    })
                })
                .collect())
        }
    }

    /// A writer that keeps its bytes readable after being boxed.
    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn enricher() -> Enricher<HypotheticalMatcher> {
        Enricher::new(HypotheticalMatcher::default())
    }

    #[test]
    fn test_aggregate_statistics() {
        let store = MemoryStore::with(&[
            ("p1", 10, "holin"),
            ("p2", 30, "holin"),
            ("p3", 20, "hypothetical protein"),
        ]);
        let mut clusters = vec![Cluster::new(None, "p1", ["p2", "p3"])];
        let summary = enricher().enrich(&mut clusters, &store).unwrap();

        let stats = clusters[0].stats().unwrap();
        assert_eq!(stats.longest_id(), "p2");
        assert_eq!(stats.longest_len(), 30);
        assert_eq!(stats.shortest_id(), "p1");
        assert_eq!(stats.shortest_len(), 10);
        assert_eq!(stats.average_size(), 20.0);
        assert_eq!(stats.function(), "holin");
        assert_eq!(stats.number_of_functions(), 2);
        assert!(!stats.only_hypothetical());
        assert_eq!(summary.resolved, 3);
        assert_eq!(summary.queries, 1);
    }

    #[test]
    fn test_first_seen_wins_on_equal_lengths() {
        let store = MemoryStore::with(&[
            ("e", 20, "capsid"),
            ("a", 50, "capsid"),
            ("b", 50, "capsid"),
            ("c", 5, "capsid"),
            ("d", 5, "capsid"),
        ]);
        let mut clusters = vec![Cluster::new(None, "e", ["a", "b", "c", "d"])];
        enricher().enrich(&mut clusters, &store).unwrap();

        let stats = clusters[0].stats().unwrap();
        assert_eq!(stats.longest_id(), "a");
        assert_eq!(stats.shortest_id(), "c");
    }

    #[test]
    fn test_only_hypothetical_cluster() {
        let store = MemoryStore::with(&[
            ("p1", 100, "hypothetical protein"),
            ("p2", 110, "hypothetical protein"),
        ]);
        let mut clusters = vec![Cluster::new(None, "p1", ["p2"])];
        enricher().enrich(&mut clusters, &store).unwrap();

        let stats = clusters[0].stats().unwrap();
        assert!(stats.only_hypothetical());
        assert_eq!(stats.functions().get("hypothetical protein"), Some(&2));
    }

    #[test]
    fn test_missing_member_is_skipped() {
        let store = MemoryStore::with(&[("p1", 10, "holin"), ("p3", 30, "holin")]);
        let mut clusters = vec![Cluster::new(Some("c1".to_string()), "p1", ["p2", "p3"])];
        let summary = enricher().enrich(&mut clusters, &store).unwrap();

        let stats = clusters[0].stats().unwrap();
        assert_eq!(stats.average_size(), 20.0);
        assert_eq!(stats.functions().get("holin"), Some(&2));
        assert_eq!(
            summary.missing_members,
            vec![("c1".to_string(), "p2".to_string())]
        );
        assert_eq!(clusters[0].number_of_members(), 3);
    }

    #[test]
    fn test_missing_exemplar_is_fatal() {
        let store = MemoryStore::with(&[("p2", 10, "holin")]);
        let mut clusters = vec![
            Cluster::new(Some("ok".to_string()), "p2", Vec::<String>::new()),
            Cluster::new(Some("bad".to_string()), "p1", ["p2"]),
        ];
        let err = enricher().enrich(&mut clusters, &store).unwrap_err();
        match err.kind() {
            ErrorKind::MissingExemplar { cluster, exemplar } => {
                assert_eq!(cluster, "bad");
                assert_eq!(exemplar, "p1");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!clusters[1].is_enriched());
    }

    #[test]
    fn test_batches_cover_every_member_once() {
        let names: Vec<String> = (0..1234).map(|i| format!("p{i}")).collect();
        let proteins: Vec<(&str, u32, &str)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i as u32 + 1, "capsid"))
            .collect();
        let store = MemoryStore::with(&proteins);
        let mut clusters = vec![Cluster::new(None, "p0", names.iter().skip(1).cloned())];

        let summary = enricher()
            .with_chunk_size(500)
            .unwrap()
            .enrich(&mut clusters, &store)
            .unwrap();
        assert_eq!(summary.queries, 3);

        let queries = store.queries.borrow();
        assert_eq!(
            queries.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![500, 500, 234]
        );
        let mut seen: Vec<&String> = queries.iter().flatten().collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 1234);

        let stats = clusters[0].stats().unwrap();
        assert_eq!(stats.longest_len(), 1234);
        assert_eq!(stats.shortest_len(), 1);
        assert_eq!(stats.average_size(), 617.5);
    }

    #[test]
    fn test_zero_chunk_size() {
        assert!(enricher().with_chunk_size(0).is_err());
    }

    #[test]
    fn test_audit_output() {
        let store = MemoryStore::with(&[("p1", 10, "holin"), ("p2", 12, "lysin")]);
        let buffer = SharedBuffer::default();
        let mut clusters = vec![Cluster::new(Some("c1".to_string()), "p1", ["p2"])];
        enricher()
            .with_audit(buffer.clone())
            .enrich(&mut clusters, &store)
            .unwrap();

        let text = String::from_utf8(buffer.0.borrow().clone()).unwrap();
        assert_eq!(text, "c1\tp1\t10\tholin\nc1\tp2\t12\tlysin\n");
    }
}
