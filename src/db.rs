//! SQLite handles for the protein database and the cluster database.
//!
//! Proteins are keyed by the MD5 fingerprint of their sequence in
//! `protein_sequence`; `protein` has one row per annotated protein and a
//! surrogate `protein_rowid`. Genomes loaded from GenBank also fill
//! `genome`, `gene` and `trna`. The cluster database references proteins by
//! both keys through `proteincluster` and `md5cluster`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::debug;

use crate::enrich::{SequenceStats, SequenceStatsStore};
use crate::persist::MemberLookup;
use crate::{Error, ErrorKind, Result};

const PROTEIN_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS genome (
        genome_rowid INTEGER PRIMARY KEY,
        identifier TEXT,
        source_file TEXT,
        accession TEXT,
        name TEXT,
        description TEXT,
        source TEXT,
        organism TEXT,
        taxonomy TEXT,
        collection_date TEXT,
        country TEXT,
        db_xref TEXT,
        host TEXT,
        isolation_source TEXT,
        strain TEXT,
        lab_host TEXT,
        sequence TEXT,
        sequence_md5 TEXT,
        length INTEGER
    );
    CREATE INDEX IF NOT EXISTS genome_idx2 ON genome(genome_rowid, identifier);
    CREATE INDEX IF NOT EXISTS genome_idx4 ON genome(accession, identifier);
    CREATE TABLE IF NOT EXISTS gene (
        gene_rowid INTEGER PRIMARY KEY,
        accession TEXT,
        contig TEXT,
        start INTEGER,
        end INTEGER,
        strand INTEGER,
        length INTEGER,
        dna_sequence TEXT,
        dna_sequence_md5 TEXT,
        protein INTEGER,
        db_xref TEXT
    );
    CREATE INDEX IF NOT EXISTS gene_idx2 ON gene(accession, gene_rowid);
    CREATE INDEX IF NOT EXISTS gene_idx3 ON gene(protein, gene_rowid);
    CREATE INDEX IF NOT EXISTS gene_idx4 ON gene(dna_sequence_md5, gene_rowid);
    CREATE TABLE IF NOT EXISTS protein_sequence (
        protein_sequence_rowid INTEGER PRIMARY KEY,
        protein_md5sum TEXT NOT NULL,
        protein_sequence TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS ps_idx0 ON protein_sequence(protein_md5sum);
    CREATE TABLE IF NOT EXISTS protein (
        protein_rowid INTEGER PRIMARY KEY,
        protein_id TEXT,
        contig TEXT,
        gene INTEGER,
        product TEXT,
        db_xref TEXT,
        protein_md5sum TEXT NOT NULL,
        length INTEGER NOT NULL,
        EC_number TEXT,
        genename TEXT,
        locus_tag TEXT,
        note TEXT,
        ribosomal_slippage TEXT,
        transl_table TEXT,
        FOREIGN KEY (protein_md5sum) REFERENCES protein_sequence(protein_md5sum)
    );
    CREATE INDEX IF NOT EXISTS protein_idx2 ON protein(protein_id, protein_rowid);
    CREATE INDEX IF NOT EXISTS protein_idx3 ON protein(gene, protein_rowid);
    CREATE INDEX IF NOT EXISTS protein_idx4 ON protein(protein_md5sum, protein_rowid);
    CREATE TABLE IF NOT EXISTS trna (
        trna_rowid INTEGER PRIMARY KEY,
        accession TEXT,
        contig TEXT,
        start INTEGER,
        end INTEGER,
        strand INTEGER,
        dna_sequence TEXT,
        dna_sequence_md5 TEXT,
        codon_recognized TEXT,
        db_xref TEXT,
        gene TEXT,
        note TEXT,
        product TEXT,
        is_tmRNA INTEGER
    );
    CREATE INDEX IF NOT EXISTS trna_idx2 ON trna(dna_sequence_md5, dna_sequence);
";

const CLUSTER_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS clusterdefinition (
        clusterdefinition_rowid INTEGER PRIMARY KEY,
        name TEXT,
        description TEXT,
        command TEXT
    );
    CREATE TABLE IF NOT EXISTS cluster (
        cluster_rowid INTEGER PRIMARY KEY,
        uuid TEXT NOT NULL,
        clusterdefinition INTEGER NOT NULL,
        members TEXT,
        exemplar TEXT,
        longest_id TEXT,
        longest_len INTEGER,
        shortest_id TEXT,
        shortest_len INTEGER,
        average_size REAL,
        number_of_members INTEGER,
        functions TEXT,
        function TEXT,
        number_of_functions INTEGER,
        only_hypothetical INTEGER,
        FOREIGN KEY (clusterdefinition) REFERENCES clusterdefinition(clusterdefinition_rowid)
    );
    CREATE UNIQUE INDEX IF NOT EXISTS cluster_idx2 ON cluster(uuid);
    CREATE INDEX IF NOT EXISTS cluster_idx3 ON cluster(function, cluster_rowid);
    CREATE TABLE IF NOT EXISTS proteincluster (
        proteincluster_rowid INTEGER PRIMARY KEY,
        protein INTEGER NOT NULL,
        cluster INTEGER NOT NULL,
        FOREIGN KEY (cluster) REFERENCES cluster(cluster_rowid)
    );
    CREATE INDEX IF NOT EXISTS proteincluster_idx4 ON proteincluster(protein, cluster);
    CREATE INDEX IF NOT EXISTS proteincluster_idx5 ON proteincluster(cluster, protein);
    CREATE TABLE IF NOT EXISTS md5cluster (
        md5cluster_rowid INTEGER PRIMARY KEY,
        protein_md5sum TEXT NOT NULL,
        cluster INTEGER NOT NULL,
        FOREIGN KEY (cluster) REFERENCES cluster(cluster_rowid)
    );
    CREATE INDEX IF NOT EXISTS md5cluster_idx4 ON md5cluster(protein_md5sum, cluster);
    CREATE INDEX IF NOT EXISTS md5cluster_idx5 ON md5cluster(cluster, protein_md5sum);
";

/// Opens an existing database. A missing file is an error rather than a
/// new empty database.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::new(ErrorKind::Store(format!(
            "{} does not exist. Cannot connect",
            path.display()
        ))));
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    debug!("Connected to {}", path.display());
    Ok(conn)
}

/// Opens or creates a database file.
pub fn create<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

pub fn create_protein_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(PROTEIN_TABLES)?;
    Ok(())
}

pub fn create_cluster_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(CLUSTER_TABLES)?;
    Ok(())
}

/// Which `protein` column member ids refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyColumn {
    /// The MD5 fingerprint of the sequence.
    #[default]
    Fingerprint,
    /// The GenBank protein accession.
    Accession,
}

impl KeyColumn {
    fn column(self) -> &'static str {
        match self {
            KeyColumn::Fingerprint => "protein_md5sum",
            KeyColumn::Accession => "protein_id",
        }
    }
}

/// The protein database.
pub struct ProteinDb {
    conn: Connection,
    key: KeyColumn,
}

impl ProteinDb {
    /// Opens an existing protein database.
    pub fn open<P: AsRef<Path>>(path: P, key: KeyColumn) -> Result<Self> {
        Ok(ProteinDb {
            conn: open(path)?,
            key,
        })
    }

    /// Creates the protein tables in `conn` if needed.
    pub fn from_connection(conn: Connection, key: KeyColumn) -> Result<Self> {
        create_protein_tables(&conn)?;
        Ok(ProteinDb { conn, key })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl SequenceStatsStore for ProteinDb {
    fn lookup(&self, ids: &[&str]) -> Result<Vec<SequenceStats>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let column = self.key.column();
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT {column}, length, product, protein_rowid FROM protein \
             WHERE {column} IN ({placeholders}) ORDER BY protein_rowid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            Ok(SequenceStats {
                id: row.get(0)?,
                length: row.get(1)?,
                function: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                rowid: Some(row.get(3)?),
            })
        })?;

        // several proteins can share a sequence; the lowest rowid wins
        let mut seen = HashSet::new();
        let mut found = Vec::with_capacity(ids.len());
        for stats in rows {
            let stats = stats?;
            if seen.insert(stats.id.clone()) {
                found.push(stats);
            }
        }
        Ok(found)
    }
}

impl MemberLookup for ProteinDb {
    fn surrogate_key(&self, member: &str) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT protein_rowid FROM protein WHERE {} = ?1 ORDER BY protein_rowid LIMIT 1",
            self.key.column()
        );
        Ok(self
            .conn
            .query_row(&sql, [member], |row| row.get(0))
            .optional()?)
    }

    fn fingerprint(&self, member: &str) -> Result<Option<String>> {
        if self.key == KeyColumn::Fingerprint {
            return Ok(Some(member.to_string()));
        }
        Ok(self
            .conn
            .query_row(
                "SELECT protein_md5sum FROM protein WHERE protein_id = ?1 \
                 ORDER BY protein_rowid LIMIT 1",
                [member],
                |row| row.get(0),
            )
            .optional()?)
    }
}

/// A cluster row read back from the cluster database.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCluster {
    pub rowid: i64,
    pub id: String,
    pub definition: i64,
    pub members: Vec<String>,
    pub exemplar: String,
    pub longest_id: String,
    pub longest_len: u32,
    pub shortest_id: String,
    pub shortest_len: u32,
    pub average_size: f64,
    pub number_of_members: usize,
    pub functions: BTreeMap<String, usize>,
    pub function: String,
    pub number_of_functions: usize,
    pub only_hypothetical: bool,
}

/// The cluster database.
pub struct ClusterDb {
    conn: Connection,
}

impl ClusterDb {
    /// Opens an existing cluster database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(ClusterDb { conn: open(path)? })
    }

    /// Creates the cluster tables in `conn` if needed.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        create_cluster_tables(&conn)?;
        Ok(ClusterDb { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Reads one cluster by its uuid.
    pub fn load_cluster(&self, id: &str) -> Result<Option<StoredCluster>> {
        let row = self
            .conn
            .query_row(
                "SELECT cluster_rowid, uuid, clusterdefinition, members, exemplar, longest_id, \
                 longest_len, shortest_id, shortest_len, average_size, number_of_members, \
                 functions, function, number_of_functions, only_hypothetical \
                 FROM cluster WHERE uuid = ?1",
                [id],
                |row| {
                    Ok((
                        StoredCluster {
                            rowid: row.get(0)?,
                            id: row.get(1)?,
                            definition: row.get(2)?,
                            members: Vec::new(),
                            exemplar: row.get(4)?,
                            longest_id: row.get(5)?,
                            longest_len: row.get(6)?,
                            shortest_id: row.get(7)?,
                            shortest_len: row.get(8)?,
                            average_size: row.get(9)?,
                            number_of_members: row.get::<_, i64>(10)? as usize,
                            functions: BTreeMap::new(),
                            function: row.get(12)?,
                            number_of_functions: row.get::<_, i64>(13)? as usize,
                            only_hypothetical: row.get(14)?,
                        },
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(11)?,
                    ))
                },
            )
            .optional()?;

        let Some((mut cluster, members, functions)) = row else {
            return Ok(None);
        };
        cluster.members = members
            .split(',')
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
        cluster.functions = serde_json::from_str(&functions)?;
        Ok(Some(cluster))
    }

    /// All protein fingerprints that are linked to a cluster.
    pub fn clustered_fingerprints(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT protein_md5sum FROM md5cluster")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut fingerprints = HashSet::new();
        for fingerprint in rows {
            fingerprints.insert(fingerprint?);
        }
        Ok(fingerprints)
    }

    /// The majority function and function histogram of the cluster that
    /// holds `fingerprint`.
    pub fn functions_of(
        &self,
        fingerprint: &str,
    ) -> Result<Option<(String, BTreeMap<String, usize>)>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT cluster.function, cluster.functions FROM cluster \
                 JOIN md5cluster ON md5cluster.cluster = cluster.cluster_rowid \
                 WHERE md5cluster.protein_md5sum = ?1 ORDER BY cluster.cluster_rowid LIMIT 1",
                [fingerprint],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((function, functions)) => Ok(Some((function, serde_json::from_str(&functions)?))),
            None => Ok(None),
        }
    }

    /// Row count of a cluster database table.
    pub fn count(&self, table: ClusterTable) -> Result<usize> {
        let sql = format!("SELECT count(1) FROM {}", table.name());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Tables of the cluster database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterTable {
    Definition,
    Cluster,
    ProteinLink,
    FingerprintLink,
}

impl ClusterTable {
    fn name(self) -> &'static str {
        match self {
            ClusterTable::Definition => "clusterdefinition",
            ClusterTable::Cluster => "cluster",
            ClusterTable::ProteinLink => "proteincluster",
            ClusterTable::FingerprintLink => "md5cluster",
        }
    }
}

/// Per-run memo of [`ClusterDb::functions_of`].
pub struct FunctionCache<'a> {
    db: &'a ClusterDb,
    seen: HashMap<String, Option<(String, BTreeMap<String, usize>)>>,
}

impl<'a> FunctionCache<'a> {
    pub fn new(db: &'a ClusterDb) -> Self {
        FunctionCache {
            db,
            seen: HashMap::new(),
        }
    }

    /// The majority function of the protein's cluster, if it is clustered.
    pub fn function(&mut self, fingerprint: &str) -> Result<Option<&str>> {
        Ok(self.entry(fingerprint)?.map(|(f, _)| f.as_str()))
    }

    /// The function histogram of the protein's cluster.
    pub fn all_functions(
        &mut self,
        fingerprint: &str,
    ) -> Result<Option<&BTreeMap<String, usize>>> {
        Ok(self.entry(fingerprint)?.map(|(_, fns)| fns))
    }

    fn entry(&mut self, fingerprint: &str) -> Result<Option<&(String, BTreeMap<String, usize>)>> {
        if !self.seen.contains_key(fingerprint) {
            let found = self.db.functions_of(fingerprint)?;
            self.seen.insert(fingerprint.to_string(), found);
        }
        Ok(self.seen.get(fingerprint).and_then(Option::as_ref))
    }
}

pub(crate) fn insert_definition(
    conn: &Connection,
    name: &str,
    description: &str,
    command: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO clusterdefinition (name, description, command) VALUES (?1, ?2, ?3)",
        params![name, description, command],
    )?;
    Ok(conn.last_insert_rowid())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn insert_cluster_row(
    conn: &Connection,
    id: &str,
    definition: i64,
    members: &str,
    exemplar: &str,
    longest: (&str, u32),
    shortest: (&str, u32),
    average_size: f64,
    number_of_members: usize,
    functions: &str,
    function: &str,
    number_of_functions: usize,
    only_hypothetical: bool,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO cluster (uuid, clusterdefinition, members, exemplar, longest_id, \
         longest_len, shortest_id, shortest_len, average_size, number_of_members, functions, \
         function, number_of_functions, only_hypothetical) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            id,
            definition,
            members,
            exemplar,
            longest.0,
            longest.1,
            shortest.0,
            shortest.1,
            average_size,
            number_of_members as i64,
            functions,
            function,
            number_of_functions as i64,
            only_hypothetical,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn insert_protein_link(conn: &Connection, protein: i64, cluster: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO proteincluster (protein, cluster) VALUES (?1, ?2)",
        params![protein, cluster],
    )?;
    Ok(())
}

pub(crate) fn insert_fingerprint_link(
    conn: &Connection,
    fingerprint: &str,
    cluster: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO md5cluster (protein_md5sum, cluster) VALUES (?1, ?2)",
        params![fingerprint, cluster],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protein_db(key: KeyColumn) -> ProteinDb {
        let db = ProteinDb::from_connection(Connection::open_in_memory().unwrap(), key).unwrap();
        db.connection()
            .execute_batch(
                "INSERT INTO protein_sequence (protein_md5sum, protein_sequence)
                    VALUES ('m1', 'MKV'), ('m2', 'MKVLA');
                 INSERT INTO protein (protein_id, product, protein_md5sum, length) VALUES
                    ('AAA1.1', 'Holin', 'm1', 3),
                    ('AAA2.1', 'Lysin', 'm2', 5),
                    ('BBB1.1', 'Hypothetical protein', 'm1', 3);",
            )
            .unwrap();
        db
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = open(dir.path().join("nothing.sql")).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Store(_)));
    }

    #[test]
    fn test_lookup_by_fingerprint() {
        let db = protein_db(KeyColumn::Fingerprint);
        let mut found = db.lookup(&["m2", "m1", "m9"]).unwrap();
        found.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "m1");
        assert_eq!(found[0].function, "Holin");
        assert_eq!(found[0].rowid, Some(1));
        assert_eq!(found[1].length, 5);
        assert!(db.lookup(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_lookup_by_accession() {
        let db = protein_db(KeyColumn::Accession);
        let found = db.lookup(&["BBB1.1"]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].function, "Hypothetical protein");
        assert_eq!(found[0].rowid, Some(3));
        assert_eq!(db.surrogate_key("AAA2.1").unwrap(), Some(2));
        assert_eq!(db.surrogate_key("ZZZ").unwrap(), None);
        assert_eq!(db.fingerprint("AAA2.1").unwrap(), Some("m2".to_string()));
        assert_eq!(db.fingerprint("ZZZ").unwrap(), None);
    }

    #[test]
    fn test_missing_cluster() {
        let db = ClusterDb::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        assert!(db.load_cluster("nope").unwrap().is_none());
        assert_eq!(db.count(ClusterTable::Cluster).unwrap(), 0);
        assert!(db.clustered_fingerprints().unwrap().is_empty());
    }

    #[test]
    fn test_function_cache() {
        let db = ClusterDb::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        let definition =
            insert_definition(db.connection(), "mmseqs", "test", "mmseqs easy-cluster").unwrap();
        let cluster = insert_cluster_row(
            db.connection(),
            "c1",
            definition,
            "m1,m2",
            "m1",
            ("m2", 5),
            ("m1", 3),
            4.0,
            2,
            r#"{"Holin":1,"Lysin":1}"#,
            "Holin",
            2,
            false,
        )
        .unwrap();
        insert_fingerprint_link(db.connection(), "m1", cluster).unwrap();

        let mut cache = FunctionCache::new(&db);
        assert_eq!(cache.function("m1").unwrap(), Some("Holin"));
        assert_eq!(
            cache.all_functions("m1").unwrap().map(BTreeMap::len),
            Some(2)
        );
        assert_eq!(cache.function("m2").unwrap(), None);
    }
}
