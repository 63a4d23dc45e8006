//! Loading GenBank records into the protein database.
//!
//! Every record becomes one `genome` row. Each translated CDS adds a
//! `protein` row (and its `protein_sequence` if the fingerprint is new) and
//! the `gene` row holding its DNA; tRNA and tmRNA features add `trna` rows.

use std::io::Read;
use std::path::Path;

use bio::alphabets::dna;
use gb_io::reader::SeqReader;
use gb_io::seq::{Feature, Location, Seq};
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::function::normalise_product;
use crate::load::{fingerprint, insert_protein, CdsAnnotation, ProteinRecord};
use crate::parser::open_maybe_gz;
use crate::Result;

/// Counters for one GenBank load.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GenbankSummary {
    pub genomes: usize,
    pub proteins: usize,
    pub trnas: usize,
    /// CDS features without a translation.
    pub skipped: usize,
}

impl GenbankSummary {
    fn add(&mut self, other: GenbankSummary) {
        self.genomes += other.genomes;
        self.proteins += other.proteins;
        self.trnas += other.trnas;
        self.skipped += other.skipped;
    }
}

/// Loads every record of a GenBank file, optionally gzipped.
pub fn load_genbank<P: AsRef<Path>>(path: P, conn: &mut Connection) -> Result<GenbankSummary> {
    let path = path.as_ref();
    info!("Parsing {}", path.display());
    load_genbank_reader(open_maybe_gz(path)?, &path.display().to_string(), conn)
}

/// As [`load_genbank`], from an open reader. `source_file` is recorded in
/// each `genome` row.
pub fn load_genbank_reader<R: Read>(
    reader: R,
    source_file: &str,
    conn: &mut Connection,
) -> Result<GenbankSummary> {
    let mut summary = GenbankSummary::default();
    for seq in SeqReader::new(reader) {
        let seq = seq?;
        let tx = conn.transaction()?;
        summary.add(insert_record(&tx, &seq, source_file)?);
        tx.commit()?;
    }
    info!(
        "Loaded {} genomes with {} proteins and {} tRNAs",
        summary.genomes, summary.proteins, summary.trnas
    );
    Ok(summary)
}

/// Source qualifiers copied to the genome row.
#[derive(Debug, Default)]
struct SourceQualifiers {
    collection_date: String,
    country: String,
    db_xref: String,
    isolation_source: String,
    host: String,
    strain: String,
    lab_host: String,
}

impl SourceQualifiers {
    fn from_feature(feature: &Feature) -> Self {
        SourceQualifiers {
            collection_date: first_qualifier(feature, "collection_date"),
            country: first_qualifier(feature, "country"),
            // every cross reference, not just the first
            db_xref: qualifier(feature, "db_xref"),
            isolation_source: first_qualifier(feature, "isolation_source"),
            host: first_qualifier(feature, "host"),
            strain: first_qualifier(feature, "strain"),
            lab_host: first_qualifier(feature, "lab_host"),
        }
    }
}

/// Inserts one record and its features. Runs inside the caller's
/// transaction.
pub(crate) fn insert_record(
    conn: &Connection,
    seq: &Seq,
    source_file: &str,
) -> Result<GenbankSummary> {
    let mut summary = GenbankSummary::default();
    let contig = seq.name.clone().unwrap_or_default();
    let mut source = SourceQualifiers::default();

    for feature in &seq.features {
        match feature.kind.to_string().as_str() {
            "source" => source = SourceQualifiers::from_feature(feature),
            "CDS" => {
                if insert_cds(conn, seq, &contig, feature)? {
                    summary.proteins += 1;
                } else {
                    summary.skipped += 1;
                }
            }
            kind @ ("tRNA" | "tmRNA") => {
                insert_trna(conn, seq, &contig, feature, kind == "tmRNA")?;
                summary.trnas += 1;
            }
            _ => {}
        }
    }

    insert_genome(conn, seq, source_file, &source)?;
    summary.genomes += 1;
    debug!("{}: {} proteins, {} tRNAs", contig, summary.proteins, summary.trnas);
    Ok(summary)
}

/// Returns false when the CDS has no translation and was skipped.
fn insert_cds(conn: &Connection, seq: &Seq, contig: &str, feature: &Feature) -> Result<bool> {
    let protein_id = qualifier(feature, "protein_id");
    let translation = qualifier(feature, "translation");
    if translation.is_empty() {
        warn!("SKIPPED: No translation for {}", protein_id);
        return Ok(false);
    }

    let annotation = CdsAnnotation {
        db_xref: qualifier(feature, "db_xref"),
        ec_number: qualifier(feature, "EC_number"),
        genename: qualifier(feature, "gene"),
        locus_tag: qualifier(feature, "locus_tag"),
        note: qualifier(feature, "note"),
        ribosomal_slippage: qualifier(feature, "ribosomal_slippage"),
        transl_table: qualifier(feature, "transl_table"),
    };
    let record = ProteinRecord {
        protein_id,
        contig: Some(contig.to_string()),
        product: normalise_product(&qualifier(feature, "product")),
        sequence: translation,
        annotation: Some(annotation),
    };
    let protein = insert_protein(conn, &record)?;

    let (start, end) = bounds(&feature.location);
    let dna = feature_dna(seq, &feature.location);
    let annotation = record.annotation.unwrap_or_default();
    conn.execute(
        "INSERT INTO gene (accession, contig, start, end, strand, length, dna_sequence, \
         dna_sequence_md5, protein, db_xref) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            annotation.locus_tag,
            contig,
            start,
            end,
            strand(&feature.location),
            dna.len() as i64,
            dna,
            fingerprint(&dna),
            protein,
            annotation.db_xref,
        ],
    )?;
    let gene = conn.last_insert_rowid();
    conn.execute(
        "UPDATE protein SET gene = ?1 WHERE protein_rowid = ?2",
        params![gene, protein],
    )?;
    Ok(true)
}

fn insert_trna(
    conn: &Connection,
    seq: &Seq,
    contig: &str,
    feature: &Feature,
    is_tmrna: bool,
) -> Result<()> {
    let (start, end) = bounds(&feature.location);
    let dna = feature_dna(seq, &feature.location);
    conn.execute(
        "INSERT INTO trna (accession, contig, start, end, strand, dna_sequence, \
         dna_sequence_md5, codon_recognized, db_xref, gene, note, product, is_tmRNA) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            qualifier(feature, "locus_tag"),
            contig,
            start,
            end,
            strand(&feature.location),
            dna,
            fingerprint(&dna),
            qualifier(feature, "codon_recognized"),
            qualifier(feature, "db_xref"),
            qualifier(feature, "gene"),
            qualifier(feature, "note"),
            qualifier(feature, "product"),
            is_tmrna,
        ],
    )?;
    Ok(())
}

fn insert_genome(
    conn: &Connection,
    seq: &Seq,
    source_file: &str,
    qualifiers: &SourceQualifiers,
) -> Result<()> {
    let accession = seq
        .accession
        .as_deref()
        .and_then(|a| a.split_whitespace().next())
        .unwrap_or_default();
    let identifier = seq.version.as_deref().unwrap_or(accession);
    let (source, organism, taxonomy) = match &seq.source {
        Some(source) => {
            let (organism, taxonomy) = split_organism(source.organism.as_deref().unwrap_or(""));
            (source.source.as_str(), organism, taxonomy)
        }
        None => ("", String::new(), String::new()),
    };
    let sequence = String::from_utf8_lossy(&seq.seq).to_ascii_uppercase();

    conn.execute(
        "INSERT INTO genome (identifier, source_file, accession, name, description, source, \
         organism, taxonomy, collection_date, country, db_xref, host, isolation_source, \
         strain, lab_host, sequence, sequence_md5, length) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            identifier,
            source_file,
            accession,
            seq.name,
            seq.definition,
            source,
            organism,
            taxonomy,
            qualifiers.collection_date,
            qualifiers.country,
            qualifiers.db_xref,
            qualifiers.host,
            qualifiers.isolation_source,
            qualifiers.strain,
            qualifiers.lab_host,
            sequence,
            fingerprint(&sequence),
            sequence.len() as i64,
        ],
    )?;
    Ok(())
}

/// All values of a qualifier joined with `|`, or empty.
fn qualifier(feature: &Feature, key: &str) -> String {
    feature
        .qualifier_values(key.into())
        .collect::<Vec<_>>()
        .join("|")
}

fn first_qualifier(feature: &Feature, key: &str) -> String {
    feature
        .qualifier_values(key.into())
        .next()
        .unwrap_or_default()
        .to_string()
}

/// The organism name and its `; ` separated lineage. The ORGANISM block
/// holds the name on its first line and the lineage below it.
fn split_organism(block: &str) -> (String, String) {
    let mut lines = block.lines().map(str::trim);
    let organism = lines.next().unwrap_or_default().to_string();
    let lineage = lines.collect::<Vec<_>>().join(" ");
    let taxonomy = lineage
        .trim_end_matches('.')
        .split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    (organism, taxonomy)
}

/// Zero based start and exclusive end of the location.
fn bounds(location: &Location) -> (Option<i64>, Option<i64>) {
    match location.find_bounds() {
        Ok((start, end)) => (Some(start), Some(end)),
        Err(_) => (None, None),
    }
}

fn collect_strands(location: &Location, reverse: bool, strands: &mut Vec<bool>) {
    match location {
        Location::Range(_, _) | Location::Between(_, _) => strands.push(reverse),
        Location::Complement(inner) => collect_strands(inner, !reverse, strands),
        Location::Join(parts)
        | Location::Order(parts)
        | Location::Bond(parts)
        | Location::OneOf(parts) => {
            for part in parts {
                collect_strands(part, reverse, strands);
            }
        }
        Location::External(_, Some(inner)) => collect_strands(inner, reverse, strands),
        Location::External(_, None) | Location::Gap(_) => {}
    }
}

/// 1 or -1, or `None` when the parts disagree.
fn strand(location: &Location) -> Option<i64> {
    let mut strands = Vec::new();
    collect_strands(location, false, &mut strands);
    if strands.is_empty() {
        None
    } else if strands.iter().all(|reverse| *reverse) {
        Some(-1)
    } else if strands.iter().all(|reverse| !*reverse) {
        Some(1)
    } else {
        None
    }
}

/// The feature's DNA in the orientation of the feature.
fn extract(seq: &[u8], location: &Location) -> Option<Vec<u8>> {
    match location {
        Location::Range((from, _), (to, _)) => {
            let from = usize::try_from(*from).ok()?;
            let to = usize::try_from(*to).ok()?;
            seq.get(from..to).map(<[u8]>::to_vec)
        }
        Location::Complement(inner) => extract(seq, inner).map(|dna| dna::revcomp(&dna)),
        Location::Join(parts) | Location::Order(parts) => {
            let mut joined = Vec::new();
            for part in parts {
                joined.extend(extract(seq, part)?);
            }
            Some(joined)
        }
        _ => None,
    }
}

fn feature_dna(seq: &Seq, location: &Location) -> String {
    match extract(&seq.seq, location) {
        Some(dna) => String::from_utf8_lossy(&dna).to_ascii_uppercase(),
        None => {
            warn!(
                "Cannot extract {:?} from {}",
                location,
                seq.name.as_deref().unwrap_or("unnamed record")
            );
            String::new()
        }
    }
}
