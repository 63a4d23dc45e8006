//! Loading proteins into the protein database and indexing their products.

use std::io::BufRead;
use std::path::Path;

use bio::io::fasta;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::function::normalise_product;
use crate::parser::open_maybe_gz;
use crate::Result;

/// The fingerprint of a protein sequence: lowercase hex MD5 of the upper
/// cased sequence.
pub fn fingerprint(sequence: &str) -> String {
    format!("{:x}", md5::compute(sequence.to_uppercase()))
}

/// CDS qualifiers kept with a protein loaded from GenBank. Multiple values
/// are joined with `|`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CdsAnnotation {
    pub db_xref: String,
    pub ec_number: String,
    pub genename: String,
    pub locus_tag: String,
    pub note: String,
    pub ribosomal_slippage: String,
    pub transl_table: String,
}

/// One annotated protein to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProteinRecord {
    pub protein_id: String,
    pub contig: Option<String>,
    pub product: String,
    pub sequence: String,
    /// `None` for proteins read from FASTA.
    pub annotation: Option<CdsAnnotation>,
}

/// Inserts a protein and, if new, its sequence. Returns the protein row id.
pub fn insert_protein(conn: &Connection, record: &ProteinRecord) -> Result<i64> {
    let sequence = record.sequence.to_uppercase();
    let md5 = fingerprint(&sequence);

    let known: Option<i64> = conn
        .query_row(
            "SELECT protein_sequence_rowid FROM protein_sequence WHERE protein_md5sum = ?1",
            [&md5],
            |row| row.get(0),
        )
        .optional()?;
    if known.is_none() {
        conn.execute(
            "INSERT INTO protein_sequence (protein_md5sum, protein_sequence) VALUES (?1, ?2)",
            params![md5, sequence],
        )?;
    }

    let annotation = record.annotation.as_ref();
    conn.execute(
        "INSERT INTO protein (protein_id, contig, product, protein_md5sum, length, db_xref, \
         EC_number, genename, locus_tag, note, ribosomal_slippage, transl_table) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.protein_id,
            record.contig,
            record.product,
            md5,
            sequence.chars().count() as i64,
            annotation.map(|a| a.db_xref.as_str()),
            annotation.map(|a| a.ec_number.as_str()),
            annotation.map(|a| a.genename.as_str()),
            annotation.map(|a| a.locus_tag.as_str()),
            annotation.map(|a| a.note.as_str()),
            annotation.map(|a| a.ribosomal_slippage.as_str()),
            annotation.map(|a| a.transl_table.as_str()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Counters for one FASTA load.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub proteins: usize,
    pub skipped: usize,
}

/// Loads every record of a protein FASTA file. The description becomes the
/// product; records without a sequence are skipped.
pub fn load_fasta<P: AsRef<Path>>(path: P, conn: &mut Connection) -> Result<LoadSummary> {
    let path = path.as_ref();
    info!("Parsing {}", path.display());
    let contig = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().trim_end_matches(".fasta").to_string());
    load_fasta_reader(open_maybe_gz(path)?, contig, conn)
}

/// As [`load_fasta`], from an open reader.
pub fn load_fasta_reader<R: BufRead>(
    reader: R,
    contig: Option<String>,
    conn: &mut Connection,
) -> Result<LoadSummary> {
    let mut summary = LoadSummary::default();
    let tx = conn.transaction()?;
    for record in fasta::Reader::from_bufread(reader).records() {
        let record = record?;
        if record.seq().is_empty() {
            warn!("SKIPPED: No translation for {}", record.id());
            summary.skipped += 1;
            continue;
        }
        let protein = ProteinRecord {
            protein_id: record.id().to_string(),
            contig: contig.clone(),
            product: normalise_product(record.desc().unwrap_or_default()),
            sequence: String::from_utf8_lossy(record.seq()).into_owned(),
            annotation: None,
        };
        insert_protein(&tx, &protein)?;
        summary.proteins += 1;
    }
    tx.commit()?;
    info!("Loaded {} proteins", summary.proteins);
    Ok(summary)
}

/// (Re)builds the full text index over protein products.
pub fn create_full_text_search(conn: &Connection) -> Result<()> {
    info!("Adding full text search capabilities");
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS protein_fts USING fts5(protein_rowid, product);
         DELETE FROM protein_fts;
         INSERT INTO protein_fts SELECT protein_rowid, product FROM protein;",
    )?;
    Ok(())
}

/// The number of proteins whose product contains `word`.
pub fn lookup_word(conn: &Connection, word: &str) -> Result<usize> {
    // quote the word so punctuation is not read as query syntax
    let query = format!("\"{}\"", word.replace('"', "\"\""));
    let count: i64 = conn.query_row(
        "SELECT count(1) FROM protein_fts WHERE product MATCH ?1",
        [query],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}
