//! FASTA exports of the protein database.

use std::collections::HashSet;
use std::io::Write;

use bio::io::fasta;
use rusqlite::Connection;
use tracing::info;

use crate::Result;

/// Writes every distinct protein sequence, named by its fingerprint.
/// Returns the number of records written.
pub fn dump_fasta<W: Write>(conn: &Connection, writer: W) -> Result<usize> {
    write_sequences(conn, writer, |_| true)
}

/// Writes the sequences whose fingerprint is not in `clustered`.
pub fn dump_unclustered<W: Write>(
    conn: &Connection,
    clustered: &HashSet<String>,
    writer: W,
) -> Result<usize> {
    info!("Loaded {} clustered proteins", clustered.len());
    write_sequences(conn, writer, |md5| !clustered.contains(md5))
}

fn write_sequences<W, F>(conn: &Connection, writer: W, keep: F) -> Result<usize>
where
    W: Write,
    F: Fn(&str) -> bool,
{
    let mut stmt = conn.prepare(
        "SELECT protein_md5sum, protein_sequence FROM protein_sequence \
         ORDER BY protein_sequence_rowid",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut writer = fasta::Writer::new(writer);
    let mut tested = 0;
    let mut written = 0;
    for row in rows {
        let (md5, sequence) = row?;
        tested += 1;
        if keep(md5.as_str()) {
            writer.write(&md5, None, sequence.as_bytes())?;
            written += 1;
        }
    }
    writer.flush()?;
    info!("Wrote {} of {} proteins", written, tested);
    Ok(written)
}
