/*!
Load protein clusters into SQLite.

The clustering tool (e.g. `mmseqs easy-cluster`) writes a two column file of
`representative<TAB>member` pairs. This crate turns that file into [`Cluster`]s,
resolves every member against a protein store to compute length extremes,
average size and a function histogram, and persists the enriched clusters
and their membership links into a separate cluster database.

The surrounding helpers load proteins from GenBank or FASTA, dump the protein store,
search product annotations and fetch records from GenBank.
*/

use std::io;
use std::num::ParseIntError;

pub mod cluster;
pub mod db;
pub mod enrich;
pub mod export;
pub mod fetch;
pub mod function;
pub mod genbank;
pub mod load;
pub mod parser;
pub mod persist;

pub use cluster::{Cluster, ClusterStats};
pub use enrich::{EnrichSummary, Enricher, SequenceStats, SequenceStatsStore, DEFAULT_CHUNK_SIZE};
pub use function::{FunctionClassifier, HypotheticalMatcher};
pub use parser::{from_path, from_reader, MembershipParser};
pub use persist::{ClusterDefinition, MemberLookup, PersistSummary, Persister};

/// A type alias for `Result<T, phamclust::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// An error type for this crate.
#[derive(Debug)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Error(Box::new(kind))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }
}

#[derive(Debug)]
pub enum ErrorKind {
    Io(io::Error),
    Int(ParseIntError),
    Sqlite(rusqlite::Error),
    Json(serde_json::Error),
    Http(reqwest::Error),
    Genbank(gb_io::reader::GbParserError),
    /// A membership line that is not `cluster<TAB>member`.
    Format { line: usize, message: String },
    /// The exemplar of a cluster is not in the protein store.
    MissingExemplar { cluster: String, exemplar: String },
    /// No member of a cluster could be resolved.
    EmptyAggregate { cluster: String },
    /// Persisting a cluster that has not been enriched.
    Unenriched { cluster: String },
    Store(String),
    Config(String),
    Remote(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::new(ErrorKind::Io(err))
    }
}

impl From<ParseIntError> for Error {
    fn from(err: ParseIntError) -> Self {
        Error::new(ErrorKind::Int(err))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::new(ErrorKind::Sqlite(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::Json(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::new(ErrorKind::Http(err))
    }
}

impl From<gb_io::reader::GbParserError> for Error {
    fn from(err: gb_io::reader::GbParserError) -> Self {
        Error::new(ErrorKind::Genbank(err))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self.0 {
            ErrorKind::Io(ref err) => write!(f, "I/O error - {}", err),
            ErrorKind::Int(ref err) => write!(f, "parsing integer error - {}", err),
            ErrorKind::Sqlite(ref err) => write!(f, "database error - {}", err),
            ErrorKind::Json(ref err) => write!(f, "JSON error - {}", err),
            ErrorKind::Http(ref err) => write!(f, "HTTP error - {}", err),
            ErrorKind::Genbank(ref err) => write!(f, "GenBank parsing error - {}", err),
            ErrorKind::Format { line, ref message } => {
                write!(f, "membership file line {} - {}", line, message)
            }
            ErrorKind::MissingExemplar {
                ref cluster,
                ref exemplar,
            } => write!(
                f,
                "exemplar {} of cluster {} is not in the protein database",
                exemplar, cluster
            ),
            ErrorKind::EmptyAggregate { ref cluster } => {
                write!(f, "no member of cluster {} could be resolved", cluster)
            }
            ErrorKind::Unenriched { ref cluster } => write!(
                f,
                "cluster {} has no statistics. Was the sequence information added?",
                cluster
            ),
            ErrorKind::Store(ref err) => write!(f, "store - {}", err),
            ErrorKind::Config(ref err) => write!(f, "configuration - {}", err),
            ErrorKind::Remote(ref err) => write!(f, "remote archive - {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self.0 {
            ErrorKind::Io(ref err) => Some(err),
            ErrorKind::Int(ref err) => Some(err),
            ErrorKind::Sqlite(ref err) => Some(err),
            ErrorKind::Json(ref err) => Some(err),
            ErrorKind::Http(ref err) => Some(err),
            ErrorKind::Genbank(ref err) => Some(err),
            _ => None,
        }
    }
}
