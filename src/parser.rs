//! Parse a two column cluster membership file.
//!
//! Each line is `cluster<TAB>member`. Lines for one cluster must be
//! contiguous; the first column is taken as the exemplar. A cluster key
//! that reappears later starts a second, separate cluster.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use indexmap::IndexSet;

use crate::cluster::Cluster;
use crate::{Error, ErrorKind, Result};

/// Iterator over the clusters of a membership file.
pub struct MembershipParser<R: BufRead> {
    /// The reader to parse the file.
    reader: R,
    /// The cluster key being accumulated.
    current_key: Option<String>,
    /// Members seen so far for `current_key`.
    members: IndexSet<String>,
    /// Number of lines read, for error messages.
    line_number: usize,
    /// Set once the reader is exhausted or failed.
    done: bool,
}

impl<R: BufRead> MembershipParser<R> {
    pub fn new(reader: R) -> Self {
        MembershipParser {
            reader,
            current_key: None,
            members: IndexSet::new(),
            line_number: 0,
            done: false,
        }
    }

    /// Finalises the accumulated group, if any.
    fn take_cluster(&mut self) -> Option<Cluster> {
        let key = self.current_key.take()?;
        let members = std::mem::take(&mut self.members);
        Some(Cluster::new(None, &key, members))
    }
}

impl<R: BufRead> Iterator for MembershipParser<R> {
    type Item = Result<Cluster>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::from(e)));
                }
            }
            self.line_number += 1;

            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.trim().is_empty() {
                continue;
            }

            let (key, member) = match parse_membership_line(trimmed) {
                Ok(pair) => pair,
                Err(message) => {
                    self.done = true;
                    return Some(Err(Error::new(ErrorKind::Format {
                        line: self.line_number,
                        message,
                    })));
                }
            };

            if self.current_key.as_deref() != Some(key) {
                let finished = self.take_cluster();
                self.current_key = Some(key.to_string());
                self.members.insert(member.to_string());
                if let Some(cluster) = finished {
                    return Some(Ok(cluster));
                }
            } else {
                self.members.insert(member.to_string());
            }
        }

        // don't forget the last cluster
        self.done = true;
        self.take_cluster().map(Ok)
    }
}

/// Splits a line into its cluster key and member, without the whitespace
/// around either field.
fn parse_membership_line(line: &str) -> std::result::Result<(&str, &str), String> {
    let mut fields = line.split('\t').map(str::trim);
    match (fields.next(), fields.next(), fields.next()) {
        (Some(key), Some(member), None) if !key.is_empty() && !member.is_empty() => {
            Ok((key, member))
        }
        _ => Err(format!("expected `cluster<TAB>member`, found {:?}", line)),
    }
}

/// Opens a file for reading, decompressing it if it ends in `.gz`.
pub(crate) fn open_maybe_gz<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader: Box<dyn Read> = match path.extension() {
        Some(ext) if ext == "gz" => Box::new(MultiGzDecoder::new(file)),
        _ => Box::new(file),
    };
    Ok(Box::new(BufReader::new(reader)))
}

/// Function to parse a membership file from a path.
pub fn from_path<P: AsRef<Path>>(path: P) -> Result<MembershipParser<Box<dyn BufRead>>> {
    Ok(MembershipParser::new(open_maybe_gz(path)?))
}

/// Function to parse a membership file from a reader.
pub fn from_reader<R: BufRead>(reader: R) -> MembershipParser<R> {
    MembershipParser::new(reader)
}
