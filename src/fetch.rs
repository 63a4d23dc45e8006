//! Fetching records from GenBank through NCBI E-utilities and downloading
//! the prebuilt database snapshots.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::{Client, Request};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{Error, ErrorKind, Result};

pub const EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
pub const PHAGE_DB_URL: &str = "https://edwards.sdsu.edu/phage/PPPF/phages.sql";
pub const CLUSTER_DB_URL: &str = "https://edwards.sdsu.edu/phage/PPPF/clusters.sql";

/// Settings for E-utilities requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrezConfig {
    /// Contact address NCBI requires with every request.
    pub email: String,
    pub api_key: String,
    /// Database to query, `nuccore` by default.
    pub db: String,
    /// Record format, `gb` by default.
    pub rettype: String,
    /// `text` by default.
    pub retmode: String,
    /// Accessions per efetch request, 250 by default.
    pub batch_size: usize,
    /// Maximum number of search hits. `None` retrieves every hit.
    pub retmax: Option<usize>,
    pub base_url: String,
}

impl EntrezConfig {
    pub fn new(email: &str, api_key: &str) -> Result<Self> {
        let config = EntrezConfig {
            email: email.trim().to_string(),
            api_key: api_key.trim().to_string(),
            db: "nuccore".to_string(),
            rettype: "gb".to_string(),
            retmode: "text".to_string(),
            batch_size: 250,
            retmax: None,
            base_url: EUTILS_URL.to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_db(mut self, db: &str) -> Self {
        self.db = db.to_string();
        self
    }

    pub fn with_rettype(mut self, rettype: &str) -> Self {
        self.rettype = rettype.to_string();
        self
    }

    pub fn with_retmode(mut self, retmode: &str) -> Self {
        self.retmode = retmode.to_string();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retmax(mut self, retmax: Option<usize>) -> Self {
        self.retmax = retmax;
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let problem = if self.email.is_empty() {
            Some("NCBI requires an email address with each request (set EMAIL)")
        } else if self.api_key.is_empty() {
            Some("an NCBI API key is required (set NCBI_API_KEY)")
        } else if self.batch_size == 0 {
            Some("batch size must be at least 1")
        } else if self.db.is_empty() || self.rettype.is_empty() || self.retmode.is_empty() {
            Some("db, rettype and retmode must not be empty")
        } else if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            Some("base url must be http or https")
        } else {
            None
        };
        match problem {
            Some(message) => Err(Error::new(ErrorKind::Config(message.to_string()))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    count: String,
    #[serde(default)]
    idlist: Vec<String>,
}

/// The hit count and ids of one esearch response.
fn parse_esearch(body: &str) -> Result<(usize, Vec<String>)> {
    let response: ESearchResponse = serde_json::from_str(body)?;
    let count = response.esearchresult.count.parse()?;
    Ok((count, response.esearchresult.idlist))
}

/// A blocking E-utilities client.
pub struct Entrez {
    config: EntrezConfig,
    client: Client,
}

impl Entrez {
    pub fn new(config: EntrezConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .user_agent(concat!("phamclust/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Entrez { config, client })
    }

    fn esearch_request(&self, term: &str, retmax: usize) -> Result<Request> {
        Ok(self
            .client
            .get(format!("{}/esearch.fcgi", self.config.base_url))
            .query(&[
                ("db", self.config.db.as_str()),
                ("term", term),
                ("retmode", "json"),
                ("email", self.config.email.as_str()),
                ("api_key", self.config.api_key.as_str()),
            ])
            .query(&[("retmax", retmax)])
            .build()?)
    }

    fn efetch_request(&self, ids: &[String]) -> Result<Request> {
        Ok(self
            .client
            .get(format!("{}/efetch.fcgi", self.config.base_url))
            .query(&[
                ("db", self.config.db.as_str()),
                ("id", ids.join(",").as_str()),
                ("rettype", self.config.rettype.as_str()),
                ("retmode", self.config.retmode.as_str()),
                ("email", self.config.email.as_str()),
                ("api_key", self.config.api_key.as_str()),
            ])
            .build()?)
    }

    fn send(&self, request: Request) -> Result<reqwest::blocking::Response> {
        debug!("GET {}", request.url());
        let response = self.client.execute(request)?;
        if !response.status().is_success() {
            return Err(Error::new(ErrorKind::Remote(format!(
                "E-utilities returned status {}",
                response.status()
            ))));
        }
        Ok(response)
    }

    /// Searches the database and returns the matching ids.
    ///
    /// Without a configured `retmax` a first request only asks for the
    /// number of hits and a second retrieves all of them.
    pub fn search(&self, term: &str) -> Result<Vec<String>> {
        let retmax = match self.config.retmax {
            Some(retmax) => retmax,
            None => {
                info!("Performing first search to see how many records to retrieve");
                let body = self.send(self.esearch_request(term, 0)?)?.text()?;
                parse_esearch(&body)?.0
            }
        };
        info!("Retrieving {} records", retmax);
        let body = self.send(self.esearch_request(term, retmax)?)?.text()?;
        Ok(parse_esearch(&body)?.1)
    }

    /// Fetches the accessions in batches, appending every response to
    /// `out`. Returns the number of requests made.
    pub fn fetch<W: Write>(&self, accessions: &[String], mut out: W) -> Result<usize> {
        let mut requests = 0;
        for (i, batch) in accessions.chunks(self.config.batch_size).enumerate() {
            let start = i * self.config.batch_size;
            info!("Getting accessions {}-{}", start, start + batch.len());
            let mut response = self.send(self.efetch_request(batch)?)?;
            io::copy(&mut response, &mut out)?;
            requests += 1;
        }
        out.flush()?;
        Ok(requests)
    }

    /// Fetches the accessions into `directory/outputfile`, creating the
    /// directory if needed.
    pub fn fetch_to_directory(
        &self,
        accessions: &[String],
        directory: &Path,
        outputfile: &str,
    ) -> Result<PathBuf> {
        fs::create_dir_all(directory)?;
        let path = directory.join(outputfile);
        let out = io::BufWriter::new(File::create(&path)?);
        self.fetch(accessions, out)?;
        Ok(path)
    }
}

/// Streams `url` into `path`. Returns the number of bytes written.
pub fn download_file(client: &Client, url: &str, path: &Path) -> Result<u64> {
    let mut response = client.get(url).send()?.error_for_status()?;
    let mut out = io::BufWriter::new(File::create(path)?);
    let written = io::copy(&mut response, &mut out)?;
    out.flush()?;
    Ok(written)
}

/// Downloads the prebuilt protein and cluster databases into `directory`.
pub fn download_snapshots(directory: &Path) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(directory)?;
    let client = Client::builder().build()?;
    let phages = snapshot_path(directory, PHAGE_DB_URL);
    let clusters = snapshot_path(directory, CLUSTER_DB_URL);

    info!("Downloading the phages to {}", phages.display());
    download_file(&client, PHAGE_DB_URL, &phages)?;
    info!("Downloading the clusters to {}", clusters.display());
    download_file(&client, CLUSTER_DB_URL, &clusters)?;
    Ok((phages, clusters))
}

fn snapshot_path(directory: &Path, url: &str) -> PathBuf {
    directory.join(url.rsplit('/').next().unwrap_or(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EntrezConfig {
        EntrezConfig::new("someone@example.org", "key123").unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.db, "nuccore");
        assert_eq!(config.rettype, "gb");
        assert_eq!(config.retmode, "text");
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.retmax, None);
    }

    #[test]
    fn test_invalid_config() {
        assert!(EntrezConfig::new("", "key").is_err());
        assert!(EntrezConfig::new("a@b.c", " ").is_err());
        assert!(config().with_batch_size(0).validate().is_err());
        assert!(config().with_base_url("ftp://ncbi").validate().is_err());
        assert!(Entrez::new(config().with_db("")).is_err());
        assert!(config().with_rettype("").validate().is_err());
    }

    #[test]
    fn test_efetch_request() {
        let entrez = Entrez::new(config().with_base_url("https://example.org/eutils/")).unwrap();
        let ids = vec!["NC_001416".to_string(), "NC_001604".to_string()];
        let request = entrez.efetch_request(&ids).unwrap();

        let url = request.url();
        assert_eq!(url.path(), "/eutils/efetch.fcgi");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("id".to_string(), "NC_001416,NC_001604".to_string())));
        assert!(pairs.contains(&("db".to_string(), "nuccore".to_string())));
        assert!(pairs.contains(&("api_key".to_string(), "key123".to_string())));
        assert!(pairs.contains(&("rettype".to_string(), "gb".to_string())));
    }

    #[test]
    fn test_efetch_record_format() {
        let config = config().with_rettype("fasta_cds_aa").with_retmode("xml");
        let entrez = Entrez::new(config).unwrap();
        let request = entrez.efetch_request(&["NC_001416".to_string()]).unwrap();
        let pairs: Vec<(String, String)> = request.url().query_pairs().into_owned().collect();
        assert!(pairs.contains(&("rettype".to_string(), "fasta_cds_aa".to_string())));
        assert!(pairs.contains(&("retmode".to_string(), "xml".to_string())));
    }

    #[test]
    fn test_esearch_request() {
        let entrez = Entrez::new(config().with_db("protein")).unwrap();
        let request = entrez.esearch_request("phage[title]", 20).unwrap();
        let pairs: Vec<(String, String)> = request.url().query_pairs().into_owned().collect();
        assert!(pairs.contains(&("term".to_string(), "phage[title]".to_string())));
        assert!(pairs.contains(&("retmax".to_string(), "20".to_string())));
        assert!(pairs.contains(&("db".to_string(), "protein".to_string())));
    }

    #[test]
    fn test_parse_esearch() {
        let body = r#"{"header":{"type":"esearch"},
            "esearchresult":{"count":"3","retmax":"2","idlist":["9629357","9629367"]}}"#;
        let (count, ids) = parse_esearch(body).unwrap();
        assert_eq!(count, 3);
        assert_eq!(ids, vec!["9629357", "9629367"]);

        assert!(parse_esearch("{}").is_err());
    }

    #[test]
    fn test_snapshot_path() {
        let path = snapshot_path(Path::new("/data"), PHAGE_DB_URL);
        assert_eq!(path, PathBuf::from("/data/phages.sql"));
    }
}
