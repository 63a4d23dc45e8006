// phamclust
// load protein clusters into SQLite and work with the protein database

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{crate_version, value_parser, Arg, ArgAction, ArgMatches, Command};
use phamclust::db::{self, ClusterDb, FunctionCache, KeyColumn, ProteinDb};
use phamclust::fetch::{self, Entrez, EntrezConfig};
use phamclust::{
    export, genbank, load, ClusterDefinition, Enricher, ErrorKind, HypotheticalMatcher, Persister,
    Result as PhamResult,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn protein_db_arg() -> Arg {
    Arg::new("proteins")
        .short('p')
        .long("proteins")
        .help("The protein SQLite database.")
        .value_parser(value_parser!(PathBuf))
        .required(true)
}

fn cluster_db_arg() -> Arg {
    Arg::new("clusters")
        .short('c')
        .long("clusters")
        .help("The cluster SQLite database.")
        .value_parser(value_parser!(PathBuf))
        .required(true)
}

fn output_arg() -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .help("Output file. Defaults to stdout.")
        .value_parser(value_parser!(PathBuf))
}

fn entrez_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email")
                .long("email")
                .env("EMAIL")
                .help("Email address sent to NCBI with each request.")
                .required(true),
        )
        .arg(
            Arg::new("api-key")
                .long("api-key")
                .env("NCBI_API_KEY")
                .hide_env_values(true)
                .help("NCBI API key.")
                .required(true),
        )
        .arg(
            Arg::new("db")
                .long("db")
                .help("The Entrez database.")
                .default_value("nuccore"),
        )
}

fn parse_args() -> ArgMatches {
    Command::new("phamclust")
        .version(crate_version!())
        .arg_required_else_help(true)
        .subcommand_required(true)
        .max_term_width(80)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("More output. Repeat for trace output.")
                .action(ArgAction::Count)
                .global(true),
        )
        .subcommand(
            Command::new("create-tables")
                .about("Create the tables of empty protein and/or cluster databases.")
                .arg(protein_db_arg().required(false))
                .arg(cluster_db_arg().required(false)),
        )
        .subcommand(
            Command::new("load-genbank")
                .about("Load genomes, genes, proteins and tRNAs from GenBank files.")
                .arg(protein_db_arg())
                .arg(
                    Arg::new("FILE")
                        .help("GenBank files, optionally gzipped.")
                        .value_parser(value_parser!(PathBuf))
                        .num_args(1..)
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("load-fasta")
                .about("Load proteins from FASTA files into the protein database.")
                .arg(protein_db_arg())
                .arg(
                    Arg::new("FILE")
                        .help("Protein FASTA files, optionally gzipped.")
                        .value_parser(value_parser!(PathBuf))
                        .num_args(1..)
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("load-clusters")
                .about(
                    "Enrich clusters from a membership file and load them into the cluster \
                     database.",
                )
                .arg(protein_db_arg())
                .arg(cluster_db_arg())
                .arg(
                    Arg::new("tsv")
                        .short('t')
                        .long("tsv")
                        .help("Cluster membership file: `cluster<TAB>member` per line.")
                        .value_parser(value_parser!(PathBuf))
                        .required(true),
                )
                .arg(
                    Arg::new("name")
                        .short('n')
                        .long("name")
                        .help("Cluster name (short text).")
                        .required(true),
                )
                .arg(
                    Arg::new("description")
                        .short('d')
                        .long("description")
                        .help("Cluster description (human readable text).")
                        .required(true),
                )
                .arg(
                    Arg::new("cli")
                        .long("cli")
                        .help("The command line used for the clustering.")
                        .required(true),
                )
                .arg(
                    Arg::new("accessions")
                        .long("accessions")
                        .help("Members are protein accessions rather than sequence MD5 sums.")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("chunk-size")
                        .long("chunk-size")
                        .help("Members per database query.")
                        .value_parser(value_parser!(usize))
                        .default_value("500"),
                )
                .arg(
                    Arg::new("extended")
                        .long("extended")
                        .help(
                            "Write cluster, member, length and function of every member to \
                             this file.",
                        )
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("dump-fasta")
                .about("Write every protein sequence, named by its MD5 sum.")
                .arg(protein_db_arg())
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("unclustered")
                .about("Write the protein sequences that are not in any cluster.")
                .arg(protein_db_arg())
                .arg(cluster_db_arg())
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("search-product")
                .about("Count the proteins whose product contains a word.")
                .arg(protein_db_arg())
                .arg(
                    Arg::new("reindex")
                        .long("reindex")
                        .help("Rebuild the full text index first.")
                        .action(ArgAction::SetTrue),
                )
                .arg(Arg::new("WORD").required(true).index(1)),
        )
        .subcommand(
            Command::new("function-of")
                .about("Print the cluster function of proteins given by MD5 sum.")
                .arg(cluster_db_arg())
                .arg(Arg::new("MD5").num_args(1..).required(true)),
        )
        .subcommand(
            entrez_args(Command::new("search-genbank"))
                .about("Search GenBank and print the matching ids.")
                .arg(Arg::new("TERM").required(true).index(1))
                .arg(
                    Arg::new("retmax")
                        .long("retmax")
                        .help("Maximum number of ids. Defaults to all hits.")
                        .value_parser(value_parser!(usize)),
                )
                .arg(output_arg()),
        )
        .subcommand(
            entrez_args(Command::new("fetch-genbank"))
                .about("Download GenBank records for a file of accessions, one per line.")
                .arg(
                    Arg::new("ACCESSIONS")
                        .value_parser(value_parser!(PathBuf))
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("directory")
                        .short('d')
                        .long("directory")
                        .value_parser(value_parser!(PathBuf))
                        .default_value("."),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .default_value("sequences.gb"),
                )
                .arg(
                    Arg::new("batch-size")
                        .long("batch-size")
                        .value_parser(value_parser!(usize))
                        .default_value("250"),
                )
                .arg(
                    Arg::new("rettype")
                        .long("rettype")
                        .help("efetch record format.")
                        .default_value("gb"),
                )
                .arg(
                    Arg::new("retmode")
                        .long("retmode")
                        .help("efetch return mode.")
                        .default_value("text"),
                ),
        )
        .subcommand(
            Command::new("download")
                .about("Download the prebuilt protein and cluster databases.")
                .arg(
                    Arg::new("directory")
                        .short('d')
                        .long("directory")
                        .value_parser(value_parser!(PathBuf))
                        .default_value("."),
                ),
        )
        .get_matches()
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("PHAMCLUST_LOG").unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}

fn output(path: Option<&PathBuf>) -> PhamResult<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

fn path<'a>(matches: &'a ArgMatches, id: &str) -> &'a PathBuf {
    matches
        .get_one::<PathBuf>(id)
        .expect("required arguments are enforced by clap")
}

fn string<'a>(matches: &'a ArgMatches, id: &str) -> &'a str {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .expect("required arguments are enforced by clap")
}

fn create_tables(matches: &ArgMatches) -> PhamResult<()> {
    if let Some(p) = matches.get_one::<PathBuf>("proteins") {
        info!("Creating protein tables in {}", p.display());
        db::create_protein_tables(&db::create(p)?)?;
    }
    if let Some(c) = matches.get_one::<PathBuf>("clusters") {
        info!("Creating cluster tables in {}", c.display());
        db::create_cluster_tables(&db::create(c)?)?;
    }
    Ok(())
}

fn load_genbank(matches: &ArgMatches) -> PhamResult<()> {
    let mut conn = db::open(path(matches, "proteins"))?;
    for file in matches.get_many::<PathBuf>("FILE").into_iter().flatten() {
        genbank::load_genbank(file, &mut conn)?;
    }
    load::create_full_text_search(&conn)
}

fn load_fasta(matches: &ArgMatches) -> PhamResult<()> {
    let mut conn = db::open(path(matches, "proteins"))?;
    for file in matches.get_many::<PathBuf>("FILE").into_iter().flatten() {
        load::load_fasta(file, &mut conn)?;
    }
    load::create_full_text_search(&conn)
}

fn load_clusters(matches: &ArgMatches) -> PhamResult<()> {
    let key = if matches.get_flag("accessions") {
        KeyColumn::Accession
    } else {
        KeyColumn::Fingerprint
    };
    let proteins = ProteinDb::open(path(matches, "proteins"), key)?;
    let mut clusters_db = ClusterDb::open(path(matches, "clusters"))?;

    let tsv = path(matches, "tsv");
    info!("Reading {}", tsv.display());
    let mut clusters = phamclust::from_path(tsv)?.collect::<PhamResult<Vec<_>>>()?;
    info!("There were {} clusters", clusters.len());

    let chunk_size = *matches
        .get_one::<usize>("chunk-size")
        .expect("defaulted by clap");
    let mut enricher = Enricher::new(HypotheticalMatcher::default()).with_chunk_size(chunk_size)?;
    if let Some(extended) = matches.get_one::<PathBuf>("extended") {
        enricher = enricher.with_audit(BufWriter::new(File::create(extended)?));
    }
    let enriched = enricher.enrich(&mut clusters, &proteins)?;

    let definition = ClusterDefinition {
        name: string(matches, "name").to_string(),
        description: string(matches, "description").to_string(),
        command: string(matches, "cli").to_string(),
    };
    let mut persister = Persister::new(&mut clusters_db);
    let definition_id = persister.insert_definition(&definition)?;
    persister.persist(&clusters, &proteins, &enriched.member_keys, definition_id)?;
    Ok(())
}

fn dump_fasta(matches: &ArgMatches) -> PhamResult<()> {
    let conn = db::open(path(matches, "proteins"))?;
    export::dump_fasta(&conn, output(matches.get_one::<PathBuf>("output"))?)?;
    Ok(())
}

fn unclustered(matches: &ArgMatches) -> PhamResult<()> {
    let conn = db::open(path(matches, "proteins"))?;
    let clustered = ClusterDb::open(path(matches, "clusters"))?.clustered_fingerprints()?;
    export::dump_unclustered(&conn, &clustered, output(matches.get_one::<PathBuf>("output"))?)?;
    Ok(())
}

fn search_product(matches: &ArgMatches) -> PhamResult<()> {
    let conn = db::open(path(matches, "proteins"))?;
    if matches.get_flag("reindex") {
        load::create_full_text_search(&conn)?;
    }
    let word = string(matches, "WORD");
    println!("{}\t{}", word, load::lookup_word(&conn, word)?);
    Ok(())
}

fn function_of(matches: &ArgMatches) -> PhamResult<()> {
    let clusters = ClusterDb::open(path(matches, "clusters"))?;
    let mut cache = FunctionCache::new(&clusters);
    let mut out = io::stdout().lock();
    for md5 in matches.get_many::<String>("MD5").into_iter().flatten() {
        let Some(function) = cache.function(md5)?.map(str::to_string) else {
            writeln!(out, "{}\tnot in a cluster", md5)?;
            continue;
        };
        writeln!(out, "{}\t{}", md5, function)?;
        if let Some(functions) = cache.all_functions(md5)? {
            let mut functions: Vec<_> = functions.iter().collect();
            functions.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            for (f, count) in functions {
                writeln!(out, "\t{} -> {}", f, count)?;
            }
        }
    }
    Ok(())
}

fn entrez_config(matches: &ArgMatches) -> PhamResult<EntrezConfig> {
    Ok(EntrezConfig::new(string(matches, "email"), string(matches, "api-key"))?
        .with_db(string(matches, "db")))
}

fn search_genbank(matches: &ArgMatches) -> PhamResult<()> {
    let config = entrez_config(matches)?.with_retmax(matches.get_one::<usize>("retmax").copied());
    let ids = Entrez::new(config)?.search(string(matches, "TERM"))?;
    let mut out = output(matches.get_one::<PathBuf>("output"))?;
    for id in ids {
        writeln!(out, "{}", id)?;
    }
    out.flush()?;
    Ok(())
}

fn read_accessions(path: &Path) -> PhamResult<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn fetch_genbank(matches: &ArgMatches) -> PhamResult<()> {
    let batch_size = *matches
        .get_one::<usize>("batch-size")
        .expect("defaulted by clap");
    let config = entrez_config(matches)?
        .with_batch_size(batch_size)
        .with_rettype(string(matches, "rettype"))
        .with_retmode(string(matches, "retmode"));
    let accessions = read_accessions(path(matches, "ACCESSIONS"))?;
    let written = Entrez::new(config)?.fetch_to_directory(
        &accessions,
        path(matches, "directory"),
        string(matches, "output"),
    )?;
    info!("Wrote {} records to {}", accessions.len(), written.display());
    Ok(())
}

fn run(matches: &ArgMatches) -> PhamResult<()> {
    match matches.subcommand() {
        Some(("create-tables", m)) => create_tables(m),
        Some(("load-genbank", m)) => load_genbank(m),
        Some(("load-fasta", m)) => load_fasta(m),
        Some(("load-clusters", m)) => load_clusters(m),
        Some(("dump-fasta", m)) => dump_fasta(m),
        Some(("unclustered", m)) => unclustered(m),
        Some(("search-product", m)) => search_product(m),
        Some(("function-of", m)) => function_of(m),
        Some(("search-genbank", m)) => search_genbank(m),
        Some(("fetch-genbank", m)) => fetch_genbank(m),
        Some(("download", m)) => fetch::download_snapshots(path(m, "directory")).map(|_| ()),
        _ => unreachable!("a subcommand is required"),
    }
}

fn main() {
    let matches = parse_args();
    init_logging(matches.get_count("verbose"));

    if let Err(e) = run(&matches) {
        eprintln!("Error: {}", e);
        let code = match e.kind() {
            ErrorKind::Config(_) => 2,
            ErrorKind::Io(_) | ErrorKind::Store(_) => 3,
            ErrorKind::Format { .. }
            | ErrorKind::Genbank(_)
            | ErrorKind::Int(_)
            | ErrorKind::Json(_) => 4,
            ErrorKind::Sqlite(_)
            | ErrorKind::MissingExemplar { .. }
            | ErrorKind::EmptyAggregate { .. }
            | ErrorKind::Unenriched { .. } => 5,
            _ => 1,
        };
        process::exit(code);
    }
}
