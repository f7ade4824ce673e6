use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process;

use clap::{crate_version, Arg, ArgAction, ArgMatches, Command};
use log::{debug, error, info, warn, LevelFilter};

use blastkit::blast::{write_hits, Blastn, OutputFormat};
use blastkit::formatdb::{self, DatabaseReference, DbType};

fn main() {
    let mut app = build_cli();
    let matches = app.clone().get_matches();

    match matches.subcommand_name() {
        Some("makedb") => {
            let m = matches.subcommand_matches("makedb").unwrap();
            set_log_level(m);
            if let Err(e) = run_makedb(m) {
                error!("{}", e);
                process::exit(1);
            }
        }
        Some("search") => {
            let m = matches.subcommand_matches("search").unwrap();
            set_log_level(m);
            if let Err(e) = run_search(m) {
                error!("{}", e);
                process::exit(1);
            }
        }
        _ => {
            app.print_help().unwrap();
            println!();
        }
    }
}

fn run_makedb(m: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let input = PathBuf::from(m.get_one::<String>("input-fasta").unwrap());
    let output_dir = m.get_one::<String>("working-dir").map(PathBuf::from);
    let db_type = if m.get_flag("protein") {
        DbType::Protein
    } else {
        DbType::Nucleotide
    };
    let executable = m.get_one::<String>("formatdb-bin").unwrap();
    if executable == "formatdb" {
        bird_tool_utils::external_command_checker::check_for_external_command_presence(
            "formatdb",
            "which formatdb",
        )
        .expect("Failed to find installed formatdb");
    }

    let reference =
        formatdb::index_fasta_path(&input, output_dir.as_deref(), db_type, executable)?;
    info!("Formatted {:?} as a searchable database", reference.path);
    for file in &reference.files {
        debug!("Database file: {:?}", file);
    }
    Ok(())
}

fn run_search(m: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let db = PathBuf::from(m.get_one::<String>("db").unwrap());
    let query = PathBuf::from(m.get_one::<String>("query-fasta").unwrap());
    let e_value = *m.get_one::<f64>("e-value").unwrap();
    let executable = m.get_one::<String>("blastall-bin").unwrap();
    let format = match m.get_one::<String>("output-format").unwrap().as_str() {
        "json" => OutputFormat::Json,
        _ => OutputFormat::Tsv,
    };
    if executable == "blastall" {
        bird_tool_utils::external_command_checker::check_for_external_command_presence(
            "blastall",
            "which blastall",
        )
        .expect("Failed to find installed blastall");
    }

    let reference = DatabaseReference::from_path(&db, DbType::Nucleotide);
    if !reference.exists() {
        warn!(
            "Database files for {:?} appear incomplete; the search tool may fail",
            db
        );
    }
    let report = Blastn::new()
        .executable(executable)
        .e_value(e_value)
        .run(&reference.path, &query)?;
    write_hits(&report, format, &mut std::io::stdout())?;
    Ok(())
}

fn set_log_level(matches: &ArgMatches) {
    let mut log_level = LevelFilter::Info;
    if matches.get_flag("verbose") {
        log_level = LevelFilter::Debug;
    }
    if matches.get_flag("quiet") {
        log_level = LevelFilter::Error;
    }
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level);
    if env::var("RUST_LOG").is_ok() {
        builder.parse_filters(&env::var("RUST_LOG").unwrap());
    }
    if builder.try_init().is_err() {
        warn!("Failed to initialise the logger - has it been initialised twice?");
    }
}

fn verbose_arg() -> Arg {
    Arg::new("verbose")
        .short('v')
        .long("verbose")
        .help("Print extra debug logging information")
        .action(ArgAction::SetTrue)
}

fn quiet_arg() -> Arg {
    Arg::new("quiet")
        .long("quiet")
        .help("Unless there is an error, do not print logging information")
        .action(ArgAction::SetTrue)
}

fn build_cli() -> Command {
    Command::new("blastkit")
        .version(crate_version!())
        .about("Wrapper for the legacy NCBI BLAST formatdb and blastall command line tools")
        .subcommand(
            Command::new("makedb")
                .about("Format a FASTA file into a searchable database")
                .arg(
                    Arg::new("input-fasta")
                        .short('i')
                        .long("input-fasta")
                        .help("Subject sequences to format into a database")
                        .required(true),
                )
                .arg(
                    Arg::new("working-dir")
                        .short('w')
                        .long("working-dir")
                        .help("Directory the database files are written to [default: next to the input]"),
                )
                .arg(
                    Arg::new("protein")
                        .long("protein")
                        .help("Format a protein database instead of a nucleotide one")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("formatdb-bin")
                        .long("formatdb-bin")
                        .help("Name or path of the database-formatting executable")
                        .default_value("formatdb"),
                )
                .arg(verbose_arg())
                .arg(quiet_arg()),
        )
        .subcommand(
            Command::new("search")
                .about("Search query sequences against a formatted database")
                .arg(
                    Arg::new("db")
                        .short('d')
                        .long("db")
                        .help("Database produced by makedb")
                        .required(true),
                )
                .arg(
                    Arg::new("query-fasta")
                        .short('q')
                        .long("query-fasta")
                        .help("Query sequences to search with")
                        .required(true),
                )
                .arg(
                    Arg::new("e-value")
                        .short('e')
                        .long("e-value")
                        .help("Expectation value cutoff for reported hits")
                        .value_parser(clap::value_parser!(f64))
                        .default_value("10"),
                )
                .arg(
                    Arg::new("output-format")
                        .long("output-format")
                        .help("Print hits as tab-separated lines or a JSON array")
                        .value_parser(["tsv", "json"])
                        .default_value("tsv"),
                )
                .arg(
                    Arg::new("blastall-bin")
                        .long("blastall-bin")
                        .help("Name or path of the search executable")
                        .default_value("blastall"),
                )
                .arg(verbose_arg())
                .arg(quiet_arg()),
        )
}
