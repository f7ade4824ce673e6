use std::error::Error;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use log::info;
use serde::{Deserialize, Serialize};

use crate::run_tool;

/// Configuration for the search tool, `blastall -p blastn`.
#[derive(Clone, Debug)]
pub struct Blastn {
    pub executable: String,
    pub e_value: f64,
}

impl Default for Blastn {
    fn default() -> Self {
        Blastn {
            executable: "blastall".to_string(),
            e_value: 10.0,
        }
    }
}

impl Blastn {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn executable<S: Into<String>>(mut self, executable: S) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn e_value(mut self, e_value: f64) -> Self {
        self.e_value = e_value;
        self
    }

    /// Search `query_fasta` against the database at `db`, returning the
    /// parsed hits. The tool is asked for tabular output with comment
    /// lines (`-m 9`). A missing query file fails before invocation; a
    /// non-zero exit status is surfaced with the captured stderr.
    pub fn run(&self, db: &Path, query_fasta: &Path) -> Result<BlastReport, Box<dyn Error>> {
        if !query_fasta.is_file() {
            return Err(format!("Query FASTA file {:?} was not found", query_fasta).into());
        }
        let query = query_fasta.canonicalize()?;
        let query_str = query
            .to_str()
            .ok_or_else(|| format!("Query path {:?} is not valid UTF-8", query))?;
        let db_str = db
            .to_str()
            .ok_or_else(|| format!("Database path {:?} is not valid UTF-8", db))?;
        let e_value = format!("{:e}", self.e_value);

        let outcome = run_tool(
            &self.executable,
            &[
                "-p", "blastn", "-d", db_str, "-i", query_str, "-m", "9", "-e", &e_value,
            ],
            Path::new("."),
        )?;
        if !outcome.success() {
            return Err(format!(
                "{} exited with status {} when searching {:?} against {:?}: {}",
                self.executable,
                outcome.exit_code,
                query,
                db,
                outcome.stderr.trim()
            )
            .into());
        }
        let report = BlastReport::parse(&outcome.stdout)?;
        info!("Parsed {} hit(s).", report.hits.len());
        Ok(report)
    }
}

/// One line of tabular search output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlastHit {
    pub query_id: String,
    pub subject_id: String,
    pub percent_identity: f64,
    pub alignment_length: u64,
    pub mismatches: u64,
    pub gap_openings: u64,
    pub query_start: u64,
    pub query_end: u64,
    pub subject_start: u64,
    pub subject_end: u64,
    pub e_value: f64,
    pub bit_score: f64,
}

/// All hits of one search invocation, in the order the tool reported them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlastReport {
    pub hits: Vec<BlastHit>,
}

impl BlastReport {
    /// Parse tabular output with comment lines. `#` lines are ignored;
    /// every other line must have the twelve standard columns.
    pub fn parse(text: &str) -> Result<BlastReport, Box<dyn Error>> {
        let mut hits = vec![];
        for line in text.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 12 {
                return Err(format!(
                    "Expected 12 columns but found {} in hit line: {}",
                    fields.len(),
                    line
                )
                .into());
            }
            hits.push(BlastHit {
                query_id: fields[0].to_string(),
                subject_id: fields[1].to_string(),
                percent_identity: parse_field(fields[2], line)?,
                alignment_length: parse_field(fields[3], line)?,
                mismatches: parse_field(fields[4], line)?,
                gap_openings: parse_field(fields[5], line)?,
                query_start: parse_field(fields[6], line)?,
                query_end: parse_field(fields[7], line)?,
                subject_start: parse_field(fields[8], line)?,
                subject_end: parse_field(fields[9], line)?,
                e_value: parse_field(fields[10], line)?,
                bit_score: parse_field(fields[11], line)?,
            });
        }
        Ok(BlastReport { hits })
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Query ids in order of first appearance.
    pub fn query_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = vec![];
        for hit in &self.hits {
            if !ids.contains(&hit.query_id.as_str()) {
                ids.push(&hit.query_id);
            }
        }
        ids
    }

    pub fn hits_for_query(&self, query_id: &str) -> Vec<&BlastHit> {
        self.hits
            .iter()
            .filter(|h| h.query_id == query_id)
            .collect()
    }

    pub fn subject_ids(&self, query_id: &str) -> Vec<&str> {
        self.hits_for_query(query_id)
            .iter()
            .map(|h| h.subject_id.as_str())
            .collect()
    }
}

fn parse_field<T: FromStr>(value: &str, line: &str) -> Result<T, Box<dyn Error>>
where
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| format!("Failed to parse '{}' in hit line '{}': {}", value, line, e).into())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Tsv,
    Json,
}

/// Write hits to the given stream, one line per hit for TSV, or as a
/// single JSON array.
pub fn write_hits(
    report: &BlastReport,
    format: OutputFormat,
    print_stream: &mut dyn std::io::Write,
) -> Result<(), Box<dyn Error>> {
    match format {
        OutputFormat::Tsv => {
            for hit in &report.hits {
                writeln!(
                    print_stream,
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:e}\t{}",
                    hit.query_id,
                    hit.subject_id,
                    hit.percent_identity,
                    hit.alignment_length,
                    hit.mismatches,
                    hit.gap_openings,
                    hit.query_start,
                    hit.query_end,
                    hit.subject_start,
                    hit.subject_end,
                    hit.e_value,
                    hit.bit_score
                )?;
            }
        }
        OutputFormat::Json => {
            writeln!(print_stream, "{}", serde_json::to_string(&report.hits)?)?;
        }
    }
    Ok(())
}
