use std::error::Error;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info};
use needletail::{parse_fastx_file, parse_fastx_reader};

use crate::run_tool;

/// Molecule type of the database being formatted. Picks the `-p` flag and
/// the first letter of the auxiliary file extensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbType {
    Nucleotide,
    Protein,
}

impl DbType {
    fn formatdb_flag(&self) -> &'static str {
        match self {
            DbType::Nucleotide => "F",
            DbType::Protein => "T",
        }
    }

    fn extension_prefix(&self) -> char {
        match self {
            DbType::Nucleotide => 'n',
            DbType::Protein => 'p',
        }
    }
}

/// The fixed set of files formatdb leaves behind when run with SeqId
/// parsing (`-o T`) enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DbFileKind {
    Log,
    Headers,
    Index,
    SeqIdData,
    SeqIdIndex,
    SequenceData,
}

impl DbFileKind {
    pub const ALL: [DbFileKind; 6] = [
        DbFileKind::Log,
        DbFileKind::Headers,
        DbFileKind::Index,
        DbFileKind::SeqIdData,
        DbFileKind::SeqIdIndex,
        DbFileKind::SequenceData,
    ];

    pub fn extension(&self, db_type: DbType) -> String {
        let prefix = db_type.extension_prefix();
        match self {
            DbFileKind::Log => "log".to_string(),
            DbFileKind::Headers => format!("{}hr", prefix),
            DbFileKind::Index => format!("{}in", prefix),
            DbFileKind::SeqIdData => format!("{}sd", prefix),
            DbFileKind::SeqIdIndex => format!("{}si", prefix),
            DbFileKind::SequenceData => format!("{}sq", prefix),
        }
    }
}

/// Per-invocation configuration for the database-formatting tool. The
/// working directory is where the auxiliary files end up.
#[derive(Clone, Debug)]
pub struct FormatDb {
    pub working_dir: PathBuf,
    pub db_type: DbType,
    pub executable: String,
}

impl FormatDb {
    pub fn new<P: Into<PathBuf>>(working_dir: P) -> Self {
        FormatDb {
            working_dir: working_dir.into(),
            db_type: DbType::Nucleotide,
            executable: "formatdb".to_string(),
        }
    }

    pub fn db_type(mut self, db_type: DbType) -> Self {
        self.db_type = db_type;
        self
    }

    pub fn executable<S: Into<String>>(mut self, executable: S) -> Self {
        self.executable = executable.into();
        self
    }

    /// Format `input_fasta` into a searchable database. The tool runs in
    /// the configured working directory and its files land there as
    /// `<input_basename>.<ext>`.
    ///
    /// A missing input file fails before anything is spawned. A non-zero
    /// exit status is an error carrying the captured stderr; it is not
    /// retried.
    pub fn run(&self, input_fasta: &Path) -> Result<FormatDbResult, Box<dyn Error>> {
        if !input_fasta.is_file() {
            return Err(format!("Input FASTA file {:?} was not found", input_fasta).into());
        }
        let input = input_fasta.canonicalize()?;
        let input_str = input
            .to_str()
            .ok_or_else(|| format!("Input path {:?} is not valid UTF-8", input))?;
        let basename = input
            .file_name()
            .ok_or_else(|| format!("Input path {:?} has no file name", input))?
            .to_string_lossy()
            .to_string();
        let log_name = format!("{}.log", basename);

        let start = Instant::now();
        let outcome = run_tool(
            &self.executable,
            &[
                "-p",
                self.db_type.formatdb_flag(),
                "-o",
                "T",
                "-i",
                input_str,
                "-l",
                &log_name,
            ],
            &self.working_dir,
        )?;
        if !outcome.success() {
            return Err(format!(
                "{} exited with status {} when formatting {:?}: {}",
                self.executable,
                outcome.exit_code,
                input,
                outcome.stderr.trim()
            )
            .into());
        }
        info!(
            "Formatted database in {} second(s).",
            start.elapsed().as_secs()
        );

        let mut files = Vec::with_capacity(DbFileKind::ALL.len());
        for kind in DbFileKind::ALL {
            let path = self
                .working_dir
                .join(format!("{}.{}", basename, kind.extension(self.db_type)));
            let handle = File::open(&path).map_err(|e| {
                format!(
                    "Expected database file {:?} was not produced by {}: {}",
                    path, self.executable, e
                )
            })?;
            files.push(DbFile { kind, path, handle });
        }
        Ok(FormatDbResult {
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            files,
        })
    }
}

/// One database file, held open from process completion until cleanup.
#[derive(Debug)]
pub struct DbFile {
    pub kind: DbFileKind,
    pub path: PathBuf,
    pub handle: File,
}

/// A completed, successful formatdb invocation: the captured process
/// output plus open handles to the full expected file set.
#[derive(Debug)]
pub struct FormatDbResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub files: Vec<DbFile>,
}

impl FormatDbResult {
    pub fn file(&self, kind: DbFileKind) -> Option<&DbFile> {
        self.files.iter().find(|f| f.kind == kind)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Close all handles and delete the files this invocation created.
    /// Files that are already gone are not an error.
    pub fn cleanup(self) -> Result<(), Box<dyn Error>> {
        for file in self.files {
            drop(file.handle);
            remove_file_tolerant(&file.path)?;
        }
        Ok(())
    }
}

/// A formatted database: the path search tools are pointed at, plus the
/// auxiliary files that actually hold the index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseReference {
    pub path: PathBuf,
    pub files: Vec<PathBuf>,
}

impl DatabaseReference {
    /// Reference an existing database. The path is taken as given.
    pub fn from_path(path: &Path, db_type: DbType) -> Self {
        DatabaseReference {
            path: path.to_path_buf(),
            files: db_aux_paths(path, db_type),
        }
    }

    pub fn exists(&self) -> bool {
        self.files.iter().all(|f| f.exists())
    }

    /// Delete the database files, tolerating ones that are already gone.
    pub fn remove(&self) -> Result<(), Box<dyn Error>> {
        for path in &self.files {
            remove_file_tolerant(path)?;
        }
        Ok(())
    }
}

/// The auxiliary paths a database at `db_path` is made of. Deterministic
/// in the database path and type.
pub fn db_aux_paths(db_path: &Path, db_type: DbType) -> Vec<PathBuf> {
    DbFileKind::ALL
        .iter()
        .map(|kind| PathBuf::from(format!("{}.{}", db_path.display(), kind.extension(db_type))))
        .collect()
}

/// Format the FASTA file at `fasta` in place (or under `output_dir` when
/// given) and return a reference to the new database. When no output
/// directory is given the returned path is the input path, unchanged.
pub fn index_fasta_path(
    fasta: &Path,
    output_dir: Option<&Path>,
    db_type: DbType,
    executable: &str,
) -> Result<DatabaseReference, Box<dyn Error>> {
    let mut reader = parse_fastx_file(fasta)
        .map_err(|e| format!("Failed to open FASTA file {:?}: {}", fasta, e))?;
    let mut num_seqs: u64 = 0;
    while let Some(record) = reader.next() {
        record.map_err(|e| format!("Failed to parse FASTA file {:?}: {}", fasta, e))?;
        num_seqs += 1;
    }
    if num_seqs == 0 {
        return Err(format!("No sequences found in FASTA file {:?}", fasta).into());
    }
    info!("Read in {} sequences.", num_seqs);

    let basename = fasta
        .file_name()
        .ok_or_else(|| format!("Input path {:?} has no file name", fasta))?;
    let (working_dir, db_path) = match output_dir {
        Some(dir) => (dir.to_path_buf(), dir.join(basename)),
        None => {
            let parent = match fasta.parent() {
                Some(parent) if parent != Path::new("") => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            (parent, fasta.to_path_buf())
        }
    };

    let result = FormatDb::new(&working_dir)
        .db_type(db_type)
        .executable(executable)
        .run(fasta)?;
    debug!("formatdb wrote {} database files", result.files.len());

    Ok(DatabaseReference {
        path: db_path.clone(),
        files: db_aux_paths(&db_path, db_type),
    })
}

/// Write named sequences to a fresh `blastkit_db*.fasta` file under
/// `output_dir` and format that. The FASTA itself is part of the
/// removable file set of the returned reference.
pub fn index_sequences<'a, I>(
    seqs: I,
    output_dir: &Path,
    db_type: DbType,
    executable: &str,
) -> Result<DatabaseReference, Box<dyn Error>>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let (mut fasta_file, fasta_path) = named_db_fasta(output_dir)?;
    let mut num_seqs: u64 = 0;
    for (id, seq) in seqs {
        writeln!(fasta_file, ">{}", id)?;
        writeln!(fasta_file, "{}", seq)?;
        num_seqs += 1;
    }
    fasta_file.flush()?;
    drop(fasta_file);
    if num_seqs == 0 {
        remove_file_tolerant(&fasta_path)?;
        return Err("No sequences were provided to index".into());
    }
    debug!("Wrote {} sequences to {:?}", num_seqs, fasta_path);

    let mut reference = index_fasta_path(&fasta_path, None, db_type, executable)?;
    reference.files.push(fasta_path);
    Ok(reference)
}

/// Copy FASTA records from an open reader into a fresh database FASTA
/// under `output_dir` and format that.
pub fn index_fasta_reader<R>(
    reader: R,
    output_dir: &Path,
    db_type: DbType,
    executable: &str,
) -> Result<DatabaseReference, Box<dyn Error>>
where
    R: std::io::Read + Send + 'static,
{
    let mut fastx =
        parse_fastx_reader(reader).map_err(|e| format!("Failed to parse FASTA input: {}", e))?;
    let (mut fasta_file, fasta_path) = named_db_fasta(output_dir)?;
    let mut num_seqs: u64 = 0;
    while let Some(record) = fastx.next() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                remove_file_tolerant(&fasta_path)?;
                return Err(format!("Failed to parse FASTA input: {}", e).into());
            }
        };
        fasta_file.write_all(b">")?;
        fasta_file.write_all(record.id())?;
        fasta_file.write_all(b"\n")?;
        fasta_file.write_all(&record.seq())?;
        fasta_file.write_all(b"\n")?;
        num_seqs += 1;
    }
    fasta_file.flush()?;
    drop(fasta_file);
    if num_seqs == 0 {
        remove_file_tolerant(&fasta_path)?;
        return Err("No sequences found in FASTA input".into());
    }
    debug!("Copied {} sequences into {:?}", num_seqs, fasta_path);

    let mut reference = index_fasta_path(&fasta_path, None, db_type, executable)?;
    reference.files.push(fasta_path);
    Ok(reference)
}

fn named_db_fasta(output_dir: &Path) -> Result<(File, PathBuf), Box<dyn Error>> {
    let temp = tempfile::Builder::new()
        .prefix("blastkit_db")
        .suffix(".fasta")
        .tempfile_in(output_dir)
        .map_err(|e| format!("Failed to create database FASTA in {:?}: {}", output_dir, e))?;
    let (file, path) = temp
        .keep()
        .map_err(|e| format!("Failed to keep database FASTA: {}", e))?;
    Ok((file, path))
}

fn remove_file_tolerant(path: &Path) -> Result<(), Box<dyn Error>> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(format!("Failed to remove {:?}: {}", path, e).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_mock_formatdb(dir: &Path) -> PathBuf {
        let path = dir.join("mock_formatdb");
        let script = "#!/bin/sh\n\
                      prefix=n\n\
                      input=\"\"\n\
                      logfile=formatdb.log\n\
                      while [ \"$#\" -gt 0 ]; do\n\
                      case \"$1\" in\n\
                      -i) input=\"$2\"; shift ;;\n\
                      -l) logfile=\"$2\"; shift ;;\n\
                      -p) if [ \"$2\" = \"T\" ]; then prefix=p; fi; shift ;;\n\
                      esac\n\
                      shift\n\
                      done\n\
                      base=$(basename \"$input\")\n\
                      for suffix in hr in sd si sq; do printf mock > \"$base.$prefix$suffix\"; done\n\
                      printf 'mock formatdb log\\n' > \"$logfile\"\n\
                      printf 'mock formatdb stdout\\n'\n";
        fs::write(&path, script).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn write_failing_formatdb(dir: &Path) -> PathBuf {
        let path = dir.join("mock_formatdb_fail");
        fs::write(&path, "#!/bin/sh\nprintf 'kaboom\\n' >&2\nexit 2\n").unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn write_test_fasta(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, ">r1\nGATTACAGATTACA\n>r2\nACGTACGTACGTAA\n").unwrap();
        path
    }

    #[test]
    fn test_run_produces_expected_file_set() {
        let dir = TempDir::new().unwrap();
        let mock = write_mock_formatdb(dir.path());
        let fasta = write_test_fasta(dir.path(), "seqs.fasta");

        let result = FormatDb::new(dir.path())
            .executable(mock.to_str().unwrap())
            .run(&fasta)
            .unwrap();
        assert_eq!(0, result.exit_code);
        assert_eq!("mock formatdb stdout\n", result.stdout);
        assert_eq!("", result.stderr);
        assert_eq!(6, result.files.len());
        for kind in DbFileKind::ALL {
            let expected = dir
                .path()
                .join(format!("seqs.fasta.{}", kind.extension(DbType::Nucleotide)));
            assert!(expected.exists(), "{:?} was not produced", expected);
            assert_eq!(expected, result.file(kind).unwrap().path);
        }
    }

    #[test]
    fn test_protein_databases_use_p_extensions() {
        let dir = TempDir::new().unwrap();
        let mock = write_mock_formatdb(dir.path());
        let fasta = write_test_fasta(dir.path(), "prots.fasta");

        let result = FormatDb::new(dir.path())
            .db_type(DbType::Protein)
            .executable(mock.to_str().unwrap())
            .run(&fasta)
            .unwrap();
        assert!(dir.path().join("prots.fasta.phr").exists());
        assert!(dir.path().join("prots.fasta.psq").exists());
        assert!(!dir.path().join("prots.fasta.nhr").exists());
        assert_eq!(
            dir.path().join("prots.fasta.log"),
            result.file(DbFileKind::Log).unwrap().path
        );
        result.cleanup().unwrap();
    }

    #[test]
    fn test_cleanup_removes_all_files_and_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        let mock = write_mock_formatdb(dir.path());
        let fasta = write_test_fasta(dir.path(), "seqs.fasta");

        let result = FormatDb::new(dir.path())
            .executable(mock.to_str().unwrap())
            .run(&fasta)
            .unwrap();
        let paths = result.paths();
        // One file disappearing early must not break cleanup of the rest.
        fs::remove_file(&paths[0]).unwrap();
        result.cleanup().unwrap();
        for path in paths {
            assert!(!path.exists(), "{:?} was not cleaned up", path);
        }
        assert!(fasta.exists());
    }

    #[test]
    fn test_missing_input_fails_before_invocation() {
        let dir = TempDir::new().unwrap();
        let mock = write_mock_formatdb(dir.path());

        let err = FormatDb::new(dir.path())
            .executable(mock.to_str().unwrap())
            .run(&dir.path().join("nope.fasta"))
            .unwrap_err();
        assert!(format!("{}", err).contains("was not found"));
        assert!(!dir.path().join("nope.fasta.nhr").exists());
    }

    #[test]
    fn test_nonzero_exit_surfaces_stderr() {
        let dir = TempDir::new().unwrap();
        let mock = write_failing_formatdb(dir.path());
        let fasta = write_test_fasta(dir.path(), "seqs.fasta");

        let err = FormatDb::new(dir.path())
            .executable(mock.to_str().unwrap())
            .run(&fasta)
            .unwrap_err();
        let msg = format!("{}", err);
        assert!(msg.contains("exited with status 2"), "got: {}", msg);
        assert!(msg.contains("kaboom"), "got: {}", msg);
    }

    #[test]
    fn test_db_aux_paths_are_deterministic() {
        let paths = db_aux_paths(Path::new("/data/seqs.fasta"), DbType::Nucleotide);
        let expected: Vec<String> = ["log", "nhr", "nin", "nsd", "nsi", "nsq"]
            .iter()
            .map(|ext| format!("/data/seqs.fasta.{}", ext))
            .collect();
        let got: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        assert_eq!(expected, got);
    }

    #[test]
    fn test_reference_from_path_keeps_path_unchanged() {
        let path = Path::new("/data/seqs.fasta");
        let reference = DatabaseReference::from_path(path, DbType::Nucleotide);
        assert_eq!(path, reference.path);
        assert!(!reference.exists());
    }

    #[test]
    fn test_index_fasta_path_reference_is_input_path() {
        let dir = TempDir::new().unwrap();
        let mock = write_mock_formatdb(dir.path());
        let fasta = write_test_fasta(dir.path(), "seqs.fasta");

        let reference =
            index_fasta_path(&fasta, None, DbType::Nucleotide, mock.to_str().unwrap()).unwrap();
        assert_eq!(fasta, reference.path);
        assert_eq!(db_aux_paths(&fasta, DbType::Nucleotide), reference.files);
        assert!(reference.exists());

        reference.remove().unwrap();
        for file in &reference.files {
            assert!(!file.exists(), "{:?} was not removed", file);
        }
        // Removing an already-removed database is fine.
        reference.remove().unwrap();
        assert!(fasta.exists());
    }

    #[test]
    fn test_index_fasta_path_with_output_dir() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let mock = write_mock_formatdb(dir.path());
        let fasta = write_test_fasta(dir.path(), "seqs.fasta");

        let reference = index_fasta_path(
            &fasta,
            Some(out.path()),
            DbType::Nucleotide,
            mock.to_str().unwrap(),
        )
        .unwrap();
        assert_eq!(out.path().join("seqs.fasta"), reference.path);
        assert!(reference.exists());
        assert!(out.path().join("seqs.fasta.nsq").exists());
        assert!(!dir.path().join("seqs.fasta.nsq").exists());
    }

    #[test]
    fn test_index_fasta_path_rejects_empty_fasta() {
        let dir = TempDir::new().unwrap();
        let mock = write_mock_formatdb(dir.path());
        let fasta = dir.path().join("empty.fasta");
        fs::write(&fasta, "").unwrap();

        let res = index_fasta_path(&fasta, None, DbType::Nucleotide, mock.to_str().unwrap());
        assert!(res.is_err());
        assert!(!dir.path().join("empty.fasta.nhr").exists());
    }

    #[test]
    fn test_index_sequences() {
        let dir = TempDir::new().unwrap();
        let mock = write_mock_formatdb(dir.path());

        let reference = index_sequences(
            vec![("s1", "GATTACAGATTACA"), ("s2", "ACGTACGTACGTAA")],
            dir.path(),
            DbType::Nucleotide,
            mock.to_str().unwrap(),
        )
        .unwrap();
        let name = reference.path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("blastkit_db"), "got {}", name);
        assert!(name.ends_with(".fasta"), "got {}", name);
        assert!(reference.path.starts_with(dir.path()));
        assert_eq!(
            ">s1\nGATTACAGATTACA\n>s2\nACGTACGTACGTAA\n",
            fs::read_to_string(&reference.path).unwrap()
        );
        // Six database files plus the written FASTA itself.
        assert_eq!(7, reference.files.len());
        for file in &reference.files {
            assert!(file.exists());
        }

        reference.remove().unwrap();
        assert!(!reference.path.exists());
    }

    #[test]
    fn test_index_sequences_rejects_empty_input() {
        let dir = TempDir::new().unwrap();
        let mock = write_mock_formatdb(dir.path());

        let res = index_sequences(
            Vec::<(&str, &str)>::new(),
            dir.path(),
            DbType::Nucleotide,
            mock.to_str().unwrap(),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_index_fasta_reader() {
        let dir = TempDir::new().unwrap();
        let mock = write_mock_formatdb(dir.path());
        let fasta = write_test_fasta(dir.path(), "seqs.fasta");

        let reference = index_fasta_reader(
            File::open(&fasta).unwrap(),
            dir.path(),
            DbType::Nucleotide,
            mock.to_str().unwrap(),
        )
        .unwrap();
        assert_ne!(fasta, reference.path);
        assert_eq!(
            ">r1\nGATTACAGATTACA\n>r2\nACGTACGTACGTAA\n",
            fs::read_to_string(&reference.path).unwrap()
        );
        assert_eq!(7, reference.files.len());

        reference.remove().unwrap();
        for file in &reference.files {
            assert!(!file.exists());
        }
    }
}
