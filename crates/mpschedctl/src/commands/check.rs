use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use mpsched_lang::{CompileOptions, LoadError};
use mpsched_runtime::{ProgramHandle, Registry, RegistryError};

const PROGRAM_EXTENSION: &str = "progmp";

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub path: String,
    #[serde(flatten)]
    pub outcome: CheckOutcome,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckOutcome {
    Ok { program: ProgramHandle },
    Error { kind: &'static str, message: String },
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, CheckOutcome::Ok { .. })
    }
}

pub fn check(paths: &[String], config: Option<&str>, format: &str) -> anyhow::Result<()> {
    let config = super::load_config(config)?;
    let options = CompileOptions::from(&config.limits);
    let sources = collect_sources(paths)?;
    let reports: Vec<CheckReport> = sources.iter().map(|p| check_file(p, &options)).collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&reports)?),
        _ => {
            for report in &reports {
                println!("{}", format_report(report));
            }
        }
    }

    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} program(s) failed to load", reports.len());
    }
    Ok(())
}

/// Expand directories into the program files beneath them, in path order.
pub fn collect_sources(paths: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for path in paths {
        let path = Path::new(path);
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry?;
                let is_program = entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|e| e == PROGRAM_EXTENSION);
                if is_program {
                    sources.push(entry.into_path());
                }
            }
        } else if path.is_file() {
            sources.push(path.to_path_buf());
        } else {
            anyhow::bail!("no such file or directory: {}", path.display());
        }
    }
    Ok(sources)
}

/// Compile one file in a throwaway registry, so programs that share a
/// name in different files are each checked on their own.
pub fn check_file(path: &Path, options: &CompileOptions) -> CheckReport {
    let outcome = match std::fs::read_to_string(path) {
        Err(e) => CheckOutcome::Error {
            kind: "io",
            message: e.to_string(),
        },
        Ok(source) => {
            let registry = Registry::new(*options, Default::default());
            match registry.load(&source) {
                Ok(program) => CheckOutcome::Ok { program },
                Err(e) => CheckOutcome::Error {
                    kind: error_kind(&e),
                    message: e.to_string(),
                },
            }
        }
    };
    CheckReport {
        path: path.display().to_string(),
        outcome,
    }
}

fn error_kind(err: &RegistryError) -> &'static str {
    match err {
        RegistryError::Load(LoadError::Parse(_)) => "parse",
        RegistryError::Load(LoadError::Validation(_)) => "validation",
        _ => "registry",
    }
}

fn format_report(report: &CheckReport) -> String {
    match &report.outcome {
        CheckOutcome::Ok { program } => {
            let registers = if program.registers.is_empty() {
                "none".to_string()
            } else {
                program
                    .registers
                    .iter()
                    .map(|r| format!("R{r}"))
                    .collect::<Vec<_>>()
                    .join(",")
            };
            format!(
                "✓ {}: {} sha256:{} ({} instructions, registers {})",
                report.path,
                program.name,
                &program.digest[..12],
                program.instructions,
                registers
            )
        }
        CheckOutcome::Error { kind, message } => {
            format!("✗ {}: {kind} error: {message}", report.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn directories_are_walked_for_programs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.progmp", "SCHEDULER b; FALLBACK;");
        write(dir.path(), "nested/a.progmp", "SCHEDULER a; FALLBACK;");
        write(dir.path(), "notes.txt", "not a program");

        let sources = collect_sources(&[dir.path().display().to_string()]).unwrap();
        let names: Vec<_> = sources
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b.progmp", "a.progmp"]);
    }

    #[test]
    fn missing_path_is_an_error() {
        assert!(collect_sources(&["/definitely/not/here".to_string()]).is_err());
    }

    #[test]
    fn reports_classify_errors() {
        let dir = tempfile::tempdir().unwrap();
        let options = CompileOptions::default();

        let ok = check_file(&write(dir.path(), "ok.progmp", "SCHEDULER ok; USES R4; EMIT SUBFLOW[R4];"), &options);
        assert!(ok.is_ok());
        let line = format_report(&ok);
        assert!(line.starts_with("✓"));
        assert!(line.contains("registers R4"));

        let parse = check_file(&write(dir.path(), "p.progmp", "SCHEDULER ;"), &options);
        assert!(matches!(parse.outcome, CheckOutcome::Error { kind: "parse", .. }));

        let invalid = check_file(&write(dir.path(), "v.progmp", "SCHEDULER v; VAR x = 1;"), &options);
        assert!(matches!(invalid.outcome, CheckOutcome::Error { kind: "validation", .. }));

        let missing = check_file(&dir.path().join("gone.progmp"), &options);
        assert!(matches!(missing.outcome, CheckOutcome::Error { kind: "io", .. }));
    }

    #[test]
    fn json_report_shape() {
        let dir = tempfile::tempdir().unwrap();
        let report = check_file(
            &write(dir.path(), "x.progmp", "SCHEDULER x; FALLBACK;"),
            &CompileOptions::default(),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["program"]["name"], "x");
        assert_eq!(json["program"]["version"], 1);
    }

    #[test]
    fn demo_programs_are_valid() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/programs");
        let sources = collect_sources(&[dir.display().to_string()]).unwrap();
        assert_eq!(sources.len(), 4);
        for path in &sources {
            let report = check_file(path, &CompileOptions::default());
            assert!(report.is_ok(), "{}", format_report(&report));
        }
    }
}
