//! Anonymizer - policy-driven event anonymization
//!
//! The main entry point for anon-core, handling:
//! - Streaming anonymization of alarm events
//! - Policy table validation
//! - Per-event triple resolution for debugging policies
//! - Audit log verification

use anon_core::audit::{verify_log, AuditContext, AuditError, AuditLog};
use anon_core::config::{
    load_config, load_policy_file, ConfigError, ConfigOptions, OutputFormat, PseudonymChoice,
};
use anon_core::exit_codes::ExitCode;
use anon_core::ingest::{
    process_parallel, AuditSink, CountingAcknowledger, EventSink, EventSource, IngestError,
    OutputSink,
};
use anon_core::logging::{generate_run_id, init_logging, LogConfig, LogFormat, LogLevel};
use anon_redact::{
    AnonError, Event, PolicyStore, PseudonymStrategy, Pseudonymizer, RedactionEngine, Scope,
};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Anonymizer - rewrites sensitive fields of alarm events according to a policy table
#[derive(Parser)]
#[command(name = "anon-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Service configuration file (TOML)
    #[arg(long, global = true, env = "ANON_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format on stderr (human or jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Anonymize a stream of events (JSON Lines)
    Run(RunArgs),

    /// Load, validate and compile a policy table
    Check(CheckArgs),

    /// Show the redaction triples that would apply to one event
    Resolve(ResolveArgs),

    /// Verify the hash chain of an audit log
    VerifyAudit(VerifyAuditArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Policy table (JSON)
    #[arg(long)]
    policies: Option<PathBuf>,

    /// Organization scope, or "all"
    #[arg(long)]
    scope: Option<String>,

    /// Input file (default: stdin)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output file (default: stdout)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Audit log location
    #[arg(long, conflicts_with = "no_audit")]
    audit_log: Option<PathBuf>,

    /// Do not write an audit log
    #[arg(long)]
    no_audit: bool,

    /// Output document format
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Pseudonym strategy for organizations
    #[arg(long, value_enum)]
    pseudonym: Option<PseudonymChoice>,

    /// Worker threads
    #[arg(long, short = 'j')]
    jobs: Option<usize>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Policy table (JSON)
    #[arg(long)]
    policies: PathBuf,
}

#[derive(Args, Debug)]
struct ResolveArgs {
    /// Policy table (JSON)
    #[arg(long)]
    policies: PathBuf,

    /// Organization scope, or "all"
    #[arg(long)]
    scope: String,

    /// Event file (bare event or AlarmEvent envelope)
    #[arg(long)]
    event: PathBuf,

    /// Pseudonym strategy for organizations
    #[arg(long, value_enum)]
    pseudonym: Option<PseudonymChoice>,
}

#[derive(Args, Debug)]
struct VerifyAuditArgs {
    /// Audit log file
    file: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    let cli_level = LogLevel::from_verbosity(cli.global.quiet, cli.global.verbose);
    init_logging(&LogConfig::from_env(cli_level, cli.global.log_format));

    let exit_code = match &cli.command {
        Commands::Run(args) => run_anonymize(&cli.global, args),
        Commands::Check(args) => run_check(args),
        Commands::Resolve(args) => run_resolve(args),
        Commands::VerifyAudit(args) => run_verify_audit(args),
    };

    std::process::exit(exit_code.as_i32());
}

fn run_anonymize(global: &GlobalOpts, args: &RunArgs) -> ExitCode {
    let options = ConfigOptions {
        config_path: global.config.clone(),
        policies: args.policies.clone(),
        scope: args.scope.clone(),
        pseudonym: args.pseudonym,
        audit_log: args.audit_log.clone(),
        no_audit: args.no_audit,
        format: args.format,
        jobs: args.jobs,
    };

    let config = match load_config(&options) {
        Ok(config) => config,
        Err(e) => return output_error("run", &e, config_exit_code(&e)),
    };

    let run_id = generate_run_id();
    let snapshot = config.snapshot();
    info!(
        run_id = %run_id,
        scope = %snapshot.scope,
        policies = snapshot.policy_count,
        policy_hash = %snapshot.policies_hash,
        pseudonym = %snapshot.pseudonym,
        format = %snapshot.output_format,
        jobs = snapshot.jobs,
        "starting anonymization run"
    );

    let engine = match RedactionEngine::new(config.table, Pseudonymizer::new(config.pseudonym)) {
        Ok(engine) => Arc::new(engine),
        Err(e) => return output_error("run", &e, anon_exit_code(&e)),
    };

    let source = match &args.input {
        Some(path) => match EventSource::open(path) {
            Ok(source) => source,
            Err(e) => return output_error("run", &e, ingest_exit_code(&e)),
        },
        None => EventSource::stdin(),
    };

    let writer: Box<dyn Write> = match &args.output {
        Some(path) => match File::create(path) {
            Ok(file) => Box::new(BufWriter::new(file)),
            Err(e) => {
                let message = format!("failed to create {}: {}", path.display(), e);
                return output_error("run", &message, ExitCode::IoError);
            }
        },
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    let mut output = OutputSink::new(writer, config.output_format);

    let mut audit = match &config.audit_path {
        Some(path) => match AuditLog::open(path.as_path()) {
            Ok(log) => {
                let ctx = AuditContext::new(run_id.clone(), config.scope.to_string())
                    .with_policy_hash(config.policies_hash.clone());
                Some(AuditSink::new(log, ctx))
            }
            Err(e) => return output_error("run", &e, audit_exit_code(&e)),
        },
        None => None,
    };

    let mut sinks: Vec<&mut dyn EventSink> = Vec::with_capacity(2);
    sinks.push(&mut output);
    if let Some(audit) = audit.as_mut() {
        sinks.push(audit);
    }

    let mut ack = CountingAcknowledger::new();
    match process_parallel(engine, &config.scope, source, config.jobs, &mut sinks, &mut ack) {
        Ok(summary) => {
            info!(
                run_id = %run_id,
                anonymized = summary.anonymized,
                rejected = summary.rejected,
                "anonymization run complete"
            );
            if ack.has_rejections() {
                ExitCode::PartialReject
            } else {
                ExitCode::Clean
            }
        }
        Err(e) => output_error("run", &e, ingest_exit_code(&e)),
    }
}

fn run_check(args: &CheckArgs) -> ExitCode {
    let (table, hash) = match load_policy_file(&args.policies) {
        Ok(loaded) => loaded,
        Err(e) => return output_error("check", &e, config_exit_code(&e)),
    };

    let names: Vec<String> = table.names().into_iter().map(str::to_string).collect();
    let store = match PolicyStore::new(table) {
        Ok(store) => store,
        Err(e) => return output_error("check", &e, anon_exit_code(&e)),
    };

    print_json(&json!({
        "status": "ok",
        "policies_path": args.policies,
        "policy_hash": hash,
        "policy_count": store.len(),
        "policies": names,
    }));
    ExitCode::Clean
}

fn run_resolve(args: &ResolveArgs) -> ExitCode {
    let (table, _) = match load_policy_file(&args.policies) {
        Ok(loaded) => loaded,
        Err(e) => return output_error("resolve", &e, config_exit_code(&e)),
    };

    let strategy = args
        .pseudonym
        .map(PseudonymChoice::strategy)
        .unwrap_or_else(PseudonymStrategy::default);
    let engine = match RedactionEngine::new(table, Pseudonymizer::new(strategy)) {
        Ok(engine) => engine,
        Err(e) => return output_error("resolve", &e, anon_exit_code(&e)),
    };

    let content = match std::fs::read_to_string(&args.event) {
        Ok(content) => content,
        Err(e) => {
            let message = format!("failed to read {}: {}", args.event.display(), e);
            return output_error("resolve", &message, ExitCode::IoError);
        }
    };
    let event = match serde_json::from_str(&content).and_then(Event::unwrap_envelope) {
        Ok(event) => event,
        Err(e) => {
            let message = format!("malformed event in {}: {}", args.event.display(), e);
            return output_error("resolve", &message, ExitCode::ArgsError);
        }
    };

    let scope = Scope::parse(&args.scope);
    let triples = engine.resolve(&event, &scope);

    print_json(&json!({
        "status": "ok",
        "scope": scope.to_string(),
        "organization": event.organization(),
        "triples": triples,
    }));
    ExitCode::Clean
}

fn run_verify_audit(args: &VerifyAuditArgs) -> ExitCode {
    match verify_log(&args.file) {
        Ok(result) => {
            let is_valid = result.is_valid;
            let status = if is_valid { "ok" } else { "tampered" };
            print_json(&json!({
                "status": status,
                "path": args.file,
                "result": result,
            }));
            if is_valid {
                ExitCode::Clean
            } else {
                ExitCode::AuditIntegrityError
            }
        }
        Err(e) => output_error("verify-audit", &e, audit_exit_code(&e)),
    }
}

fn config_exit_code(error: &ConfigError) -> ExitCode {
    if error.is_policy_error() {
        return ExitCode::PolicyError;
    }
    match error {
        ConfigError::Missing { .. } => ExitCode::ArgsError,
        ConfigError::Io { .. } | ConfigError::Policy { .. } => ExitCode::IoError,
        ConfigError::NotFound { .. } | ConfigError::Parse { .. } | ConfigError::AuditPath(_) => {
            ExitCode::ConfigError
        }
    }
}

fn anon_exit_code(error: &AnonError) -> ExitCode {
    match error {
        AnonError::Io(_) => ExitCode::IoError,
        AnonError::Json(_) | AnonError::Configuration { .. } | AnonError::PolicyCompilation { .. } => {
            ExitCode::PolicyError
        }
    }
}

fn audit_exit_code(error: &AuditError) -> ExitCode {
    match error {
        AuditError::Parse { .. } => ExitCode::AuditIntegrityError,
        AuditError::DataDirUnavailable => ExitCode::ConfigError,
        AuditError::Io { .. } => ExitCode::IoError,
        AuditError::Serialization { .. } => ExitCode::InternalError,
    }
}

fn ingest_exit_code(error: &IngestError) -> ExitCode {
    match error {
        IngestError::Serialization(_) => ExitCode::InternalError,
        IngestError::Audit(e) => audit_exit_code(e),
        IngestError::Open { .. } | IngestError::Read { .. } | IngestError::Write(_) => {
            ExitCode::IoError
        }
    }
}

fn output_error(command: &str, error: &dyn std::fmt::Display, exit_code: ExitCode) -> ExitCode {
    let response = json!({
        "status": "error",
        "command": command,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "error": {
            "code": exit_code.as_i32(),
            "kind": exit_code.code_name(),
            "message": error.to_string(),
        }
    });
    match serde_json::to_string_pretty(&response) {
        Ok(text) => eprintln!("{}", text),
        Err(_) => eprintln!("{} failed: {}", command, error),
    }
    exit_code
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to render output: {}", e),
    }
}
