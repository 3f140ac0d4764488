use anyhow::{anyhow, Result};
use clap::Args;
use std::path::Path;
use tidemark::database::ensure_data_dir;
use tidemark::{
    MigrationError, MigrationPlan, Migrator, OutputFormat, RestoreRequest, Script, ScriptKind,
    TidemarkConfig,
};

/// Arguments for the Migrate command
#[derive(Args)]
pub struct MigrateArgs {
    /// One-time script, or a directory of them (repeatable)
    #[clap(long, value_name = "PATH")]
    pub up: Vec<String>,

    /// Script that runs when new or changed, or a directory of them (repeatable)
    #[clap(long, value_name = "PATH")]
    pub anytime: Vec<String>,

    /// Script that runs on every migration, or a directory of them (repeatable)
    #[clap(long, value_name = "PATH")]
    pub everytime: Vec<String>,

    /// Version label recorded for this run; keeps the current version when omitted
    #[clap(long = "version", value_name = "LABEL", default_value = "")]
    pub version_label: String,

    /// Script repository the version belongs to, defaults to the configured one
    #[clap(long)]
    pub repository_path: Option<String>,

    /// Run scripts without a wrapping transaction
    #[clap(long)]
    pub no_transaction: bool,

    /// Create the database before migrating
    #[clap(long)]
    pub create: bool,

    /// Custom script used to create the database
    #[clap(long, value_name = "FILE", requires = "create")]
    pub create_script: Option<String>,

    /// Switch the database to simple recovery before migrating
    #[clap(long)]
    pub simple: bool,

    /// Back the database up into this directory before migrating
    #[clap(long, value_name = "DIR")]
    pub backup: Option<String>,

    /// Restore the database from this backup before migrating
    #[clap(long, value_name = "FILE")]
    pub restore: Option<String>,

    /// Extra provider options appended to the restore command
    #[clap(long, default_value = "", requires = "restore")]
    pub restore_options: String,

    /// Drop the database before migrating
    ///
    /// Fails the run on providers without a drop facility, such as SQLite;
    /// remove the database file instead.
    #[clap(long)]
    pub drop: bool,
}

pub fn run(config: &TidemarkConfig, args: MigrateArgs, output_format: OutputFormat) {
    let plan = match build_plan(config, args) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    if plan.scripts.is_empty() {
        eprintln!("No scripts given, only recording the version");
    }

    let mut db = super::open_database(config);
    let report = match Migrator::new(&mut db).run(&plan) {
        Ok(report) => report,
        Err(e) => {
            match e.downcast_ref::<MigrationError>() {
                Some(MigrationError::ScriptFailed {
                    transient: true, ..
                }) => eprintln!(
                    "ERROR: {}\nThe connection failed rather than the script, rerunning may succeed",
                    e
                ),
                _ => eprintln!("ERROR: {}", e),
            }
            std::process::exit(1);
        }
    };

    if super::print_json(&report, output_format) {
        return;
    }

    println!(
        "Migrated {} from version {} to {} (version id {})",
        config.database_name, report.previous_version, report.new_version, report.version_id
    );
    if report.database_created {
        println!("Created database {}", config.database_name);
    }
    if !report.transactional {
        println!("Scripts ran without a transaction");
    }
    println!("Run ({}):", report.scripts_run.len());
    for name in &report.scripts_run {
        println!("  {}", name);
    }
    println!("Skipped ({}):", report.scripts_skipped.len());
    for name in &report.scripts_skipped {
        println!("  {}", name);
    }
}

fn build_plan(config: &TidemarkConfig, args: MigrateArgs) -> Result<MigrationPlan> {
    let MigrateArgs {
        up,
        anytime,
        everytime,
        version_label,
        repository_path,
        no_transaction,
        create,
        create_script,
        simple,
        backup,
        restore,
        restore_options,
        drop,
    } = args;

    let mut scripts = load_scripts(&up, ScriptKind::RunOnce)?;
    scripts.extend(load_scripts(&anytime, ScriptKind::AnyTime)?);
    scripts.extend(load_scripts(&everytime, ScriptKind::EveryTime)?);

    let create_database_script = match create_script {
        Some(path) => std::fs::read_to_string(&path)
            .map_err(|e| anyhow!("Failed to read create script '{}': {}", path, e))?,
        None => String::new(),
    };

    if let Some(dir) = &backup {
        ensure_data_dir(dir)?;
    }

    Ok(MigrationPlan {
        scripts,
        version: version_label,
        repository_path: repository_path.unwrap_or_else(|| config.repository_path.clone()),
        use_transaction: !no_transaction,
        drop_database: drop,
        create_database: create,
        create_database_script,
        recovery_mode: simple.then_some(true),
        backup_dir: backup,
        restore: restore.map(|path| RestoreRequest {
            path,
            options: restore_options,
        }),
    })
}

/// Load scripts in the order given; directories contribute their `.sql` files sorted by name
fn load_scripts(paths: &[String], kind: ScriptKind) -> Result<Vec<Script>> {
    let mut scripts = vec![];
    for path in paths {
        if !Path::new(path).is_dir() {
            scripts.push(Script::from_file(path, kind)?);
            continue;
        }

        let mut files: Vec<String> = std::fs::read_dir(path)
            .map_err(|e| anyhow!("Failed to read script directory '{}': {}", path, e))?
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
            })
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        files.sort();

        for file in files {
            scripts.push(Script::from_file(&file, kind)?);
        }
    }
    Ok(scripts)
}
