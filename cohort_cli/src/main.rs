use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use cohort_core::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cohortctl")]
#[command(about = "Temporal patient cohort management", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use a specific config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// User recorded on void/unvoid actions (defaults to audit.default_actor)
    #[arg(long, global = true)]
    by: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a cohort, optionally seeded with patient ids
    Create {
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Comma-separated patient ids
        #[arg(long, value_delimiter = ',')]
        patients: Vec<u32>,
    },

    /// List cohorts
    List {
        /// Include voided cohorts
        #[arg(long)]
        include_voided: bool,

        /// Only cohorts whose name contains this text (voided included)
        #[arg(long)]
        name: Option<String>,
    },

    /// Show one cohort, by id or by exact name
    Show {
        cohort: String,

        #[arg(long, value_parser = parse_instant)]
        as_of: Option<DateTime<Utc>>,
    },

    /// List memberships of a cohort
    Members {
        id: u32,

        /// Only memberships active at this instant (default: now)
        #[arg(long, value_parser = parse_instant, conflicts_with = "history")]
        as_of: Option<DateTime<Utc>>,

        /// Every membership ever recorded, including ended and voided ones
        #[arg(long)]
        history: bool,
    },

    /// Add a patient to a cohort (no-op if already a member)
    Add {
        id: u32,
        patient: u32,

        #[arg(long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,
    },

    /// End a patient's membership (no-op if not a member)
    Remove {
        id: u32,
        patient: u32,

        #[arg(long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,
    },

    /// Void a cohort
    Void {
        id: u32,

        #[arg(long)]
        reason: String,
    },

    /// Unvoid a cohort
    Unvoid { id: u32 },

    /// Permanently delete a cohort
    Purge { id: u32 },

    /// Non-voided cohorts a patient currently belongs to
    Containing { patient: u32 },

    /// Report validation violations for a stored cohort
    Validate { id: u32 },

    /// Patient lifecycle events
    Patient {
        #[command(subcommand)]
        action: PatientAction,
    },

    /// Re-apply every journaled patient event
    Replay,
}

#[derive(Subcommand)]
enum PatientAction {
    /// Void a patient and all of their memberships
    Void {
        patient: u32,

        #[arg(long)]
        reason: String,

        #[arg(long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,
    },

    /// Unvoid a patient and all of their memberships
    Unvoid {
        patient: u32,

        #[arg(long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,
    },
}

/// Resolved file locations and audit identity for one invocation
struct Context {
    store_path: PathBuf,
    journal_path: PathBuf,
    actor: UserRef,
}

type Service<'a> = CohortService<&'a mut MemoryStore, &'a mut PatientDirectory>;

fn main() {
    cohort_core::logging::init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let ctx = Context {
        store_path: config.data.store_path(&data_dir),
        journal_path: config.data.journal_path(&data_dir),
        actor: cli.by.map(UserRef::new).unwrap_or_else(|| config.audit.actor()),
    };
    tracing::debug!(
        "Using store {:?} and journal {:?} as {}",
        ctx.store_path,
        ctx.journal_path,
        ctx.actor
    );

    match cli.command {
        Commands::Create {
            name,
            description,
            patients,
        } => cmd_create(&ctx, name, description, patients),
        Commands::List {
            include_voided,
            name,
        } => cmd_list(&ctx, include_voided, name),
        Commands::Show { cohort, as_of } => cmd_show(&ctx, &cohort, as_of),
        Commands::Members { id, as_of, history } => cmd_members(&ctx, CohortId(id), as_of, history),
        Commands::Add { id, patient, at } => mutate(&ctx, |service| {
            let cohort = service.add_patient_to_cohort_at(
                CohortId(id),
                PatientRef(patient),
                at.unwrap_or_else(Utc::now),
            )?;
            println!("✓ Patient {} is a member of cohort {}", patient, id);
            println!("  Active members: {}", cohort.size());
            Ok(())
        }),
        Commands::Remove { id, patient, at } => mutate(&ctx, |service| {
            let at = at.unwrap_or_else(Utc::now);
            let was_member = service
                .get_cohort(CohortId(id))?
                .map_or(false, |c| c.contains_at(PatientRef(patient), at));
            let cohort =
                service.remove_patient_from_cohort_at(CohortId(id), PatientRef(patient), at)?;
            if was_member {
                println!("✓ Ended membership of patient {} in cohort {}", patient, id);
            } else {
                println!("Patient {} is not a member of cohort {} - nothing to remove.", patient, id);
            }
            println!("  Active members: {}", cohort.size());
            Ok(())
        }),
        Commands::Void { id, reason } => mutate(&ctx, |service| {
            let cohort = service.void_cohort(CohortId(id), &ctx.actor, &reason, Utc::now())?;
            if let Some(info) = cohort.void_info() {
                println!("✓ Cohort {} voided: {}", id, info.void_reason);
            }
            Ok(())
        }),
        Commands::Unvoid { id } => mutate(&ctx, |service| {
            service.unvoid_cohort(CohortId(id))?;
            println!("✓ Cohort {} unvoided", id);
            Ok(())
        }),
        Commands::Purge { id } => mutate(&ctx, |service| {
            service.purge_cohort(CohortId(id))?;
            println!("✓ Cohort {} purged", id);
            Ok(())
        }),
        Commands::Containing { patient } => cmd_containing(&ctx, PatientRef(patient)),
        Commands::Validate { id } => cmd_validate(&ctx, CohortId(id)),
        Commands::Patient { action } => cmd_patient(&ctx, action),
        Commands::Replay => cmd_replay(&ctx),
    }
}

/// Run `f` against the stored working set under the store's exclusive lock
fn mutate<F, T>(ctx: &Context, f: F) -> Result<T>
where
    F: FnOnce(&mut Service<'_>) -> Result<T>,
{
    Snapshot::update(&ctx.store_path, |snapshot| {
        let mut service = CohortService::new(&mut snapshot.cohorts, &mut snapshot.patients);
        f(&mut service)
    })
}

/// Read-only service over the stored working set
fn open(ctx: &Context) -> Result<CohortService<MemoryStore, PatientDirectory>> {
    let Snapshot { cohorts, patients } = Snapshot::load(&ctx.store_path)?;
    Ok(CohortService::new(cohorts, patients))
}

fn cmd_create(ctx: &Context, name: String, description: String, patients: Vec<u32>) -> Result<()> {
    let cohort = Cohort::with_patients(name, description, patients.into_iter().map(PatientRef));
    mutate(ctx, |service| {
        let saved = service.save_cohort(cohort)?;
        println!(
            "✓ Created cohort {} \"{}\" with {} member(s)",
            display_id(&saved),
            saved.name,
            saved.size()
        );
        println!("  uuid: {}", saved.uuid());
        Ok(())
    })
}

fn cmd_list(ctx: &Context, include_voided: bool, name: Option<String>) -> Result<()> {
    let service = open(ctx)?;

    let cohorts = match name {
        Some(fragment) => service.get_cohorts(&fragment)?,
        None => service.get_all_cohorts(include_voided)?,
    };

    if cohorts.is_empty() {
        println!("No cohorts found.");
        return Ok(());
    }

    for cohort in &cohorts {
        println!(
            "{:>4}  {:<30} {:>5} member(s){}",
            display_id(cohort),
            cohort.name,
            cohort.size(),
            if cohort.is_voided() { "  [voided]" } else { "" }
        );
    }
    Ok(())
}

fn cmd_show(ctx: &Context, key: &str, as_of: Option<DateTime<Utc>>) -> Result<()> {
    let service = open(ctx)?;

    let cohort = match key.parse::<u32>() {
        Ok(id) => service.get_cohort(CohortId(id))?,
        Err(_) => service.get_cohort_by_name(key)?,
    };
    let Some(cohort) = cohort else {
        println!("No cohort found for {:?}.", key);
        return Ok(());
    };

    let as_of = as_of.unwrap_or_else(Utc::now);
    println!("Cohort {}: {}", display_id(&cohort), cohort.name);
    println!("  uuid:        {}", cohort.uuid());
    if !cohort.description.is_empty() {
        println!("  description: {}", cohort.description);
    }
    println!("  created:     {}", cohort.date_created.to_rfc3339());
    if let Some(info) = cohort.void_info() {
        println!(
            "  voided:      {} by {} at {}",
            info.void_reason,
            info.voided_by,
            info.date_voided.to_rfc3339()
        );
    }
    let ids: Vec<String> = cohort
        .member_ids_at(as_of)
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("  members as of {}: {}", as_of.to_rfc3339(), ids.len());
    if !ids.is_empty() {
        println!("  patient ids: {}", ids.join(", "));
    }
    Ok(())
}

fn cmd_members(ctx: &Context, id: CohortId, as_of: Option<DateTime<Utc>>, history: bool) -> Result<()> {
    let service = open(ctx)?;
    let cohort = service.get_cohort(id)?.ok_or(Error::CohortNotFound(id))?;

    let memberships: Vec<&Membership> = if history {
        cohort.memberships().iter().collect()
    } else {
        cohort.memberships_at(as_of.unwrap_or_else(Utc::now))
    };

    if memberships.is_empty() {
        println!("No memberships.");
        return Ok(());
    }

    for membership in memberships {
        println!("{}", describe_membership(membership));
    }
    Ok(())
}

fn cmd_containing(ctx: &Context, patient: PatientRef) -> Result<()> {
    let service = open(ctx)?;

    let cohorts = service.get_cohorts_containing_patient(patient)?;
    if cohorts.is_empty() {
        println!("Patient {} is not in any cohort.", patient);
        return Ok(());
    }
    for cohort in cohorts {
        println!("{:>4}  {}", display_id(&cohort), cohort.name);
    }
    Ok(())
}

fn cmd_validate(ctx: &Context, id: CohortId) -> Result<()> {
    let service = open(ctx)?;

    let cohort = service.get_cohort(id)?.ok_or(Error::CohortNotFound(id))?;
    let violations = service.validate(&cohort)?;
    if violations.is_empty() {
        println!("✓ Cohort {} is valid", id);
        return Ok(());
    }

    println!("Cohort {} has {} violation(s):", id, violations.len());
    for violation in &violations {
        println!("  - {} [{}]: {}", violation.field, violation.code, violation.message);
    }
    Err(Error::Validation(violations))
}

fn cmd_patient(ctx: &Context, action: PatientAction) -> Result<()> {
    let event = match action {
        PatientAction::Void { patient, reason, at } => PatientEvent::Voided(PatientVoided {
            patient: PatientRef(patient),
            by: ctx.actor.clone(),
            reason,
            at: at.unwrap_or_else(Utc::now),
        }),
        PatientAction::Unvoid { patient, at } => {
            let service = open(ctx)?;
            let reason = service
                .patients()
                .void_info(PatientRef(patient))
                .map(|info| info.void_reason.clone())
                .unwrap_or_default();
            PatientEvent::Unvoided(PatientUnvoided {
                patient: PatientRef(patient),
                by: ctx.actor.clone(),
                at: at.unwrap_or_else(Utc::now),
                reason,
            })
        }
    };

    let report = mutate(ctx, |service| {
        let report = service.apply_event(&event)?;
        JsonlJournal::new(&ctx.journal_path).append(&event)?;
        Ok(report)
    })?;

    let verb = match &event {
        PatientEvent::Voided(_) => "voided",
        PatientEvent::Unvoided(_) => "unvoided",
    };
    println!("✓ Patient {} {}", event.patient(), verb);
    println!(
        "  {} membership(s) {} across {} cohort(s)",
        report.memberships_changed, verb, report.cohorts_changed
    );
    Ok(())
}

fn cmd_replay(ctx: &Context) -> Result<()> {
    let events = read_events(&ctx.journal_path)?;
    if events.is_empty() {
        println!("No journaled events - nothing to replay.");
        return Ok(());
    }

    let total = mutate(ctx, |service| {
        let mut total = CascadeReport::default();
        for event in &events {
            let report = service.apply_event(event)?;
            total.cohorts_changed += report.cohorts_changed;
            total.memberships_changed += report.memberships_changed;
        }
        Ok(total)
    })?;

    println!("✓ Replayed {} event(s)", events.len());
    println!("  {} membership(s) changed", total.memberships_changed);
    Ok(())
}

fn describe_membership(membership: &Membership) -> String {
    let end = membership
        .end_date()
        .map(|end| end.to_rfc3339())
        .unwrap_or_else(|| "-".into());
    let mut line = format!(
        "patient {:>6}  start {}  end {}",
        membership.patient(),
        membership.start_date().to_rfc3339(),
        end
    );
    if let Some(info) = membership.void_info() {
        line.push_str(&format!("  [voided: {}]", info.void_reason));
    }
    line
}

fn display_id(cohort: &Cohort) -> String {
    cohort
        .id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".into())
}

/// Parse an instant as RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or `YYYY-MM-DD` (UTC midnight)
fn parse_instant(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!(
        "invalid instant {:?} (expected RFC 3339, \"YYYY-MM-DD HH:MM:SS\" or \"YYYY-MM-DD\")",
        value
    ))
}
