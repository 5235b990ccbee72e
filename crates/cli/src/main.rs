use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vs_core::config::{appointment_model_from_env_value, datetime_from_env_value};
use vs_core::constants::{
    DEFAULT_APPOINTMENT_MODEL_ENV, PROTOCOL_FILE_ENV, STUDY_CLOSE_DATETIME_ENV,
    STUDY_OPEN_DATETIME_ENV,
};
use vs_core::protocol::{load_protocol_file, register_protocol};
use vs_core::storage::memory::{InMemoryConsents, InMemoryStore};
use vs_core::{
    ConsentLookup, ConsentRecord, CoreConfig, Enrollment, Schedule, ScheduleContext, ScheduleKey,
    ScheduleSignalHandlers, ScheduleStore, SiteVisitSchedules, Visit,
};

#[derive(Parser)]
#[command(name = "vs")]
#[command(about = "Visit schedule CLI")]
struct Cli {
    /// Protocol definition file (defaults to $VS_PROTOCOL_FILE)
    #[arg(long, global = true)]
    protocol: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the protocol and check every schedule
    Validate,
    /// List the visits of a schedule
    Visits {
        /// Schedule as visit_schedule.schedule
        schedule: String,
        #[arg(long)]
        json: bool,
    },
    /// Compute target dates and windows for a schedule
    Windows {
        /// Schedule as visit_schedule.schedule
        schedule: String,
        /// Base datetime (RFC 3339 or YYYY-MM-DD)
        base: String,
        #[arg(long)]
        json: bool,
    },
    /// Put a subject on a schedule, take them off and reopen, in memory
    Walkthrough {
        /// Schedule as visit_schedule.schedule
        schedule: String,
        /// Subject identifier
        subject: String,
        /// Consent identifier recorded for the subject
        #[arg(long, default_value = "consent-1")]
        consent_identifier: String,
    },
}

#[derive(Serialize)]
struct VisitRow {
    code: String,
    title: String,
    timepoint: f64,
    rbase_days: i64,
    rlower_days: i64,
    rupper_days: i64,
    crfs: usize,
    requisitions: usize,
    allow_unscheduled: bool,
}

impl From<&Visit> for VisitRow {
    fn from(visit: &Visit) -> Self {
        Self {
            code: visit.code().to_string(),
            title: visit.title().to_string(),
            timepoint: visit.timepoint().value(),
            rbase_days: visit.rbase().num_days(),
            rlower_days: visit.window_period().rlower().num_days(),
            rupper_days: visit.window_period().rupper().num_days(),
            crfs: visit.crfs().len(),
            requisitions: visit.requisitions().len(),
            allow_unscheduled: visit.allow_unscheduled(),
        }
    }
}

/// Resolve [`CoreConfig`] from the environment.
fn load_config() -> anyhow::Result<CoreConfig> {
    let study_open = match datetime_from_env_value(
        std::env::var(STUDY_OPEN_DATETIME_ENV).ok(),
        STUDY_OPEN_DATETIME_ENV,
    )? {
        Some(dt) => dt,
        None => {
            tracing::warn!("{STUDY_OPEN_DATETIME_ENV} not set; using the Unix epoch");
            DateTime::<Utc>::UNIX_EPOCH
        }
    };
    let study_close = datetime_from_env_value(
        std::env::var(STUDY_CLOSE_DATETIME_ENV).ok(),
        STUDY_CLOSE_DATETIME_ENV,
    )?;
    let appointment_model =
        appointment_model_from_env_value(std::env::var(DEFAULT_APPOINTMENT_MODEL_ENV).ok())?;

    Ok(CoreConfig::new(study_open, study_close, Some(appointment_model))?)
}

fn load_registry(
    protocol: Option<PathBuf>,
    config: &CoreConfig,
) -> anyhow::Result<Arc<SiteVisitSchedules>> {
    let path = protocol
        .or_else(|| std::env::var(PROTOCOL_FILE_ENV).ok().map(PathBuf::from))
        .ok_or_else(|| anyhow!("no protocol file given; pass --protocol or set {PROTOCOL_FILE_ENV}"))?;

    let definition = load_protocol_file(&path)
        .with_context(|| format!("loading protocol {}", path.display()))?;
    let registry = Arc::new(SiteVisitSchedules::new());
    register_protocol(&registry, &definition, config)?;
    Ok(registry)
}

fn find_schedule(registry: &SiteVisitSchedules, schedule: &str) -> anyhow::Result<Arc<Schedule>> {
    let key = ScheduleKey::parse(schedule)
        .with_context(|| format!("'{schedule}' is not visit_schedule.schedule"))?;
    let (_, schedule) = registry.get_schedule_by_key(&key)?;
    Ok(schedule)
}

/// An in-memory store that knows every model the registry uses.
fn in_memory_collaborators(
    registry: &SiteVisitSchedules,
) -> anyhow::Result<(Arc<InMemoryStore>, Arc<InMemoryConsents>)> {
    let mut models = Vec::new();
    let mut consent_models = Vec::new();
    for visit_schedule in registry.visit_schedules()? {
        for schedule in visit_schedule.schedules() {
            models.push(schedule.onschedule_model().clone());
            models.push(schedule.offschedule_model().clone());
            models.push(schedule.appointment_model().clone());
            consent_models.push(schedule.consent_model().clone());
        }
    }
    Ok((
        Arc::new(InMemoryStore::new(models)),
        Arc::new(InMemoryConsents::new(consent_models)),
    ))
}

fn validate(registry: &SiteVisitSchedules, config: &CoreConfig) -> anyhow::Result<()> {
    let (store, consents) = in_memory_collaborators(registry)?;
    let ctx = ScheduleContext {
        registry,
        store: store.as_ref(),
        consents: consents.as_ref(),
        config,
    };

    for visit_schedule in registry.visit_schedules()? {
        println!("{} ({})", visit_schedule.name(), visit_schedule.verbose_name());
        for schedule in visit_schedule.schedules() {
            schedule.validate(&ctx)?;
            println!(
                "  {}: {} visits, onschedule={}, offschedule={}, appointment={}, consent={}",
                schedule.name(),
                schedule.visits().len(),
                schedule.onschedule_model(),
                schedule.offschedule_model(),
                schedule.appointment_model(),
                schedule.consent_model()
            );
        }
    }
    println!("OK");
    Ok(())
}

fn print_visits(schedule: &Schedule, json: bool) -> anyhow::Result<()> {
    let rows: Vec<VisitRow> = schedule.visits().iter().map(VisitRow::from).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for row in rows {
        println!(
            "{:<8} {:<24} tp={:<6} base=+{}d window=[{}d, +{}d] crfs={} requisitions={}",
            row.code,
            row.title,
            row.timepoint,
            row.rbase_days,
            row.rlower_days,
            row.rupper_days,
            row.crfs,
            row.requisitions
        );
    }
    Ok(())
}

fn print_windows(schedule: &Schedule, base: &str, json: bool) -> anyhow::Result<()> {
    let base = datetime_from_env_value(Some(base.to_string()), "base")?
        .ok_or_else(|| anyhow!("base datetime is required"))?;
    let dates = schedule.visits().timepoint_dates(base)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&dates)?);
        return Ok(());
    }

    for scheduled in dates {
        println!(
            "{:<8} {}  window {} .. {}",
            scheduled.code,
            scheduled.timepoint_datetime.to_rfc3339(),
            scheduled.window.lower.to_rfc3339(),
            scheduled.window.upper.to_rfc3339()
        );
    }
    Ok(())
}

fn walkthrough(
    registry: Arc<SiteVisitSchedules>,
    config: Arc<CoreConfig>,
    schedule: &Schedule,
    subject: &str,
    consent_identifier: &str,
) -> anyhow::Result<()> {
    let (store, consents) = in_memory_collaborators(&registry)?;
    let consent_lookup: Arc<dyn ConsentLookup> = consents.clone();
    store.subscribe(Arc::new(ScheduleSignalHandlers::new(
        Arc::clone(&registry),
        consent_lookup,
        Arc::clone(&config),
    )))?;

    let ctx = ScheduleContext {
        registry: &registry,
        store: store.as_ref(),
        consents: consents.as_ref(),
        config: &config,
    };
    let state = |label: &str| -> anyhow::Result<()> {
        println!("{label:<16} {:?}", schedule.enrollment_state(&ctx, subject)?);
        Ok(())
    };

    state("start")?;

    let now = Utc::now();
    consents.add(
        schedule.consent_model(),
        ConsentRecord {
            subject_identifier: subject.to_string(),
            consent_identifier: consent_identifier.to_string(),
            consent_datetime: now,
        },
    )?;

    let onschedule = schedule.put_on_schedule(&ctx, &Enrollment::new(subject).eligible(true))?;
    state("put on")?;
    for scheduled in schedule
        .visits()
        .timepoint_dates(onschedule.onschedule_datetime)?
    {
        println!(
            "  {:<8} due {} ({} .. {})",
            scheduled.code,
            scheduled.timepoint_datetime.date_naive(),
            scheduled.window.lower.date_naive(),
            scheduled.window.upper.date_naive()
        );
    }

    schedule.take_off_schedule(&ctx, subject, Some(Utc::now()))?;
    state("taken off")?;

    store.delete_offschedule(schedule.offschedule_model(), subject)?;
    state("reopened")?;

    let history = store.get_history(subject, &onschedule.schedule_key)?;
    if let Some(history) = history {
        println!("{}", serde_json::to_string_pretty(&history)?);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("vs=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("Use 'vs --help' for commands");
        return Ok(());
    };

    let config = Arc::new(load_config()?);
    let registry = load_registry(cli.protocol, &config)?;

    match command {
        Commands::Validate => validate(&registry, &config)?,
        Commands::Visits { schedule, json } => {
            print_visits(&*find_schedule(&registry, &schedule)?, json)?
        }
        Commands::Windows {
            schedule,
            base,
            json,
        } => print_windows(&*find_schedule(&registry, &schedule)?, &base, json)?,
        Commands::Walkthrough {
            schedule,
            subject,
            consent_identifier,
        } => {
            let schedule = find_schedule(&registry, &schedule)?;
            walkthrough(
                Arc::clone(&registry),
                Arc::clone(&config),
                &schedule,
                &subject,
                &consent_identifier,
            )?
        }
    }

    Ok(())
}
