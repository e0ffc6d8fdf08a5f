use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use petdose_core::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "petdose")]
#[command(about = "Pet medication reminder scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Treat this RFC 3339 timestamp as the current time
    #[arg(long, global = true, value_parser = parse_now)]
    now: Option<DateTime<Local>>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring scheduled reminders in line with active medications (default)
    Refresh {
        /// Only refresh this pet's reminders
        #[arg(long)]
        pet: Option<String>,

        /// Fill in missing daily reminder times with evenly spaced ones
        #[arg(long)]
        auto_fill: bool,
    },

    /// Show upcoming doses without scheduling anything
    Upcoming {
        #[arg(long)]
        pet: Option<String>,

        /// How far ahead to look (defaults to the configured horizon)
        #[arg(long)]
        hours: Option<u32>,

        /// Also write the doses to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Show reminders that are due and clear them
    Due,

    /// Add a medication
    Add {
        #[arg(long)]
        pet: String,

        #[arg(long)]
        name: String,

        /// Amount per dose
        #[arg(long)]
        amount: f64,

        /// Dose unit (mg, ml, tablet, ...)
        #[arg(long)]
        unit: String,

        /// Doses per period
        #[arg(long, default_value_t = 1)]
        times: i64,

        /// day, week or month
        #[arg(long, default_value = "day")]
        period: String,

        /// Reminder time as HH:MM (repeatable)
        #[arg(long = "at")]
        at: Vec<String>,

        /// First day (YYYY-MM-DD), defaults to today
        #[arg(long)]
        start: Option<String>,

        /// Last day (YYYY-MM-DD); omit for an ongoing medication
        #[arg(long)]
        end: Option<String>,

        /// Store the medication without reminders
        #[arg(long)]
        no_reminders: bool,

        /// Use this id instead of a generated one
        #[arg(long)]
        id: Option<String>,
    },

    /// Remove a medication
    Remove { id: String },

    /// List stored medications
    List {
        #[arg(long)]
        pet: Option<String>,
    },

    /// Suggest reminder times for a medication with too few of them
    Suggest { id: String },
}

/// Files kept in the data directory
struct Paths {
    medications: PathBuf,
    notifications: PathBuf,
}

impl Paths {
    fn new(data_dir: &Path) -> Self {
        Self {
            medications: data_dir.join("medications.json"),
            notifications: data_dir.join("notifications.json"),
        }
    }
}

fn parse_now(s: &str) -> std::result::Result<DateTime<Local>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| format!("invalid RFC 3339 timestamp: {}", e))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    petdose_core::logging::init_with_level(petdose_core::logging::level_for_verbosity(
        cli.verbose,
    ));

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());
    let paths = Paths::new(&data_dir);
    let now = cli.now.unwrap_or_else(Local::now);

    tracing::debug!("Using data directory {:?}, now = {}", data_dir, now);

    match cli.command {
        Some(Commands::Refresh { pet, auto_fill }) => {
            cmd_refresh(&paths, &config, now, pet.as_deref(), auto_fill)
        }
        Some(Commands::Upcoming { pet, hours, csv }) => {
            cmd_upcoming(&paths, &config, now, pet.as_deref(), hours, csv.as_deref())
        }
        Some(Commands::Due) => cmd_due(&paths, &config, now),
        Some(Commands::Add {
            pet,
            name,
            amount,
            unit,
            times,
            period,
            at,
            start,
            end,
            no_reminders,
            id,
        }) => {
            let record = Medication {
                id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                pet_id: pet,
                name,
                dosage_amount: amount,
                dosage_unit: unit,
                times_per_period: times,
                period,
                reminder_times: at,
                start_date: start.unwrap_or_else(|| now.date_naive().to_string()),
                indefinite: end.is_none(),
                end_date: end,
                reminders_enabled: !no_reminders,
                active: true,
            };
            cmd_add(&paths, record)
        }
        Some(Commands::Remove { id }) => cmd_remove(&paths, &id),
        Some(Commands::List { pet }) => cmd_list(&paths, pet.as_deref()),
        Some(Commands::Suggest { id }) => cmd_suggest(&paths, &config, &id),
        None => {
            // Default to "refresh" command
            cmd_refresh(&paths, &config, now, None, false)
        }
    }
}

fn build_service(paths: &Paths, config: &Config) -> ReminderService<JsonMedicationStore> {
    let store = JsonMedicationStore::new(&paths.medications);
    let center: Arc<dyn NotificationCenter> = Arc::new(FileNotificationCenter::new(
        &paths.notifications,
        config.notifications.quota,
    ));
    ReminderService::new(store, center, config.clone())
}

fn cmd_refresh(
    paths: &Paths,
    config: &Config,
    now: DateTime<Local>,
    pet: Option<&str>,
    auto_fill: bool,
) -> Result<()> {
    let service = build_service(paths, config).with_auto_fill(auto_fill);
    let report = service.refresh_reminders_at(pet, &now)?;

    println!(
        "✓ Reminders refreshed: {} added, {} cancelled",
        report.added, report.cancelled
    );
    if report.truncated {
        println!("  (truncated to the device limit of {})", config.notifications.quota);
    }
    print_problems(&report.warnings, &report.failures);

    Ok(())
}

fn cmd_upcoming(
    paths: &Paths,
    config: &Config,
    now: DateTime<Local>,
    pet: Option<&str>,
    hours: Option<u32>,
    csv: Option<&Path>,
) -> Result<()> {
    let horizon = hours
        .map(|h| chrono::Duration::hours(i64::from(h)))
        .unwrap_or_else(|| config.notifications.horizon());

    let service = build_service(paths, config);
    let upcoming = service.upcoming_doses_at(pet, &now, horizon)?;

    if upcoming.doses.is_empty() {
        println!("No doses in the next {} hours.", horizon.num_hours());
    } else {
        for dose in &upcoming.doses {
            println!(
                "{}  {:<12} {} {} {}",
                dose.scheduled_time.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                dose.pet_id,
                display_name(&dose.medication_name, &dose.medication_id),
                dose.dose_amount,
                dose.dose_unit
            );
        }
    }

    if let Some(path) = csv {
        let count = petdose_core::export::write_doses_csv(path, &upcoming.doses)?;
        println!("✓ Exported {} doses to {}", count, path.display());
    }

    print_problems(&upcoming.warnings, &upcoming.failures);
    Ok(())
}

fn cmd_due(paths: &Paths, config: &Config, now: DateTime<Local>) -> Result<()> {
    let center = FileNotificationCenter::new(&paths.notifications, config.notifications.quota);
    let due = center.take_due(now.with_timezone(&Utc))?;

    if due.is_empty() {
        println!("No reminders due.");
        return Ok(());
    }

    for notification in &due {
        println!(
            "🔔 {}  {} ({})",
            notification.fires_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            notification.body,
            notification.pet_id
        );
    }
    Ok(())
}

fn cmd_add(paths: &Paths, record: Medication) -> Result<()> {
    // Refuse records the scheduler would reject
    MedicationSchedule::try_from(record.clone())?;

    let id = record.id.clone();
    JsonMedicationStore::new(&paths.medications).insert(record)?;
    println!("✓ Added medication {}", id);
    println!("  Run `petdose refresh` to schedule its reminders.");
    Ok(())
}

fn cmd_remove(paths: &Paths, id: &str) -> Result<()> {
    if JsonMedicationStore::new(&paths.medications).remove(id)? {
        println!("✓ Removed medication {}", id);
        println!("  Run `petdose refresh` to cancel its reminders.");
    } else {
        println!("No medication with id {}", id);
    }
    Ok(())
}

fn cmd_list(paths: &Paths, pet: Option<&str>) -> Result<()> {
    let medications: Vec<Medication> = JsonMedicationStore::new(&paths.medications)
        .load_all()?
        .into_iter()
        .filter(|m| pet.map_or(true, |p| m.pet_id == p))
        .collect();

    if medications.is_empty() {
        println!("No medications.");
        return Ok(());
    }

    for m in &medications {
        let times = if m.reminder_times.is_empty() {
            "evenly spaced".to_string()
        } else {
            m.reminder_times.join(", ")
        };
        let mut flags = Vec::new();
        if !m.active {
            flags.push("inactive");
        }
        if !m.reminders_enabled {
            flags.push("no reminders");
        }

        println!(
            "{}  {:<12} {} {} {}  {}x/{} [{}]{}",
            m.id,
            m.pet_id,
            display_name(&m.name, &m.id),
            m.dosage_amount,
            m.dosage_unit,
            m.times_per_period,
            m.period,
            times,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            }
        );
    }
    Ok(())
}

fn cmd_suggest(paths: &Paths, config: &Config, id: &str) -> Result<()> {
    let record = JsonMedicationStore::new(&paths.medications)
        .medication_by_id(id)?
        .ok_or_else(|| Error::Other(format!("No medication with id {}", id)))?;
    let schedule = MedicationSchedule::try_from(record)?;

    let suggested = suggest_reminder_times(&schedule, &config.schedule);
    let joined = suggested
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    if schedule.frequency.explicit_times.is_empty() {
        println!(
            "{} has no fixed reminder times; doses are spread evenly at: {}",
            id, joined
        );
    } else if suggested == schedule.frequency.explicit_times {
        println!("Reminder times for {} are complete: {}", id, joined);
    } else {
        println!("Suggested reminder times for {}: {}", id, joined);
        println!("  Run `petdose refresh --auto-fill` to use them.");
    }
    Ok(())
}

fn display_name<'a>(name: &'a str, id: &'a str) -> &'a str {
    if name.is_empty() {
        id
    } else {
        name
    }
}

fn print_problems(warnings: &[String], failures: &[OperationFailure]) {
    for warning in warnings {
        println!("⚠ {}", warning);
    }
    for failure in failures {
        println!("✗ {}", failure);
    }
}
