use chrono::Utc;
use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use checkloop::{
    Config, Database, Profile, ResetScheduler, StateStore,
    cli::{self, Cli, Commands},
};

fn main() -> Result<()> {
    // Set up error reporting with color-eyre
    color_eyre::install()?;

    let cli = Cli::parse();

    // --dev keeps a separate config and database
    let profile = if cli.dev { Profile::Dev } else { Profile::Prod };

    let config = match &cli.config {
        Some(path) => Config::load_from_path(&PathBuf::from(path), profile)?,
        None => Config::load_with_profile(profile)?,
    };

    checkloop::logging::init_logging(&config.log_level, &config.get_log_dir())?;

    let db_path = config.get_database_path();
    let db = Database::new(
        db_path.to_str()
            .ok_or_else(|| color_eyre::eyre::eyre!("Database path contains invalid UTF-8"))?
    )?;
    let mut store = StateStore::load(db)?;

    // Timers are not persisted: re-derive them, applying resets that fell due meanwhile
    let mut scheduler = ResetScheduler::new();
    let now = Utc::now();
    let caught_up = scheduler.rearm_all(&mut store, now)?;
    if !caught_up.is_empty() {
        log::info!("event=catch_up module=main resets={}", caught_up.len());
    }

    match cli.command.unwrap_or(Commands::List) {
        Commands::List => cli::handle_list(&store, &scheduler, now)?,
        Commands::AddCategory { name } => cli::handle_add_category(name, &mut store)?,
        Commands::DeleteCategory { category } => cli::handle_delete_category(category, &mut store)?,
        Commands::AddTask { category, text, every, at, one_time } => {
            let default_interval_ms = config.default_interval_ms()?;
            cli::handle_add_task(category, text, every, at, one_time, default_interval_ms, &mut store)?;
        }
        Commands::DeleteTask { category, task } => cli::handle_delete_task(category, task, &mut store)?,
        Commands::Check { category, task } => {
            cli::handle_check(category, task, &mut store, &mut scheduler, now)?;
        }
        Commands::Uncheck { category, task } => cli::handle_uncheck(category, task, &mut store, now)?,
        Commands::Reorder { category, tasks } => cli::handle_reorder(category, tasks, &mut store)?,
        Commands::History { remove } => cli::handle_history(remove, &mut store)?,
        Commands::Prefs { theme, time_format } => cli::handle_prefs(theme, time_format, &mut store)?,
        Commands::Watch => cli::handle_watch(&mut store, &mut scheduler, config.tick_interval())?,
    }

    Ok(())
}
