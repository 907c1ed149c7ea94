//! Software commands: list, uninstall and reinstall software owned by add-ons.

use console::style;
use indicatif::MultiProgress;

use tk_core::{Config, Error, Paths};
use tk_io::{SoftwareQuery, SoftwareRegistry};

use super::print_json;
use crate::SoftwareAction;
use crate::display::{
    ProgressStyles, create_progress_callback, finish_progress_bars, print_software,
};

pub async fn run(paths: Paths, config: &Config, action: SoftwareAction) -> Result<(), Error> {
    match action {
        SoftwareAction::List { name, owner, json } => {
            let query = SoftwareQuery::open(paths)?;
            run_list(&query, name.as_deref(), owner.as_deref(), json)
        }
        SoftwareAction::Uninstall { owner, name } => {
            let registry = SoftwareRegistry::open(paths, owner, config)?;
            run_uninstall(&registry, &name).await
        }
        SoftwareAction::Reinstall { owner, name } => {
            let registry = SoftwareRegistry::open(paths, owner, config)?;
            run_reinstall(registry, &name).await
        }
    }
}

pub fn run_list(
    query: &SoftwareQuery,
    name: Option<&str>,
    owner: Option<&str>,
    json: bool,
) -> Result<(), Error> {
    let softwares = query.get_softwares(name, owner)?;

    if json {
        print_json(&softwares);
        return Ok(());
    }

    if softwares.is_empty() {
        println!("{} No software installed", style("==>").cyan().bold());
        return Ok(());
    }

    println!(
        "{} {} software entries:",
        style("==>").cyan().bold(),
        softwares.len()
    );
    for software in &softwares {
        print_software(software);
    }
    Ok(())
}

pub async fn run_uninstall(registry: &SoftwareRegistry, name: &str) -> Result<(), Error> {
    println!(
        "{} Uninstalling {} of {}...",
        style("==>").cyan().bold(),
        style(name).bold(),
        registry.owner()
    );

    let removed = registry.uninstall_software(name).await?;
    if removed == 0 {
        println!(
            "{} {} is not installed for {}",
            style("==>").cyan().bold(),
            style(name).yellow(),
            registry.owner()
        );
        return Ok(());
    }

    println!(
        "{} {} Uninstalled {}",
        style("==>").cyan().bold(),
        style("✓").green().bold(),
        style(name).bold()
    );
    Ok(())
}

pub async fn run_reinstall(registry: SoftwareRegistry, name: &str) -> Result<(), Error> {
    println!(
        "{} Reinstalling {} of {}...",
        style("==>").cyan().bold(),
        style(name).bold(),
        registry.owner()
    );

    let multi = MultiProgress::new();
    let (progress, bars) = create_progress_callback(multi, ProgressStyles::default(), "installed");
    let registry = registry.with_progress(Some(progress));

    let result = registry.force_install(name).await;
    finish_progress_bars(&bars);

    if result? {
        println!(
            "{} {} Reinstalled {}",
            style("==>").cyan().bold(),
            style("✓").green().bold(),
            style(name).bold()
        );
    } else {
        println!(
            "{} {} has nothing to download",
            style("==>").cyan().bold(),
            style(name).yellow()
        );
    }
    Ok(())
}
