//! Add-on registry commands: init, install, add, uninstall, update, reindex,
//! list and info.

use console::style;
use serde_json::json;

use tk_core::{AddonType, Config, Error, Paths, Validation};
use tk_io::{AddOptions, InstallOptions, NpmPackageManager, PackageRegistry};

use super::print_json;
use crate::display::{format_bytes, format_types, package_line};

pub fn open(paths: &Paths, config: &Config) -> Result<PackageRegistry, Error> {
    PackageRegistry::open(
        paths.clone(),
        Box::new(NpmPackageManager::new(config.package_manager.clone())),
    )
}

/// Turn a rejected manifest into an error naming the package.
fn accepted(name: &str, validation: Validation) -> Result<(), Error> {
    match validation {
        Validation::Valid => Ok(()),
        Validation::Invalid(message) => Err(Error::InvalidManifest {
            package: name.to_string(),
            message,
        }),
    }
}

pub async fn run_init(paths: &Paths) -> Result<(), Error> {
    println!(
        "{} Initializing registry at {}...",
        style("==>").cyan().bold(),
        style(paths.root.display()).bold()
    );

    match PackageRegistry::create_new_registry(paths).await? {
        Validation::Valid => println!(
            "{} {} Registry ready",
            style("==>").cyan().bold(),
            style("✓").green().bold()
        ),
        Validation::Invalid(message) => println!(
            "{} {} ({})",
            style("==>").cyan().bold(),
            style("Registry already initialized").yellow(),
            message
        ),
    }
    Ok(())
}

pub async fn run_install(
    registry: &PackageRegistry,
    name: &str,
    local: bool,
    force: bool,
    version: Option<String>,
) -> Result<(), Error> {
    println!(
        "{} Installing {}...",
        style("==>").cyan().bold(),
        style(name).bold()
    );

    let options = InstallOptions {
        local,
        force,
        version,
    };
    accepted(name, registry.install(name, options).await?)?;

    println!(
        "{} {} Installed {}",
        style("==>").cyan().bold(),
        style("✓").green().bold(),
        style(name).bold()
    );
    Ok(())
}

pub async fn run_add(registry: &PackageRegistry, name: &str, force: bool) -> Result<(), Error> {
    accepted(name, registry.add_package(name, AddOptions { force }).await?)?;
    println!(
        "{} {} Added {} to the registry",
        style("==>").cyan().bold(),
        style("✓").green().bold(),
        style(name).bold()
    );
    Ok(())
}

pub async fn run_uninstall(registry: &PackageRegistry, name: &str) -> Result<(), Error> {
    println!(
        "{} Uninstalling {}...",
        style("==>").cyan().bold(),
        style(name).bold()
    );
    registry.uninstall(name).await?;
    println!(
        "{} {} Uninstalled {}",
        style("==>").cyan().bold(),
        style("✓").green().bold(),
        style(name).bold()
    );
    Ok(())
}

pub async fn run_update(registry: &PackageRegistry, name: &str, version: &str) -> Result<(), Error> {
    println!(
        "{} Updating {} to {}...",
        style("==>").cyan().bold(),
        style(name).bold(),
        style(version).green()
    );
    accepted(name, registry.update(name, version).await?)?;
    println!(
        "{} {} Updated {}",
        style("==>").cyan().bold(),
        style("✓").green().bold(),
        style(name).bold()
    );
    Ok(())
}

pub async fn run_reindex(registry: &PackageRegistry) -> Result<(), Error> {
    println!("{} Reindexing add-ons...", style("==>").cyan().bold());
    let report = registry.reindex().await?;

    for name in &report.added {
        println!("    {} {}", style("✓").green(), name);
    }
    for (name, reason) in &report.skipped {
        println!("    {} {} {}", style("✗").red(), name, style(reason).dim());
    }

    println!(
        "{} {} added, {} skipped",
        style("==>").cyan().bold(),
        style(report.added.len()).green().bold(),
        report.skipped.len()
    );
    Ok(())
}

pub fn run_list(
    registry: &PackageRegistry,
    addon_type: Option<AddonType>,
    json: bool,
) -> Result<(), Error> {
    let packages = match addon_type {
        Some(t) => registry.packages_of_type(t)?,
        None => registry.list_packages()?,
    };

    if json {
        print_json(&packages);
        return Ok(());
    }

    if packages.is_empty() {
        println!("{} No add-ons registered", style("==>").cyan().bold());
        println!(
            "\n    → Install one with: {} install <name>",
            style("tk").cyan()
        );
        return Ok(());
    }

    println!(
        "{} {} registered add-ons:",
        style("==>").cyan().bold(),
        packages.len()
    );
    for package in &packages {
        println!("    {}", package_line(package));
    }
    Ok(())
}

pub fn run_info(registry: &PackageRegistry, name: &str, json: bool) -> Result<(), Error> {
    let package = registry.get_package(name)?;

    let mut entry_points = Vec::new();
    for addon_type in &package.types {
        let path = registry.entry_point(name, *addon_type)?;
        entry_points.push((*addon_type, path));
    }

    if json {
        let entries: serde_json::Map<String, serde_json::Value> = entry_points
            .iter()
            .map(|(t, path)| (t.to_string(), json!(path.to_string_lossy())))
            .collect();
        print_json(&json!({
            "package": package,
            "entryPoints": entries,
        }));
        return Ok(());
    }

    println!(
        "{} {} {}",
        style("==>").cyan().bold(),
        style(&package.name).bold(),
        style(&package.info.version).green()
    );
    if let Some(display_name) = &package.info.display_name {
        println!("    {:<12} {}", "Name:", display_name);
    }
    println!("    {:<12} {}", "Description:", package.info.description);
    println!("    {:<12} {}", "Types:", format_types(&package.types));
    if let Some(size) = package.info.size {
        println!("    {:<12} {}", "Size:", format_bytes(size));
    }
    if let Some(icon) = &package.info.icon_url {
        println!("    {:<12} {}", "Icon:", icon);
    }
    println!("    Entry points:");
    for (addon_type, path) in &entry_points {
        println!("      {:<10} {}", addon_type.as_str(), path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_manifest_becomes_error_naming_package() {
        let err = accepted(
            "executor-ahk",
            Validation::Invalid("No valid type was listed in the package.json!".to_string()),
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidManifest {
                package: "executor-ahk".to_string(),
                message: "No valid type was listed in the package.json!".to_string(),
            }
        );
        assert!(accepted("executor-ahk", Validation::Valid).is_ok());
    }

    #[tokio::test]
    async fn open_uses_configured_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = Paths::new(tmp.path());
        assert!(open(&paths, &Config::default()).err().unwrap().is_not_found());

        run_init(&paths).await.unwrap();
        let registry = open(&paths, &Config::default()).unwrap();
        assert_eq!(registry.paths(), &paths);
        assert!(registry.list_packages().unwrap().is_empty());
    }
}
